//! Token issuance, verification and header authorization

use std::time::Duration;
use tempfile::TempDir;
use wsutils_auth::{
    parse_auth, AuthErrorKind, TokenCodec, TokenService, TokenVerifier, TOKEN_ERROR_CODE,
};
use wsutils_core::{SiteConfig, WsError};
use wsutils_store::{LockManager, LockOptions, TokenStore};

fn site(dir: &TempDir) -> SiteConfig {
    let mut site = SiteConfig::rooted_at(dir.path());
    site.registration_key = "test-signing-key".to_string();
    site.token.prefix = Some("TEST".to_string());
    site
}

#[test]
fn test_sign_verify_round_trip() {
    let codec = TokenCodec::hs256(b"secret");
    let token = codec.sign("WS_0000000001", 30).unwrap();

    let report = codec.verify(&token);
    assert!(report.is_valid());
    assert!(!report.diagnostics.error_flag);
    assert_eq!(report.subject(), Some("WS_0000000001"));
    assert_eq!(report.diagnostics.error_code, None);
}

#[test]
fn test_expired_token() {
    let codec = TokenCodec::hs256(b"secret");
    let token = codec.sign("WS_0000000001", -2).unwrap();

    let report = codec.verify(&token);
    assert!(report.diagnostics.error_flag);
    assert_eq!(report.kind(), Some(AuthErrorKind::ExpiredToken));
    assert_eq!(report.diagnostics.error_code, Some(TOKEN_ERROR_CODE));
    assert_eq!(
        report.diagnostics.error_message.as_deref(),
        Some("API access token has expired")
    );
    assert!(report.claims.is_none());
}

#[test]
fn test_invalid_and_missing_tokens() {
    let codec = TokenCodec::hs256(b"secret");
    let other = TokenCodec::hs256(b"other-secret");
    let token = other.sign("WS_0000000001", 30).unwrap();

    assert_eq!(codec.verify(&token).kind(), Some(AuthErrorKind::InvalidToken));
    assert_eq!(codec.verify("not.a.jwt").kind(), Some(AuthErrorKind::InvalidToken));
    assert_eq!(codec.verify("").kind(), Some(AuthErrorKind::MissingToken));

    // Tampered payload
    let mut parts: Vec<&str> = token.split('.').collect();
    let forged = codec.sign("WS_0000000099", 30).unwrap();
    let forged_payload = forged.split('.').nth(1).unwrap();
    parts[1] = forged_payload;
    assert_eq!(
        codec.verify(&parts.join(".")).kind(),
        Some(AuthErrorKind::InvalidToken)
    );
}

#[test]
fn test_parse_auth_reports() {
    let ok = parse_auth("bearer abc.def.ghi");
    assert!(ok.is_valid());
    assert_eq!(ok.token.as_deref(), Some("abc.def.ghi"));

    for bad in ["bearer", "nonbearer x", "bearer a b", ""] {
        let report = parse_auth(bad);
        assert!(report.diagnostics.error_flag, "{bad:?}");
        assert_eq!(report.diagnostics.kind, Some(AuthErrorKind::MalformedAuthorization));
        assert_eq!(report.diagnostics.error_code, Some(401));
        assert!(report.token.is_none());
    }
}

#[test]
fn test_report_json_shape() {
    let codec = TokenCodec::hs256(b"secret");
    let token = codec.sign("WS_0000000001", 1).unwrap();
    let value = serde_json::to_value(codec.verify(&token)).unwrap();
    assert_eq!(value["sub"], "WS_0000000001");
    assert_eq!(value["errorFlag"], false);
    assert!(value["errorCode"].is_null());

    let value = serde_json::to_value(parse_auth("bearer")).unwrap();
    assert_eq!(value["errorFlag"], true);
    assert_eq!(value["errorMessage"], "API access token not found");
    assert!(value["token"].is_null());
}

#[test]
fn test_service_reuses_token_ids() {
    let dir = TempDir::new().unwrap();
    let mut service = TokenService::from_site(&site(&dir)).unwrap();

    let (id1, token1) = service.get_token("user@example.org").unwrap();
    let (id2, token2) = service.get_token("user@example.org").unwrap();
    let (id3, _) = service.get_token("other@example.org").unwrap();

    assert_eq!(id1, "TEST_0000000001");
    assert_eq!(id1, id2);
    assert_eq!(id3, "TEST_0000000002");

    for token in [&token1, &token2] {
        let report = service.parse_token(token);
        assert_eq!(report.subject(), Some(id1.as_str()));
    }

    let header = format!("Bearer {}", token1);
    assert!(service.authorize(&header).is_valid());
    assert_eq!(
        service.authorize("Bearer").kind(),
        Some(AuthErrorKind::MalformedAuthorization)
    );
}

#[test]
fn test_revoke_removes_id() {
    let dir = TempDir::new().unwrap();
    let mut service = TokenService::from_site(&site(&dir)).unwrap();
    let (id, _) = service.get_token("gone@example.org").unwrap();
    service.get_token("kept@example.org").unwrap();

    assert!(service.revoke(&id));
    assert!(!service.revoke(&id));
    assert!(!service.store().token_id_exists(&id));
    assert!(!service.store().token_id_email_exists("gone@example.org"));

    // A returning email gets a new id past the highest live one
    let (next, _) = service.get_token("gone@example.org").unwrap();
    assert_eq!(next, "TEST_0000000003");
}

#[test]
fn test_verifier_shares_codec() {
    let dir = TempDir::new().unwrap();
    let site = site(&dir);
    let mut service = TokenService::from_site(&site).unwrap();
    let (_, token) = service.get_token("a@example.org").unwrap();

    let verifier = TokenVerifier::from_site(&site).unwrap();
    let header = format!("bearer {}", token);
    assert!(verifier.authorize(&header).is_valid());
    assert!(TokenVerifier::from(&service).parse_token(&token).is_valid());

    let mut other_site = site.clone();
    other_site.registration_key = "different".to_string();
    let stranger = TokenVerifier::from_site(&other_site).unwrap();
    assert_eq!(
        stranger.authorize(&header).kind(),
        Some(AuthErrorKind::InvalidToken)
    );
}

#[test]
fn test_bad_algorithm_is_config_error() {
    let dir = TempDir::new().unwrap();
    let mut site = site(&dir);
    site.token.algorithm = "RS256".to_string();
    assert!(matches!(
        TokenVerifier::from_site(&site),
        Err(WsError::Config { .. })
    ));
}

#[test]
fn test_store_lock_timeout_surfaces() {
    let dir = TempDir::new().unwrap();
    let locks = LockManager::with_lock_dir(
        dir.path().join("locks"),
        LockOptions::new(Duration::from_millis(100), Duration::from_millis(10)),
    );
    let store = TokenStore::open(dir.path(), None, locks.clone()).unwrap();
    let mut service = TokenService::new(store, TokenCodec::hs256(b"k"), 30);

    let _held = locks.lock_named("token-store").unwrap();
    let err = service.get_token("a@example.org").unwrap_err();
    assert!(matches!(err, WsError::LockTimeout { .. }));
    assert!(err.is_recoverable());
}
