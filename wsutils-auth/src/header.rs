//! Authorization header parsing

use crate::error::AuthError;
use crate::report::BearerReport;

const BEARER: &str = "bearer";

/// Token from a `Bearer <token>` header value
pub fn extract_bearer(header: &str) -> Result<String, AuthError> {
    let parts: Vec<&str> = header.split_whitespace().collect();
    match parts.as_slice() {
        [] => Err(AuthError::malformed("API access token not found")),
        [scheme, ..] if !scheme.eq_ignore_ascii_case(BEARER) => Err(AuthError::malformed(
            "Authorization header must start with Bearer",
        )),
        [_] => Err(AuthError::malformed("API access token not found")),
        [_, token] => Ok((*token).to_string()),
        _ => Err(AuthError::malformed(
            "Authorization header must be Bearer token",
        )),
    }
}

/// [`extract_bearer`] folded into a report
pub fn parse_auth(header: &str) -> BearerReport {
    extract_bearer(header).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthErrorKind;

    #[test]
    fn test_bearer_shapes() {
        assert_eq!(extract_bearer("bearer abc").unwrap(), "abc");
        assert_eq!(extract_bearer("Bearer   abc ").unwrap(), "abc");
        assert_eq!(extract_bearer("BEARER abc").unwrap(), "abc");

        for bad in ["", "   ", "bearer", "nonbearer x", "bearer a b", "Basic dXNlcg=="] {
            let err = extract_bearer(bad).unwrap_err();
            assert_eq!(err.kind, AuthErrorKind::MalformedAuthorization, "{bad:?}");
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            extract_bearer("token x").unwrap_err().message,
            "Authorization header must start with Bearer"
        );
        assert_eq!(
            extract_bearer("bearer").unwrap_err().message,
            "API access token not found"
        );
        assert_eq!(
            extract_bearer("bearer a b").unwrap_err().message,
            "Authorization header must be Bearer token"
        );
    }
}
