//! Thin collaborators around the stores: sessions, requests, responses and
//! a worker that routes a request to an operation.

pub mod request;
pub mod response;
pub mod session;
pub mod state;
pub mod worker;

pub use request::{ParamMap, ServiceRequest};
pub use response::{RenderedResponse, ReturnFormat, ServiceResponse};
pub use session::{SessionFactory, DEFAULT_SERVICE_USER};
pub use state::{FileItem, SessionState};
pub use worker::{OpenSession, Operation, ServiceWorker};
