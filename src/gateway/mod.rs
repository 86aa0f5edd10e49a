pub mod protocol;
pub mod server;
pub mod service;

pub use protocol::{
    ApplyDiffRequest, ApplyDiffResponse, ErrorBody, ExecRequest, ExecResponse, HealthResponse,
    OpenFileRequest, OpenFileResponse, ServiceInfo, WriteFileRequest, WriteFileResponse,
};
pub use server::{router, serve, serve_on, shutdown_signal};
pub use service::{DEFAULT_ACTOR, Gateway, RequestContext};
