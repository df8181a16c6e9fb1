//! Core types and the transport seam shared by signing, identity, and recovery.

pub mod reqwest_client;
pub mod transport;
pub mod types;

pub use reqwest_client::ReqwestTransport;
pub use transport::{
    HttpTransport, TransportError, TransportResponse, execute_with_deadline,
};
pub use types::{
    AccountContext, ApiEnvelope, CaptchaChallenge, GameRole, RISK_CONTROL_RETCODE, Region,
    ServerRegion, SignedRequest, SolvedChallenge,
};
