//! Tagged outcome returned by every remote primitive.
//!
//! Risk control is its own variant, never folded into a generic failure, so
//! callers always branch on it explicitly.

use thiserror::Error;

use crate::challenges::core::TransportError;
use crate::external_deps::captcha::CaptchaError;
use crate::identity::StoreError;
use crate::signing::HeaderError;

/// Result of a remote primitive.
#[derive(Debug)]
pub enum RequestOutcome<T> {
    Success(T),
    /// The remote answered with the risk-control code; run the challenge flow.
    RiskControl,
    /// Non-zero response code other than risk control.
    ProtocolError { code: i64, message: String },
    /// Transport, deadline, or decoding failure.
    NetworkError(TransportError),
    CaptchaFailure(CaptchaFailure),
    StorageError(StoreError),
}

impl<T> RequestOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success(_))
    }

    pub fn is_risk_control(&self) -> bool {
        matches!(self, RequestOutcome::RiskControl)
    }

    pub fn success(self) -> Option<T> {
        match self {
            RequestOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> RequestOutcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self.into_result() {
            Ok(value) => RequestOutcome::Success(f(value)),
            Err(err) => err.into(),
        }
    }

    pub fn into_result(self) -> Result<T, OutcomeError> {
        match self {
            RequestOutcome::Success(value) => Ok(value),
            RequestOutcome::RiskControl => Err(OutcomeError::RiskControl),
            RequestOutcome::ProtocolError { code, message } => {
                Err(OutcomeError::Protocol { code, message })
            }
            RequestOutcome::NetworkError(err) => Err(OutcomeError::Network(err)),
            RequestOutcome::CaptchaFailure(err) => Err(OutcomeError::Captcha(err)),
            RequestOutcome::StorageError(err) => Err(OutcomeError::Storage(err)),
        }
    }
}

impl<T> From<Result<T, OutcomeError>> for RequestOutcome<T> {
    fn from(result: Result<T, OutcomeError>) -> Self {
        match result {
            Ok(value) => RequestOutcome::Success(value),
            Err(err) => err.into(),
        }
    }
}

impl<T> From<OutcomeError> for RequestOutcome<T> {
    fn from(err: OutcomeError) -> Self {
        match err {
            OutcomeError::RiskControl => RequestOutcome::RiskControl,
            OutcomeError::Protocol { code, message } => {
                RequestOutcome::ProtocolError { code, message }
            }
            OutcomeError::Network(err) => RequestOutcome::NetworkError(err),
            OutcomeError::Captcha(err) => RequestOutcome::CaptchaFailure(err),
            OutcomeError::Storage(err) => RequestOutcome::StorageError(err),
        }
    }
}

/// `Result` form of the non-success variants, for `?`-style composition.
#[derive(Debug, Error)]
pub enum OutcomeError {
    #[error("risk control triggered")]
    RiskControl,
    #[error("remote returned code {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("network error: {0}")]
    Network(#[from] TransportError),
    #[error("captcha failure: {0}")]
    Captcha(#[from] CaptchaFailure),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<HeaderError> for OutcomeError {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::Store(store) => OutcomeError::Storage(store),
            HeaderError::InvalidHeader(name) => {
                OutcomeError::Network(TransportError::InvalidHeader(name))
            }
        }
    }
}

/// Failures inside the challenge create / solve / verify sequence.
#[derive(Debug, Error)]
pub enum CaptchaFailure {
    #[error("verification creation rejected (code {code}): {message}")]
    CreateRejected { code: i64, message: String },
    #[error("captcha solve failed: {0}")]
    Solve(#[source] CaptchaError),
    #[error("verification rejected (code {code}): {message}")]
    VerifyRejected { code: i64, message: String },
}
