//! Captcha provider integrations.
//!
//! The recovery flow hands the challenge parameters it received from the
//! platform to a [`CaptchaProvider`] and gets a validation token back. The
//! solving itself happens in a remote service; this crate only speaks its
//! protocol.

mod geetest;

pub use geetest::{GeetestAjaxProvider, extract_braced_json};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::challenges::core::{CaptchaChallenge, Region, SolvedChallenge};

/// High-level configuration that controls captcha solving behaviour.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub timeout: Duration,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Challenge handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaTask {
    pub challenge: String,
    pub gt: String,
    pub region: Region,
}

impl CaptchaTask {
    pub fn new(challenge: impl Into<String>, gt: impl Into<String>, region: Region) -> Self {
        Self {
            challenge: challenge.into(),
            gt: gt.into(),
            region,
        }
    }

    pub fn from_challenge(challenge: &CaptchaChallenge, region: Region) -> Self {
        Self::new(challenge.challenge.clone(), challenge.gt.clone(), region)
    }
}

/// Validation token produced by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaSolution {
    pub challenge: String,
    pub token: String,
}

impl CaptchaSolution {
    pub fn new(challenge: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            challenge: challenge.into(),
            token: token.into(),
        }
    }

    /// Payload accepted by the verification endpoint.
    pub fn into_solved(self) -> SolvedChallenge {
        SolvedChallenge::new(self.challenge, self.token)
    }
}

/// Common result type returned by captcha providers.
pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Shared interface implemented by captcha solving services.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult;
}

/// Errors surfaced by captcha providers.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha provider misconfigured: {0}")]
    Configuration(String),
    #[error("captcha provider request failed: {0}")]
    Provider(String),
    #[error("captcha provider returned malformed body: {0}")]
    MalformedResponse(String),
    #[error("captcha not solved: {0}")]
    Rejected(String),
    #[error("captcha solving timed out after {0:?}")]
    Timeout(Duration),
}
