//! Integrations that rely on third-party services.
//!
//! Currently the captcha solving endpoint used during risk-control recovery.

pub mod captcha;

pub use captcha::GeetestAjaxProvider;
