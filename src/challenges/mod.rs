// Signed request plumbing and the risk-control (captcha) recovery flow.

pub mod core;
pub mod outcome;
pub mod recovery;
