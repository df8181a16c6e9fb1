//! Event hooks around note requests and risk-control recovery.
//!
//! Handlers observe activity; they cannot alter a request or its outcome.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::challenges::recovery::RecoveryStage;

/// Emitted right before a request leaves the client.
#[derive(Debug, Clone)]
pub struct PreRequestEvent {
    pub account: String,
    pub url: Url,
    pub method: Method,
    pub signed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub account: String,
    pub url: Url,
    pub method: Method,
    pub status: u16,
    pub retcode: Option<i64>,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// The platform answered with the risk-control code.
#[derive(Debug, Clone)]
pub struct RiskControlEvent {
    pub account: String,
    pub trace_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A recovery stage finished.
#[derive(Debug, Clone)]
pub struct VerificationEvent {
    pub account: String,
    pub stage: RecoveryStage,
    pub success: bool,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub account: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum NoteEvent {
    PreRequest(PreRequestEvent),
    PostResponse(PostResponseEvent),
    RiskControl(RiskControlEvent),
    Verification(VerificationEvent),
    Error(ErrorEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &NoteEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn dispatch(&self, event: NoteEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &NoteEvent) {
        match event {
            NoteEvent::PreRequest(pre) => {
                log::debug!(
                    "-> {} {} [{}] signed={}",
                    pre.method,
                    pre.url,
                    pre.account,
                    pre.signed
                );
            }
            NoteEvent::PostResponse(post) => {
                log::debug!(
                    "<- {} {} -> {} retcode={:?} ({:.2}s)",
                    post.method,
                    post.url,
                    post.status,
                    post.retcode,
                    post.latency.as_secs_f64()
                );
            }
            NoteEvent::RiskControl(risk) => {
                log::warn!(
                    "risk control for {} (trace {})",
                    risk.account,
                    risk.trace_id.as_deref().unwrap_or("-")
                );
            }
            NoteEvent::Verification(step) => {
                log::info!(
                    "verification {:?} for {} success={}",
                    step.stage,
                    step.account,
                    step.success
                );
            }
            NoteEvent::Error(error) => {
                log::warn!("warning {} -> {}", error.account, error.error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &NoteEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher.dispatch(NoteEvent::Error(ErrorEvent {
            account: "10001".into(),
            error: "timeout".into(),
            timestamp: Utc::now(),
        }));
        dispatcher.dispatch(NoteEvent::RiskControl(RiskControlEvent {
            account: "10001".into(),
            trace_id: None,
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 2);
        assert_eq!(dispatcher.handler_count(), 2);
    }
}
