//! # hoyo-note-rs
//!
//! Signed access to the game-record "daily note" API of the domestic and
//! overseas HoYoLAB deployments.
//!
//! The crate covers the parts of the protocol that are easy to get wrong:
//!
//! - DS request signatures (salted MD5 over timestamp, nonce, body, query)
//! - Emulated device identity and per-account device fingerprints
//! - Risk-control (`retcode 1034`) recovery through a captcha challenge
//! - Local projection of stamina and expedition timers between fetches
//!
//! ## Example
//!
//! ```no_run
//! use hoyo_note_rs::{AccountContext, NoteClient, RequestOutcome, ServerRegion};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NoteClient::builder()
//!         .with_store_path("identity.redb")
//!         .build()?;
//!     let account = AccountContext::new("100000001", ServerRegion::CnOfficial, "cookie_token=...");
//!
//!     match client.fetch_with_recovery(&account).await {
//!         RequestOutcome::Success(snapshot) => {
//!             let now = client.project_now(&snapshot);
//!             println!("stamina {}/{}", now.note.current_stamina, now.note.max_stamina);
//!         }
//!         other => println!("note unavailable: {:?}", other.into_result().err()),
//!     }
//!     Ok(())
//! }
//! ```

mod client;

pub mod challenges;
pub mod config;
pub mod external_deps;
pub mod identity;
pub mod modules;
pub mod signing;

pub use crate::client::{NoteClient, NoteClientBuilder, NoteClientError, NoteClientResult};

pub use crate::challenges::core::{
    AccountContext,
    ApiEnvelope,
    CaptchaChallenge,
    GameRole,
    HttpTransport,
    RISK_CONTROL_RETCODE,
    Region,
    ReqwestTransport,
    ServerRegion,
    SignedRequest,
    SolvedChallenge,
    TransportError,
    TransportResponse,
};

pub use crate::challenges::outcome::{CaptchaFailure, OutcomeError, RequestOutcome};

pub use crate::challenges::recovery::{RecoveryStage, RiskControlOrchestrator, StageResult};

pub use crate::config::{ClientConfig, ConfigError, Endpoints, RegionProfile};

pub use crate::external_deps::captcha::{
    CaptchaConfig,
    CaptchaError,
    CaptchaProvider,
    CaptchaResult,
    CaptchaSolution,
    CaptchaTask,
    GeetestAjaxProvider,
};

pub use crate::identity::{
    DeviceFingerprint,
    DeviceIdentityStore,
    DeviceTelemetry,
    FingerprintIssuer,
    KeyValueStore,
    MemoryStore,
    RedbStore,
    StoreError,
};

pub use crate::modules::{
    DailyNote,
    ErrorEvent,
    EventDispatcher,
    EventHandler,
    Expedition,
    ExpeditionStatus,
    LoggingHandler,
    NoteEvent,
    PostResponseEvent,
    PreRequestEvent,
    RecoveryClock,
    RecoveryDay,
    ResourceSnapshot,
    RiskControlEvent,
    VerificationEvent,
    project,
    recovery_clock,
    split_duration,
};

pub use crate::signing::{HeaderBuilder, HeaderError, compute_signature, sign};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
