//! Note data and the services around it.
//!
//! Snapshot types returned by the note endpoint, their local projection, and
//! the event hooks fired while fetching them.

pub mod events;
pub mod projection;
pub mod snapshot;

pub use events::{
    ErrorEvent, EventDispatcher, EventHandler, LoggingHandler, NoteEvent, PostResponseEvent,
    PreRequestEvent, RiskControlEvent, VerificationEvent,
};
pub use projection::{
    RecoveryClock, RecoveryDay, STAMINA_REGEN_SECS, project, recovery_clock, split_duration,
};
pub use snapshot::{DailyNote, Expedition, ExpeditionStatus, ResourceSnapshot};
