//! Local time extrapolation of a fetched snapshot.
//!
//! Keeps displayed counters current between fetches without touching the
//! network. Always project the fetched snapshot, not an earlier projection:
//! `captured_at` is carried over unchanged, so projecting a projection would
//! count the same elapsed time twice.

use chrono::{DateTime, TimeZone, Timelike, Utc};

use crate::modules::snapshot::{ExpeditionStatus, ResourceSnapshot};

/// Seconds per regenerated stamina point.
pub const STAMINA_REGEN_SECS: u64 = 360;

/// Returns a new snapshot advanced to `now`. The input is never modified.
pub fn project(snapshot: &ResourceSnapshot, now: DateTime<Utc>) -> ResourceSnapshot {
    let elapsed_secs = (now - snapshot.captured_at).num_seconds().max(0);
    let elapsed = elapsed_secs as u64;
    let mut projected = snapshot.clone();
    let note = &mut projected.note;

    let regenerated = elapsed / STAMINA_REGEN_SECS;
    let stamina = u64::from(note.current_stamina).saturating_add(regenerated);
    note.current_stamina = stamina.min(u64::from(note.max_stamina)) as u32;

    // Unlike expedition timers this countdown is not clamped at zero.
    note.stamina_recover_time = note.stamina_recover_time.saturating_sub(elapsed_secs);

    for expedition in note
        .expeditions
        .iter_mut()
        .filter(|expedition| expedition.status == ExpeditionStatus::Ongoing)
    {
        expedition.remaining_time = expedition.remaining_time.saturating_sub(elapsed);
        if expedition.remaining_time == 0 {
            expedition.status = ExpeditionStatus::Finished;
        }
    }

    projected
}

/// Whole hours and remaining minutes in a countdown.
pub fn split_duration(seconds: i64) -> (i64, i64) {
    (seconds / 3600, (seconds % 3600) / 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDay {
    Today,
    Tomorrow,
}

/// Wall-clock time at which a countdown completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryClock {
    pub day: RecoveryDay,
    pub hour: u32,
    pub minute: u32,
}

impl RecoveryClock {
    /// `HH:MM`, zero padded.
    pub fn label(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

/// Where `seconds` from `now` lands, in the time zone of `now`. Anything past
/// the coming midnight counts as tomorrow.
pub fn recovery_clock<Tz: TimeZone>(now: DateTime<Tz>, seconds: i64) -> RecoveryClock {
    let recovery = now.clone() + chrono::Duration::seconds(seconds);
    let day = if recovery.date_naive() <= now.date_naive() {
        RecoveryDay::Today
    } else {
        RecoveryDay::Tomorrow
    };
    RecoveryClock {
        day,
        hour: recovery.hour(),
        minute: recovery.minute(),
    }
}
