//! Device identity and per-account challenge state.
//!
//! Maintains the long-lived emulated device id, per-account fingerprints, the
//! fingerprint refresh flag, trace ids, and single-use challenge tokens on top
//! of an injected [`KeyValueStore`].

pub mod fingerprint;
pub mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use fingerprint::{DeviceTelemetry, FingerprintIssuer};
pub use store::{KeyValueStore, MemoryStore, RedbStore, StoreError};

/// Epoch marker shipped with the current build. Changing it forces every
/// client to mint a fresh device id.
pub const DEFAULT_DEVICE_EPOCH: &str = "hTY1wqyfz6vqBmd";

const DEVICE_ID_KEY: &str = "device_id";
const DEVICE_EPOCH_KEY: &str = "device_id_epoch";

fn fingerprint_key(account: &str) -> String {
    format!("device_fp:{account}")
}

fn refresh_key(account: &str) -> String {
    format!("device_fp_refresh:{account}")
}

fn trace_key(account: &str) -> String {
    format!("trace_id:{account}")
}

fn challenge_key(account: &str) -> String {
    format!("challenge:{account}")
}

/// Server-issued (or locally synthesised) fingerprint bound to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub seed_id: String,
    pub seed_time: String,
    pub device_fp: String,
}

impl DeviceFingerprint {
    /// Cookie prefix the platform expects in front of the session cookie.
    pub fn cookie_with(&self, session_cookie: &str) -> String {
        format!(
            "DEVICEFP_SEED_ID={};DEVICEFP_SEED_TIME={};DEVICEFP={};{};",
            self.seed_id, self.seed_time, self.device_fp, session_cookie
        )
    }
}

/// Typed view over the persisted identity keys.
#[derive(Clone)]
pub struct DeviceIdentityStore {
    store: Arc<dyn KeyValueStore>,
    epoch_marker: String,
}

impl DeviceIdentityStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_epoch(store, DEFAULT_DEVICE_EPOCH)
    }

    pub fn with_epoch(store: Arc<dyn KeyValueStore>, epoch_marker: impl Into<String>) -> Self {
        Self {
            store,
            epoch_marker: epoch_marker.into(),
        }
    }

    /// Returns the persisted device id, minting a new one when it is missing
    /// or was produced under a different epoch marker.
    pub fn ensure_device_id(&self) -> Result<String, StoreError> {
        let current = self.store.get(DEVICE_ID_KEY)?.filter(|id| !id.is_empty());
        let epoch = self.store.get(DEVICE_EPOCH_KEY)?;

        if let Some(id) = current
            && epoch.as_deref() == Some(self.epoch_marker.as_str())
        {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        self.store.set(DEVICE_ID_KEY, &id)?;
        self.store.set(DEVICE_EPOCH_KEY, &self.epoch_marker)?;
        log::info!("minted new device id for epoch {}", self.epoch_marker);
        Ok(id)
    }

    pub fn fingerprint(&self, account: &str) -> Result<Option<DeviceFingerprint>, StoreError> {
        let key = fingerprint_key(account);
        match self.store.get(&key)? {
            Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { key, source }),
            _ => Ok(None),
        }
    }

    pub fn save_fingerprint(
        &self,
        account: &str,
        fingerprint: &DeviceFingerprint,
    ) -> Result<(), StoreError> {
        let key = fingerprint_key(account);
        let raw = serde_json::to_string(fingerprint)
            .map_err(|source| StoreError::Corrupt { key: key.clone(), source })?;
        self.store.set(&key, &raw)
    }

    pub fn refresh_requested(&self, account: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(&refresh_key(account))?.as_deref() == Some("true"))
    }

    /// Flags the account so the next fingerprint lookup goes back to the remote.
    pub fn request_fingerprint_refresh(&self, account: &str) -> Result<(), StoreError> {
        self.store.set(&refresh_key(account), "true")
    }

    pub fn clear_fingerprint_refresh(&self, account: &str) -> Result<(), StoreError> {
        self.store.delete(&refresh_key(account))
    }

    pub fn trace_id(&self, account: &str) -> Result<Option<String>, StoreError> {
        Ok(self.store.get(&trace_key(account))?.filter(|id| !id.is_empty()))
    }

    /// Stores the trace id of the latest response; `None` clears it.
    pub fn record_trace_id(&self, account: &str, trace_id: Option<&str>) -> Result<(), StoreError> {
        match trace_id.filter(|id| !id.is_empty()) {
            Some(id) => self.store.set(&trace_key(account), id),
            None => self.store.delete(&trace_key(account)),
        }
    }

    pub fn store_challenge_token(&self, account: &str, token: &str) -> Result<(), StoreError> {
        self.store.set(&challenge_key(account), token)
    }

    /// Reads and clears the challenge token so it rides on exactly one request.
    pub fn take_challenge_token(&self, account: &str) -> Result<Option<String>, StoreError> {
        let key = challenge_key(account);
        let token = self.store.get(&key)?.filter(|token| !token.is_empty());
        if token.is_some() {
            self.store.delete(&key)?;
        }
        Ok(token)
    }

    pub fn has_challenge_token(&self, account: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get(&challenge_key(account))?
            .is_some_and(|token| !token.is_empty()))
    }
}

impl std::fmt::Debug for DeviceIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentityStore")
            .field("epoch_marker", &self.epoch_marker)
            .finish_non_exhaustive()
    }
}
