//! Remote device-fingerprint issuance with a local fallback.
//!
//! The platform binds a fingerprint to a synthesised telemetry profile. When
//! issuance fails the issuer mints a local fingerprint instead: the server
//! still accepts it, it just raises the odds of a later risk-control check.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use super::{DeviceFingerprint, StoreError};
use crate::challenges::core::{
    ApiEnvelope, HttpTransport, Region, SignedRequest, TransportError, execute_with_deadline,
};
use crate::signing::{HeaderBuilder, HeaderError, body_string, headers::insert_header};

const FINGERPRINT_OK: i64 = 200;
const SYNTHETIC_FP_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Static device telemetry sent with fingerprint requests. The values only
/// need to look plausible to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceTelemetry {
    pub is_sim_inserted: String,
    pub proxy_status: String,
    pub ram_capacity: String,
    pub is_push_enabled: String,
    pub magnetometer: String,
    pub accelerometer: String,
    pub screen_size: String,
    pub battery_status: String,
    pub rom_capacity: String,
    pub network_type: String,
    pub has_vpn: String,
    pub rom_remain: String,
    pub vendor: String,
    pub package_name: String,
    pub device_name: String,
    pub os_version: String,
    pub cpu_cores: String,
    pub gyroscope: String,
    pub is_jail_break: String,
    pub package_version: String,
    pub app_memory: String,
    pub ram_remain: String,
    pub app_update_time_diff: String,
    pub cpu_type: String,
    pub screen_brightness: String,
    pub charge_status: String,
    pub build_time: String,
    pub model: String,
}

impl Default for DeviceTelemetry {
    fn default() -> Self {
        Self {
            is_sim_inserted: "1".into(),
            proxy_status: "1".into(),
            ram_capacity: "5665".into(),
            is_push_enabled: "0".into(),
            magnetometer: "640.353210x-105.483749x-192.943878".into(),
            accelerometer: "0.033539x-0.684265x-0.757690".into(),
            screen_size: "393×852".into(),
            battery_status: "100".into(),
            rom_capacity: "242989".into(),
            network_type: "5G".into(),
            has_vpn: "1".into(),
            rom_remain: "20617".into(),
            vendor: "--".into(),
            package_name: "com.miHoYo.mhybbs".into(),
            device_name: "iPhone".into(),
            os_version: "18.0".into(),
            cpu_cores: "6".into(),
            gyroscope: "-0.097501x0.010854x0.020438".into(),
            is_jail_break: "0".into(),
            package_version: "2.29.0".into(),
            app_memory: "120".into(),
            ram_remain: "104".into(),
            app_update_time_diff: "1725558423064".into(),
            cpu_type: "CPU_TYPE_ARM64".into(),
            screen_brightness: "0.600".into(),
            charge_status: "3".into(),
            build_time: "1725149453887".into(),
            model: "iPhone15,2".into(),
        }
    }
}

impl DeviceTelemetry {
    /// JSON text for the `ext_fields` member, with the per-request values filled in.
    pub fn ext_fields(&self, now_ms: i64) -> String {
        let mut fields = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        fields.insert(
            "appInstallTimeDiff".into(),
            Value::String((now_ms - 100_000).to_string()),
        );
        fields.insert("IDFV".into(), Value::String(Uuid::new_v4().to_string()));
        Value::Object(fields).to_string()
    }
}

/// Random lowercase hex string.
pub fn generate_seed(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| HEX_CHARS[rng.gen_range(0..HEX_CHARS.len())] as char)
        .collect()
}

#[derive(Debug, Error)]
enum IssueFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("header construction failed: {0}")]
    Header(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("fingerprint rejected (code {code}): {message}")]
    Rejected { code: i64, message: String },
}

impl From<HeaderError> for IssueFailure {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::Store(store) => IssueFailure::Store(store),
            other => IssueFailure::Header(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FingerprintData {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    device_fp: String,
}

/// Issues and caches per-account fingerprints.
#[derive(Clone)]
pub struct FingerprintIssuer {
    transport: Arc<dyn HttpTransport>,
    headers: HeaderBuilder,
    endpoint: Url,
    telemetry: DeviceTelemetry,
    deadline: Duration,
}

impl FingerprintIssuer {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        headers: HeaderBuilder,
        endpoint: Url,
        telemetry: DeviceTelemetry,
        deadline: Duration,
    ) -> Self {
        Self {
            transport,
            headers,
            endpoint,
            telemetry,
            deadline,
        }
    }

    /// Returns the cached fingerprint unless it is missing, flagged for
    /// refresh, or `force_refresh` is set. Remote failures degrade to a
    /// synthesised fingerprint; only storage failures are returned.
    pub async fn get_or_refresh(
        &self,
        account: &str,
        session_cookie: &str,
        force_refresh: bool,
    ) -> Result<DeviceFingerprint, StoreError> {
        let identity = self.headers.identity();
        let cached = identity.fingerprint(account)?;
        let flagged = identity.refresh_requested(account)?;

        if let Some(fingerprint) = cached.as_ref()
            && !force_refresh
            && !flagged
        {
            return Ok(fingerprint.clone());
        }

        let seed_id = Uuid::new_v4().to_string();
        let seed_time = Utc::now().timestamp_millis().to_string();

        let issued = self
            .issue(cached.as_ref(), session_cookie, &seed_id, &seed_time)
            .await;

        let fingerprint = match issued {
            Ok(device_fp) => {
                let fingerprint = DeviceFingerprint {
                    seed_id,
                    seed_time,
                    device_fp,
                };
                identity.save_fingerprint(account, &fingerprint)?;
                identity.clear_fingerprint_refresh(account)?;
                log::debug!("issued device fingerprint for account {account}");
                return Ok(fingerprint);
            }
            Err(IssueFailure::Store(err)) => return Err(err),
            Err(reason) => {
                log::warn!(
                    "fingerprint issuance failed for account {account}, using synthetic fingerprint: {reason}"
                );
                DeviceFingerprint {
                    seed_id,
                    seed_time,
                    device_fp: generate_seed(SYNTHETIC_FP_LEN),
                }
            }
        };

        identity.save_fingerprint(account, &fingerprint)?;
        Ok(fingerprint)
    }

    async fn issue(
        &self,
        previous: Option<&DeviceFingerprint>,
        session_cookie: &str,
        seed_id: &str,
        seed_time: &str,
    ) -> Result<String, IssueFailure> {
        let device_id = self.headers.identity().ensure_device_id()?;
        let body = json!({
            "seed_id": seed_id,
            "device_id": generate_seed(16),
            "bbs_device_id": device_id,
            "platform": "1",
            "seed_time": seed_time,
            "ext_fields": self.telemetry.ext_fields(Utc::now().timestamp_millis()),
            "app_name": "bbs_cn",
            "device_fp": generate_seed(SYNTHETIC_FP_LEN),
        });

        let params: [(&str, &str); 0] = [];
        let mut headers = self
            .headers
            .build_headers(Region::Domestic, &params, Some(&body), false)?;

        let cookie = match previous {
            Some(previous) => previous.cookie_with(session_cookie),
            None => format!(
                "DEVICEFP_SEED_ID=;DEVICEFP_SEED_TIME=;DEVICEFP=;{session_cookie};"
            ),
        };
        insert_header(&mut headers, "cookie", &cookie)?;

        let request = SignedRequest::post(self.endpoint.clone(), headers, body_string(Some(&body)));
        let response =
            execute_with_deadline(self.transport.as_ref(), &request, self.deadline).await?;
        let envelope: ApiEnvelope = response.json()?;
        let data: FingerprintData = envelope
            .decode_data()
            .map_err(|err| TransportError::Decode(err.to_string()))?;

        if data.code != FINGERPRINT_OK || data.device_fp.is_empty() {
            return Err(IssueFailure::Rejected {
                code: data.code,
                message: data.msg,
            });
        }
        Ok(data.device_fp)
    }
}

impl std::fmt::Debug for FingerprintIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintIssuer")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}
