use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::challenges::core::Region;
use crate::identity::{DEFAULT_DEVICE_EPOCH, DeviceTelemetry};

const APP_VERSION_CN: &str = "2.75.1";
const APP_VERSION_OS: &str = "2.22.0";

static DOMESTIC_ENDPOINTS: Lazy<Endpoints> = Lazy::new(|| Endpoints {
    roles: parse_static(
        "https://api-takumi.mihoyo.com/binding/api/getUserGameRolesByCookieToken?game_biz=hkrpg_cn",
    ),
    note: parse_static("https://api-takumi-record.mihoyo.com/game_record/app/hkrpg/api/note"),
    create_verification: parse_static(
        "https://api-takumi-record.mihoyo.com/game_record/app/card/wapi/createVerification",
    ),
    verify_verification: parse_static(
        "https://api-takumi-record.mihoyo.com/game_record/app/card/wapi/verifyVerification",
    ),
});

static OVERSEAS_ENDPOINTS: Lazy<Endpoints> = Lazy::new(|| Endpoints {
    roles: parse_static(
        "https://api-os-takumi.mihoyo.com/binding/api/getUserGameRolesByLtoken?game_biz=hkrpg_global",
    ),
    note: parse_static("https://bbs-api-os.hoyolab.com/game_record/app/hkrpg/api/note"),
    // Verification always goes through the record host, overseas included.
    create_verification: parse_static(
        "https://api-takumi-record.mihoyo.com/game_record/app/card/wapi/createVerification",
    ),
    verify_verification: parse_static(
        "https://api-takumi-record.mihoyo.com/game_record/app/card/wapi/verifyVerification",
    ),
});

static FINGERPRINT_URL: Lazy<Url> =
    Lazy::new(|| parse_static("https://public-data-api.mihoyo.com/device-fp/api/getFp"));

static CAPTCHA_URL: Lazy<Url> = Lazy::new(|| {
    parse_static("https://apiv6.geetest.com/ajax.php?pt=3&client_type=web_mobile&lang=zh-cn")
});

fn parse_static(raw: &str) -> Url {
    Url::parse(raw).expect("invalid built-in endpoint url")
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileMissing { path: PathBuf },
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Remote endpoints for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub roles: Url,
    pub note: Url,
    pub create_verification: Url,
    pub verify_verification: Url,
}

/// Header template plus endpoints for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionProfile {
    pub headers: BTreeMap<String, String>,
    pub endpoints: Endpoints,
}

impl RegionProfile {
    pub fn domestic() -> Self {
        let headers = [
            ("x-rpc-app_version", APP_VERSION_CN.to_string()),
            (
                "User-Agent",
                format!(
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) miHoYoBBS/{APP_VERSION_CN}"
                ),
            ),
            ("x-rpc-client_type", "5".into()),
            ("x-rpc-sys_version", "17.1".into()),
            ("x-rpc-tool_version", "v5.0.1-ys".into()),
            ("x-rpc-device_name", "iPhone".into()),
            ("Origin", "https://webstatic.mihoyo.com".into()),
            ("X-Requested-With", "com.mihoyo.hyperion".into()),
            ("x-rpc-page", "v5.0.1-ys_#/ys/daily".into()),
            ("x-rpc-language", "zh-cn".into()),
            ("Referer", "https://webstatic.mihoyo.com/".into()),
            ("sec-fetch-dest", "empty".into()),
            ("sec-fetch-site", "same-site".into()),
        ];
        Self {
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            endpoints: DOMESTIC_ENDPOINTS.clone(),
        }
    }

    pub fn overseas() -> Self {
        let headers = [
            ("x-rpc-app_version", APP_VERSION_OS.to_string()),
            (
                "User-Agent",
                format!(
                    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_1_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) miHoYoBBSOversea/{APP_VERSION_OS}"
                ),
            ),
            ("x-rpc-client_type", "2".into()),
            ("Origin", "https://act.hoyolab.com".into()),
            ("X-Requested-With", "com.mihoyo.hoyolab".into()),
            ("Referer", "https://act.hoyolab.com".into()),
        ];
        Self {
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            endpoints: OVERSEAS_ENDPOINTS.clone(),
        }
    }
}

/// Top-level client configuration. Every field has a working default, so a
/// JSON file only needs to list what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub domestic: RegionProfile,
    pub overseas: RegionProfile,
    pub fingerprint_url: Url,
    pub captcha_url: Url,
    /// Value of `x-rpc-challenge_path` on verification requests.
    pub challenge_path: String,
    pub challenge_game: String,
    pub telemetry: DeviceTelemetry,
    pub device_epoch: String,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            domestic: RegionProfile::domestic(),
            overseas: RegionProfile::overseas(),
            fingerprint_url: FINGERPRINT_URL.clone(),
            captcha_url: CAPTCHA_URL.clone(),
            challenge_path: DOMESTIC_ENDPOINTS.note.to_string(),
            challenge_game: "6".into(),
            telemetry: DeviceTelemetry::default(),
            device_epoch: DEFAULT_DEVICE_EPOCH.into(),
            request_timeout_secs: 15,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ConfigError::FileMissing {
                path: path.to_path_buf(),
            },
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.device_epoch.is_empty() {
            return Err(ConfigError::Invalid("device_epoch must not be empty".into()));
        }
        Ok(())
    }

    pub fn profile(&self, region: Region) -> &RegionProfile {
        match region {
            Region::Domestic => &self.domestic,
            Region::Overseas => &self.overseas,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
