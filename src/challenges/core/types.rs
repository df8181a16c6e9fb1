//! Core data structures shared by the signer, identity store, and recovery layers.

use std::fmt;

use http::{HeaderMap, Method};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use url::Url;

/// Response code returned when the remote suspects automated access.
pub const RISK_CONTROL_RETCODE: i64 = 1034;

/// Deployment family. Salts, header templates, and endpoints differ per region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Mainland deployment (`cn`).
    Domestic,
    /// Global deployment (`os`).
    Overseas,
}

impl Region {
    pub fn is_domestic(self) -> bool {
        matches!(self, Region::Domestic)
    }
}

/// Game server shard a role lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRegion {
    #[serde(rename = "prod_gf_cn")]
    CnOfficial,
    #[serde(rename = "prod_qd_cn")]
    CnChannel,
    #[serde(rename = "prod_official_usa")]
    America,
    #[serde(rename = "prod_official_euro")]
    Europe,
    #[serde(rename = "prod_official_asia")]
    Asia,
    #[serde(rename = "prod_official_cht")]
    Tw,
}

impl ServerRegion {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerRegion::CnOfficial => "prod_gf_cn",
            ServerRegion::CnChannel => "prod_qd_cn",
            ServerRegion::America => "prod_official_usa",
            ServerRegion::Europe => "prod_official_euro",
            ServerRegion::Asia => "prod_official_asia",
            ServerRegion::Tw => "prod_official_cht",
        }
    }

    pub fn region(self) -> Region {
        match self {
            ServerRegion::CnOfficial | ServerRegion::CnChannel => Region::Domestic,
            _ => Region::Overseas,
        }
    }
}

impl fmt::Display for ServerRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to issue requests on behalf of one game role.
#[derive(Debug, Clone)]
pub struct AccountContext {
    pub role_id: String,
    pub server: ServerRegion,
    pub cookie: String,
}

impl AccountContext {
    pub fn new(role_id: impl Into<String>, server: ServerRegion, cookie: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            server,
            cookie: cookie.into(),
        }
    }

    pub fn region(&self) -> Region {
        self.server.region()
    }
}

/// Fully prepared request. Built fresh for every call and never reused.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl SignedRequest {
    pub fn get(url: Url, headers: HeaderMap) -> Self {
        Self {
            method: Method::GET,
            url,
            headers,
            body: None,
        }
    }

    pub fn post(url: Url, headers: HeaderMap, body: String) -> Self {
        Self {
            method: Method::POST,
            url,
            headers,
            body: Some(body),
        }
    }
}

/// Standard `{retcode, message, data}` envelope used by every platform endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub retcode: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ApiEnvelope {
    pub fn is_success(&self) -> bool {
        self.retcode == 0
    }

    /// Decode the `data` member into a typed payload.
    pub fn decode_data<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.unwrap_or(serde_json::Value::Null))
    }
}

/// Role entry returned by the role-list lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRole {
    pub region: ServerRegion,
    #[serde(default)]
    pub region_name: String,
    pub game_uid: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub level: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RoleList {
    #[serde(default)]
    pub list: Vec<GameRole>,
}

/// Challenge descriptor handed out by the verification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    /// Challenge id.
    pub challenge: String,
    /// Captcha parameters (`gt`) needed by the solver.
    pub gt: String,
    #[serde(default, deserialize_with = "bool_or_number")]
    pub new_captcha: bool,
}

/// Solved challenge payload posted back for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvedChallenge {
    pub geetest_challenge: String,
    pub geetest_seccode: String,
    pub geetest_validate: String,
}

impl SolvedChallenge {
    pub fn new(challenge: impl Into<String>, validate: impl Into<String>) -> Self {
        let validate = validate.into();
        Self {
            geetest_challenge: challenge.into(),
            geetest_seccode: format!("{validate}|jordan"),
            geetest_validate: validate,
        }
    }
}

fn bool_or_number<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(flag) => Ok(flag),
        serde_json::Value::Number(num) => Ok(num.as_f64().is_some_and(|n| n != 0.0)),
        serde_json::Value::Null => Ok(false),
        other => Err(de::Error::custom(format!("expected bool or number, got {other}"))),
    }
}
