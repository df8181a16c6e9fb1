//! DS signature computation.
//!
//! The remote verifier recomputes the digest from the same salt, timestamp,
//! nonce, body, and query, so every byte here has to match it exactly: the
//! salts, the field order of the signed text, and MD5 with lowercase hex.

pub mod headers;

use chrono::Utc;
use md5::{Digest, Md5};
use rand::Rng;
use serde_json::Value;

use crate::challenges::core::Region;

pub use headers::{HeaderBuilder, HeaderError};

const DOMESTIC_SALT: &str = "xV8v4Qu54lUKrEYFZkJhB8cuOh9Asafs";
const OVERSEAS_SALT: &str = "okr4obncj8bw5a65hbnn5oo6ixjc3l9w";

const NONCE_MIN: u32 = 100_000;
const NONCE_MAX: u32 = 200_000;

pub fn region_salt(region: Region) -> &'static str {
    match region {
        Region::Domestic => DOMESTIC_SALT,
        Region::Overseas => OVERSEAS_SALT,
    }
}

/// Sorts keys by byte order and joins `key=value` pairs with `&`.
pub fn canonicalize_params<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(key, value)| (key.as_ref(), value.as_ref()))
        .collect();
    pairs.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compact JSON for a non-empty object body, empty string otherwise. The
/// returned text is both signed and sent on the wire.
pub fn body_string(body: Option<&Value>) -> String {
    match body {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()).to_string(),
        _ => String::new(),
    }
}

pub fn random_nonce() -> u32 {
    rand::thread_rng().gen_range(NONCE_MIN..=NONCE_MAX)
}

/// Builds `"<timestamp>,<nonce>,<md5 hex>"` for the given inputs.
pub fn compute_signature(
    region: Region,
    timestamp: i64,
    nonce: u32,
    body: &str,
    params: &str,
) -> String {
    let salt = region_salt(region);
    let text = format!("salt={salt}&t={timestamp}&r={nonce}&b={body}&q={params}");
    let digest = hex::encode(Md5::digest(text.as_bytes()));
    format!("{timestamp},{nonce},{digest}")
}

/// Signs with the current unix time and a fresh nonce.
pub fn sign<K, V>(region: Region, params: &[(K, V)], body: Option<&Value>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    compute_signature(
        region,
        Utc::now().timestamp(),
        random_nonce(),
        &body_string(body),
        &canonicalize_params(params),
    )
}
