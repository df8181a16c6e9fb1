//! Region-specific header assembly.
//!
//! Starts from the configured template, adds the DS signature when asked to,
//! and always adds the uppercase device id. Cookie, fingerprint, and challenge
//! headers are endpoint-specific and layered on by the caller.

use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;

use crate::challenges::core::Region;
use crate::config::ClientConfig;
use crate::identity::{DeviceIdentityStore, StoreError};

pub const DS_HEADER: &str = "ds";
pub const DEVICE_ID_HEADER: &str = "x-rpc-device_id";

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
    #[error("device identity unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Assembles signed header sets for both deployments.
#[derive(Debug, Clone)]
pub struct HeaderBuilder {
    identity: DeviceIdentityStore,
    domestic: HeaderMap,
    overseas: HeaderMap,
}

impl HeaderBuilder {
    /// Converts the configured templates once; invalid names or values fail here
    /// rather than on every request.
    pub fn new(identity: DeviceIdentityStore, config: &ClientConfig) -> Result<Self, HeaderError> {
        Ok(Self {
            identity,
            domestic: template_headers(config, Region::Domestic)?,
            overseas: template_headers(config, Region::Overseas)?,
        })
    }

    pub fn identity(&self) -> &DeviceIdentityStore {
        &self.identity
    }

    pub fn build_headers<K, V>(
        &self,
        region: Region,
        params: &[(K, V)],
        body: Option<&Value>,
        include_signature: bool,
    ) -> Result<HeaderMap, HeaderError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = match region {
            Region::Domestic => self.domestic.clone(),
            Region::Overseas => self.overseas.clone(),
        };

        if include_signature {
            let ds = super::sign(region, params, body);
            insert_header(&mut headers, DS_HEADER, &ds)?;
        }

        let device_id = self.identity.ensure_device_id()?.to_uppercase();
        insert_header(&mut headers, DEVICE_ID_HEADER, &device_id)?;
        Ok(headers)
    }
}

/// Inserts a header, replacing any previous value under the same name.
pub fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), HeaderError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HeaderError::InvalidHeader(name.to_string()))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|_| HeaderError::InvalidHeader(name.to_string()))?;
    headers.insert(header_name, header_value);
    Ok(())
}

fn template_headers(config: &ClientConfig, region: Region) -> Result<HeaderMap, HeaderError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.profile(region).headers {
        insert_header(&mut headers, name, value)?;
    }
    Ok(headers)
}
