use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{CaptchaConfig, CaptchaError, CaptchaProvider, CaptchaResult, CaptchaSolution, CaptchaTask};
use crate::challenges::core::{HttpTransport, SignedRequest, TransportError, execute_with_deadline};
use crate::signing::HeaderBuilder;

const STATUS_SUCCESS: &str = "success";

#[derive(Debug, Deserialize)]
struct AjaxReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Option<AjaxData>,
}

#[derive(Debug, Deserialize)]
struct AjaxData {
    #[serde(default)]
    result: String,
    #[serde(default)]
    validate: Option<String>,
}

/// Adapter for the GeeTest `ajax.php` endpoint, which answers low-risk
/// challenges directly with a validation token.
pub struct GeetestAjaxProvider {
    transport: Arc<dyn HttpTransport>,
    headers: HeaderBuilder,
    endpoint: Url,
    config: CaptchaConfig,
}

impl GeetestAjaxProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, headers: HeaderBuilder, endpoint: Url) -> Self {
        Self {
            transport,
            headers,
            endpoint,
            config: CaptchaConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CaptchaConfig) -> Self {
        self.config = config;
        self
    }

    fn request_url(&self, task: &CaptchaTask) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("challenge", &task.challenge)
            .append_pair("gt", &task.gt);
        url
    }
}

#[async_trait]
impl CaptchaProvider for GeetestAjaxProvider {
    fn name(&self) -> &'static str {
        "geetest-ajax"
    }

    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult {
        let params: [(&str, &str); 0] = [];
        let headers = self
            .headers
            .build_headers(task.region, &params, None, false)
            .map_err(|err| CaptchaError::Configuration(err.to_string()))?;

        let request = SignedRequest::get(self.request_url(task), headers);
        let response = execute_with_deadline(self.transport.as_ref(), &request, self.config.timeout)
            .await
            .map_err(|err| match err {
                TransportError::Timeout(after) => CaptchaError::Timeout(after),
                other => CaptchaError::Provider(other.to_string()),
            })?;

        let text = response.text();
        let json = extract_braced_json(&text)
            .ok_or_else(|| CaptchaError::MalformedResponse(truncate(&text)))?;
        let reply: AjaxReply = serde_json::from_str(json)
            .map_err(|err| CaptchaError::MalformedResponse(err.to_string()))?;

        if reply.status != STATUS_SUCCESS {
            return Err(CaptchaError::Rejected(format!("status={}", reply.status)));
        }

        match reply.data {
            Some(AjaxData {
                result,
                validate: Some(validate),
            }) if result == STATUS_SUCCESS && !validate.is_empty() => {
                log::debug!("{} produced validation token", self.name());
                Ok(CaptchaSolution::new(task.challenge.clone(), validate))
            }
            Some(data) => Err(CaptchaError::Rejected(format!("result={}", data.result))),
            None => Err(CaptchaError::Rejected("missing data".into())),
        }
    }
}

/// Slice from the first `{` to the last `}` inclusive. The endpoint wraps its
/// JSON in a JSONP-style callback.
pub fn extract_braced_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(text: &str) -> String {
    text.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use http::HeaderMap;

    use crate::challenges::core::{Region, TransportResponse};
    use crate::config::ClientConfig;
    use crate::identity::{DeviceIdentityStore, MemoryStore};

    struct FixedTransport {
        body: &'static str,
        seen: Mutex<Option<SignedRequest>>,
    }

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn execute(
            &self,
            request: &SignedRequest,
        ) -> Result<TransportResponse, TransportError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(TransportResponse {
                status: 200,
                headers: HeaderMap::new(),
                body: Bytes::from_static(self.body.as_bytes()),
                url: request.url.clone(),
            })
        }
    }

    fn provider(body: &'static str) -> (Arc<FixedTransport>, GeetestAjaxProvider) {
        let transport = Arc::new(FixedTransport {
            body,
            seen: Mutex::new(None),
        });
        let config = ClientConfig::default();
        let identity = DeviceIdentityStore::new(Arc::new(MemoryStore::new()));
        let headers = HeaderBuilder::new(identity, &config).unwrap();
        let provider = GeetestAjaxProvider::new(transport.clone(), headers, config.captcha_url)
            .with_config(CaptchaConfig {
                timeout: Duration::from_secs(1),
            });
        (transport, provider)
    }

    #[test]
    fn extracts_wrapped_json() {
        assert_eq!(
            extract_braced_json(r#"geetest_123({"status":"success"})"#),
            Some(r#"{"status":"success"}"#)
        );
        assert_eq!(extract_braced_json("no json here"), None);
        assert_eq!(extract_braced_json("} backwards {"), None);
    }

    #[tokio::test]
    async fn returns_validate_token_on_success() {
        let (transport, provider) = provider(
            r#"geetest_1({"status": "success", "data": {"result": "success", "validate": "v-token"}})"#,
        );
        let task = CaptchaTask::new("chal-1", "gt-1", Region::Domestic);
        let solution = provider.solve(&task).await.unwrap();
        assert_eq!(solution.token, "v-token");
        assert_eq!(solution.challenge, "chal-1");

        let request = transport.seen.lock().unwrap().clone().unwrap();
        let query: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert!(query.contains(&("challenge".into(), "chal-1".into())));
        assert!(query.contains(&("gt".into(), "gt-1".into())));
        assert!(query.contains(&("pt".into(), "3".into())));
        assert!(request.headers.get("ds").is_none());
    }

    #[tokio::test]
    async fn non_success_result_is_rejected() {
        let (_, provider) =
            provider(r#"cb({"status": "success", "data": {"result": "slide"}})"#);
        let task = CaptchaTask::new("c", "g", Region::Overseas);
        assert!(matches!(
            provider.solve(&task).await,
            Err(CaptchaError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let (_, provider) = provider(r#"cb({"status": "error", "error": "param"})"#);
        let task = CaptchaTask::new("c", "g", Region::Domestic);
        assert!(matches!(
            provider.solve(&task).await,
            Err(CaptchaError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let (_, provider) = provider("<html>502</html>");
        let task = CaptchaTask::new("c", "g", Region::Domestic);
        assert!(matches!(
            provider.solve(&task).await,
            Err(CaptchaError::MalformedResponse(_))
        ));
    }
}
