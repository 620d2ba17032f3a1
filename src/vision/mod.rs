pub mod filename;
pub mod parse;
pub mod provider;
pub mod transport;

pub use filename::looks_like_screenshot;
pub use provider::Provider;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Transport};

use crate::config::{AppConfig, EndpointConfig, ProviderEndpoints};
use crate::core::fingerprint::DecodeError;
use crate::core::payload::ImagePayload;
use crate::settings::ProviderCredentials;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Normalized verdict for one image, whichever provider produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub is_blurry: bool,
    /// 0 (sharp) to 100 (very blurry).
    pub blur_score: u8,
    pub is_screenshot: bool,
    pub has_people: bool,
    pub confidence: u8,
}

impl AnalysisResult {
    /// What an item gets when no provider answer is available. Assumes
    /// people are present so the no-people rule never fires on it.
    pub fn fallback(filename_screenshot: bool) -> Self {
        Self {
            is_blurry: false,
            blur_score: 0,
            is_screenshot: filename_screenshot,
            has_people: true,
            confidence: if filename_screenshot { 80 } else { 50 },
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited by {provider}")]
    RateLimited { provider: &'static str },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Image could not be prepared: {0}")]
    Decode(String),
}

impl AnalysisError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AnalysisError::RateLimited { .. })
    }
}

/// Outcome of `VisionClient::analyze`. `result` is always usable; when
/// `failure` is set it holds the local fallback.
#[derive(Debug)]
pub struct PhotoAnalysis {
    pub result: AnalysisResult,
    /// Provider that was contacted. `None` when the image never got that far.
    pub provider: Option<&'static str>,
    pub filename_screenshot: bool,
    pub failure: Option<AnalysisError>,
}

impl PhotoAnalysis {
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

/// Sends normalized images to the selected provider and maps every answer
/// to an `AnalysisResult`.
pub struct VisionClient {
    transport: Arc<dyn Transport>,
    providers: ProviderEndpoints,
    endpoint: EndpointConfig,
}

impl VisionClient {
    pub fn new(config: &AppConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            providers: config.providers.clone(),
            endpoint: config.endpoint.clone(),
        }
    }

    pub fn with_http(config: &AppConfig) -> Self {
        Self::new(config, Arc::new(HttpTransport::new()))
    }

    /// One call against one provider. Only transport failures and non-2xx
    /// statuses are errors; an answer that cannot be parsed still yields a
    /// heuristic result.
    pub async fn request(
        &self,
        provider: &Provider,
        payload: &ImagePayload,
    ) -> Result<AnalysisResult, AnalysisError> {
        let request = provider.build_request(&self.providers, &self.endpoint, payload);
        log::debug!("Analyzing image via {} ({})", provider.name(), request.url);

        let response = self
            .transport
            .post_json(request)
            .await
            .map_err(AnalysisError::Transport)?;

        if response.status == 429 {
            return Err(AnalysisError::RateLimited {
                provider: provider.name(),
            });
        }
        if !response.is_success() {
            return Err(AnalysisError::Status {
                provider: provider.name(),
                status: response.status,
                body: response.body,
            });
        }

        let answer = provider.answer_text(&response.body);
        Ok(parse::parse_answer(&answer))
    }

    /// Analyze one photo and never fail. Exactly one provider is tried; on
    /// any failure the item gets the fallback result. The filename check is
    /// OR'd into `is_screenshot` either way.
    pub async fn analyze(
        &self,
        file_name: &str,
        image: Result<&ImagePayload, &DecodeError>,
        credentials: &ProviderCredentials,
    ) -> PhotoAnalysis {
        let filename_screenshot = looks_like_screenshot(file_name);
        let provider = Provider::select(credentials);

        let (outcome, contacted) = match image {
            Ok(payload) => (
                self.request(&provider, payload).await,
                Some(provider.name()),
            ),
            Err(e) => (Err(AnalysisError::Decode(e.to_string())), None),
        };

        match outcome {
            Ok(mut result) => {
                result.is_screenshot |= filename_screenshot;
                PhotoAnalysis {
                    result,
                    provider: contacted,
                    filename_screenshot,
                    failure: None,
                }
            }
            Err(e) => {
                log::warn!(
                    "Analysis of {} ({}) degraded: {}",
                    file_name,
                    contacted.unwrap_or("no provider"),
                    e
                );
                PhotoAnalysis {
                    result: AnalysisResult::fallback(filename_screenshot),
                    provider: contacted,
                    filename_screenshot,
                    failure: Some(e),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::settings::ProviderKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned responses and records every request it sees.
    pub(crate) struct FakeTransport {
        reply: Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, String> + Send + Sync>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        pub(crate) fn new(
            reply: impl Fn(&HttpRequest) -> Result<HttpResponse, String> + Send + Sync + 'static,
        ) -> Self {
            Self {
                reply: Box::new(reply),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn answering(status: u16, body: &str) -> Self {
            let body = body.to_string();
            Self::new(move |_| {
                Ok(HttpResponse {
                    status,
                    body: body.clone(),
                })
            })
        }

        pub(crate) fn failing() -> Self {
            Self::new(|_| Err("connection refused".to_string()))
        }

        pub(crate) fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post_json(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            let reply = (self.reply)(&request);
            self.requests.lock().unwrap().push(request);
            reply
        }
    }

    fn payload() -> ImagePayload {
        ImagePayload {
            base64: "QUJD".to_string(),
            width: 1,
            height: 1,
        }
    }

    fn client(transport: Arc<FakeTransport>) -> VisionClient {
        VisionClient::new(&AppConfig::default(), transport)
    }

    fn openai_answer(content: &str) -> String {
        serde_json::json!({ "choices": [{ "message": { "content": content } }] }).to_string()
    }

    #[tokio::test]
    async fn test_openai_used_over_gemini() {
        let transport = Arc::new(FakeTransport::answering(
            200,
            &openai_answer(r#"{"isBlurry":false,"isScreenshot":false,"blurScore":5,"confidence":95,"hasPeople":true}"#),
        ));
        let mut creds = ProviderCredentials::default();
        creds.set(ProviderKind::Gemini, Some("g-key".to_string()));
        creds.set(ProviderKind::OpenAi, Some("o-key".to_string()));

        let analysis = client(transport.clone())
            .analyze("IMG_1.jpg", Ok(&payload()), &creds)
            .await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, ProviderEndpoints::default().openai.url);
        assert_eq!(analysis.provider, Some("openai"));
        assert!(!analysis.is_degraded());
        assert_eq!(analysis.result.confidence, 95);
    }

    #[tokio::test]
    async fn test_filename_heuristic_survives_network_failure() {
        let transport = Arc::new(FakeTransport::failing());

        let analysis = client(transport)
            .analyze("screenshot_2024.png", Ok(&payload()), &ProviderCredentials::default())
            .await;

        assert!(analysis.is_degraded());
        assert!(analysis.filename_screenshot);
        assert!(analysis.result.is_screenshot);
        assert_eq!(analysis.result.confidence, 80);
        assert!(matches!(analysis.failure, Some(AnalysisError::Transport(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let transport = Arc::new(FakeTransport::answering(429, r#"{"error":"slow down"}"#));
        let mut creds = ProviderCredentials::default();
        creds.set(ProviderKind::DeepSeek, Some("d".to_string()));
        creds.set(ProviderKind::Anthropic, Some("a".to_string()));

        let analysis = client(transport.clone())
            .analyze("IMG_2.jpg", Ok(&payload()), &creds)
            .await;

        assert_eq!(transport.requests().len(), 1);
        assert!(analysis.failure.as_ref().is_some_and(AnalysisError::is_rate_limited));
        assert_eq!(analysis.result, AnalysisResult::fallback(false));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let transport = Arc::new(FakeTransport::answering(502, "bad gateway"));

        let result = client(transport)
            .request(&Provider::Default, &payload())
            .await;

        assert!(matches!(
            result,
            Err(AnalysisError::Status { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_json_answer_is_a_success() {
        let transport = Arc::new(FakeTransport::answering(
            200,
            &openai_answer("This picture is blurry, sorry."),
        ));

        let result = client(transport)
            .request(&Provider::OpenAi("k".to_string()), &payload())
            .await
            .unwrap();

        assert!(result.is_blurry);
        assert_eq!(result.blur_score, 70);
        assert_eq!(result.confidence, 60);
    }

    #[tokio::test]
    async fn test_decode_failure_skips_network() {
        let transport = Arc::new(FakeTransport::failing());
        let error = DecodeError::Empty;

        let analysis = client(transport.clone())
            .analyze("holiday.jpg", Err(&error), &ProviderCredentials::default())
            .await;

        assert!(transport.requests().is_empty());
        assert_eq!(analysis.provider, None);
        assert!(matches!(analysis.failure, Some(AnalysisError::Decode(_))));
        assert!(!analysis.result.is_screenshot);
    }

    #[tokio::test]
    async fn test_filename_is_ored_into_success() {
        let transport = Arc::new(FakeTransport::answering(
            200,
            r#"{"isBlurry":false,"isScreenshot":false,"blurScore":0,"confidence":70,"hasPeople":false}"#,
        ));

        let analysis = client(transport)
            .analyze("Screen Shot 1.png", Ok(&payload()), &ProviderCredentials::default())
            .await;

        assert!(!analysis.is_degraded());
        assert!(analysis.result.is_screenshot);
        assert_eq!(analysis.provider, Some("default"));
    }
}
