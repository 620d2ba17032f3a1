//! HTTP endpoint that analyzes one image per request. This is what the
//! client's `Default` provider talks to when the user has stored no keys.

use crate::config::{AppConfig, ProviderEndpoint};
use crate::core::payload::{ImagePayload, ImageService};
use crate::settings::ProviderCredentials;
use crate::vision::{AnalysisError, Provider, Transport, VisionClient};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_GATEWAY_MODEL: &str = "google/gemini-2.5-flash";
const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// OpenAI-compatible upstream used when a request carries no user keys.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl GatewayConfig {
    /// Reads `SWEEPRS_GATEWAY_URL`, `SWEEPRS_GATEWAY_KEY` and
    /// `SWEEPRS_GATEWAY_MODEL`. The URL defaults to the OpenAI endpoint
    /// from `config`.
    pub fn from_env(config: &AppConfig) -> Self {
        Self {
            url: std::env::var("SWEEPRS_GATEWAY_URL")
                .unwrap_or_else(|_| config.providers.openai.url.clone()),
            api_key: std::env::var("SWEEPRS_GATEWAY_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            model: std::env::var("SWEEPRS_GATEWAY_MODEL")
                .unwrap_or_else(|_| DEFAULT_GATEWAY_MODEL.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    #[serde(default)]
    image_data: Option<String>,
    #[serde(default)]
    user_api_keys: Option<ProviderCredentials>,
}

#[derive(Clone)]
pub struct ServerState {
    user_client: Arc<VisionClient>,
    gateway_client: Arc<VisionClient>,
    gateway_key: Option<String>,
    images: Arc<ImageService>,
}

impl ServerState {
    pub fn new(config: &AppConfig, gateway: GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        let mut gateway_config = config.clone();
        gateway_config.providers.openai = ProviderEndpoint {
            url: gateway.url,
            model: gateway.model,
        };

        Self {
            user_client: Arc::new(VisionClient::new(config, transport.clone())),
            gateway_client: Arc::new(VisionClient::new(&gateway_config, transport)),
            gateway_key: gateway.api_key,
            images: Arc::new(ImageService::new(&config.image)),
        }
    }
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/analyze-photo", post(analyze_photo).options(preflight))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: ServerState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}/analyze-photo", listener.local_addr()?);
    axum::serve(listener, create_router(state)).await
}

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cors((status, Json(body)).into_response())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_response(status, json!({ "error": message.into() }))
}

async fn preflight() -> Response {
    with_cors(StatusCode::OK.into_response())
}

async fn analyze_photo(State(state): State<ServerState>, body: Bytes) -> Response {
    let request: AnalyzeRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            log::error!("Invalid analyze request: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let Some(image_data) = request.image_data.filter(|d| !d.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing imageData");
    };

    let payload = match normalize_image(&state.images, &image_data) {
        Some(payload) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Invalid imageData"),
    };

    let credentials = request.user_api_keys.unwrap_or_default();
    let outcome = if credentials.is_empty() {
        let Some(key) = state.gateway_key.clone() else {
            log::error!("Gateway key not configured");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Gateway API key not configured",
            );
        };
        state
            .gateway_client
            .request(&Provider::OpenAi(key), &payload)
            .await
    } else {
        let provider = Provider::select(&credentials);
        log::info!("Analyzing image with user key for {}", provider.name());
        state.user_client.request(&provider, &payload).await
    };

    match outcome {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(AnalysisError::RateLimited { provider }) => {
            log::warn!("Upstream {} rate limited the request", provider);
            error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Please try again later.",
            )
        }
        Err(e) => {
            log::error!("Analysis failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// Whatever the client sent is re-encoded to the standard payload so every
// provider gets the same JPEG.
fn normalize_image(images: &ImageService, data_url: &str) -> Option<ImagePayload> {
    let (_, data) = ImagePayload::split_data_url(data_url)?;
    let bytes = STANDARD.decode(data).ok()?;
    let img = image::load_from_memory(&bytes).ok()?;
    images.normalize(&img).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::tests::encode_png;
    use crate::vision::tests::FakeTransport;

    const ANSWER: &str = r#"{"choices":[{"message":{"content":"{\"isBlurry\":true,\"isScreenshot\":false,\"blurScore\":75,\"confidence\":88,\"hasPeople\":false}"}}]}"#;

    fn state(transport: Arc<FakeTransport>, gateway_key: Option<&str>) -> ServerState {
        let gateway = GatewayConfig {
            url: "https://gateway.test/v1/chat/completions".to_string(),
            api_key: gateway_key.map(str::to_string),
            model: DEFAULT_GATEWAY_MODEL.to_string(),
        };
        ServerState::new(&AppConfig::default(), gateway, transport)
    }

    fn image_data() -> String {
        let png = encode_png(32, 32, |x, y| ((x + y) * 4) as u8);
        format!("data:image/png;base64,{}", STANDARD.encode(png))
    }

    async fn call(state: ServerState, body: Value) -> (StatusCode, Value) {
        let response = analyze_photo(State(state), Bytes::from(body.to_string())).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_missing_image_is_bad_request() {
        let transport = Arc::new(FakeTransport::failing());
        let (status, body) = call(state(transport.clone(), Some("k")), json!({})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Missing imageData" }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_used_without_user_keys() {
        let transport = Arc::new(FakeTransport::answering(200, ANSWER));
        let (status, body) = call(
            state(transport.clone(), Some("gw-key")),
            json!({ "imageData": image_data() }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isBlurry"], json!(true));
        assert_eq!(body["blurScore"], json!(75));
        assert_eq!(body["hasPeople"], json!(false));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://gateway.test/v1/chat/completions");
        assert_eq!(requests[0].header_value("authorization"), Some("Bearer gw-key"));
        assert_eq!(requests[0].body["model"], json!(DEFAULT_GATEWAY_MODEL));
    }

    #[tokio::test]
    async fn test_user_keys_bypass_gateway() {
        let transport = Arc::new(FakeTransport::answering(200, ANSWER));
        let (status, _) = call(
            state(transport.clone(), None),
            json!({ "imageData": image_data(), "userApiKeys": { "deepseek": "ds-key" } }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let requests = transport.requests();
        assert_eq!(requests[0].url, AppConfig::default().providers.deepseek.url);
        assert_eq!(requests[0].header_value("authorization"), Some("Bearer ds-key"));
    }

    #[tokio::test]
    async fn test_upstream_rate_limit_passes_through() {
        let transport = Arc::new(FakeTransport::answering(429, "{}"));
        let (status, body) = call(
            state(transport, Some("gw-key")),
            json!({ "imageData": image_data() }),
        )
        .await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["error"].as_str().unwrap().contains("Rate limit"));
    }

    #[tokio::test]
    async fn test_missing_gateway_key_is_server_error() {
        let transport = Arc::new(FakeTransport::failing());
        let (status, body) =
            call(state(transport, None), json!({ "imageData": image_data() })).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let transport = Arc::new(FakeTransport::failing());
        let response = analyze_photo(
            State(state(transport, None)),
            Bytes::from_static(b"{}"),
        )
        .await;
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOWED_HEADERS);

        let preflight = preflight().await;
        assert_eq!(preflight.status(), StatusCode::OK);
        assert_eq!(preflight.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
