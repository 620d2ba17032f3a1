use super::transport::HttpRequest;
use crate::config::{EndpointConfig, ProviderEndpoint, ProviderEndpoints};
use crate::core::payload::ImagePayload;
use crate::settings::{ProviderCredentials, ProviderKind};
use serde_json::{Value, json};
use std::fmt;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 512;
const TEMPERATURE: f64 = 0.3;

pub const SYSTEM_PROMPT: &str = "You are an expert photo analyzer. Analyze images and determine if they are blurry, if they are screenshots, and if they contain people. Respond with a JSON object containing: {\"isBlurry\": boolean, \"isScreenshot\": boolean, \"blurScore\": number (0-100, where 100 is very blurry), \"confidence\": number (0-100), \"hasPeople\": boolean}. A screenshot is an image captured from a screen, typically showing UI elements, apps, or desktop content.";
pub const USER_PROMPT: &str =
    "Analyze this image. Is it blurry? Is it a screenshot? Does it show people? Return only JSON.";

/// Precedence used when the user has stored several keys.
pub const PRECEDENCE: [ProviderKind; 4] = [
    ProviderKind::DeepSeek,
    ProviderKind::OpenAi,
    ProviderKind::Gemini,
    ProviderKind::Anthropic,
];

/// The backend a single analysis call goes to. Keyed variants carry the
/// user's key for that vendor; `Default` is the hosted analysis endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum Provider {
    DeepSeek(String),
    OpenAi(String),
    Gemini(String),
    Anthropic(String),
    Default,
}

impl Provider {
    pub fn select(credentials: &ProviderCredentials) -> Self {
        PRECEDENCE
            .iter()
            .find_map(|kind| {
                credentials
                    .get(*kind)
                    .map(|key| Self::keyed(*kind, key.to_string()))
            })
            .unwrap_or(Provider::Default)
    }

    pub fn keyed(kind: ProviderKind, key: String) -> Self {
        match kind {
            ProviderKind::DeepSeek => Provider::DeepSeek(key),
            ProviderKind::OpenAi => Provider::OpenAi(key),
            ProviderKind::Gemini => Provider::Gemini(key),
            ProviderKind::Anthropic => Provider::Anthropic(key),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::DeepSeek(_) => "deepseek",
            Provider::OpenAi(_) => "openai",
            Provider::Gemini(_) => "gemini",
            Provider::Anthropic(_) => "anthropic",
            Provider::Default => "default",
        }
    }

    pub fn build_request(
        &self,
        providers: &ProviderEndpoints,
        fallback: &EndpointConfig,
        payload: &ImagePayload,
    ) -> HttpRequest {
        match self {
            Provider::DeepSeek(key) => chat_completions_request(&providers.deepseek, key, payload),
            Provider::OpenAi(key) => chat_completions_request(&providers.openai, key, payload),
            Provider::Gemini(key) => gemini_request(&providers.gemini, key, payload),
            Provider::Anthropic(key) => anthropic_request(&providers.anthropic, key, payload),
            Provider::Default => default_request(fallback, payload),
        }
    }

    /// Locate the model's textual answer in a 2xx response body. When the
    /// envelope is not what the vendor documents, the raw body is returned
    /// so the answer parser can still try it.
    pub fn answer_text(&self, body: &str) -> String {
        let pointer = match self {
            Provider::DeepSeek(_) | Provider::OpenAi(_) => "/choices/0/message/content",
            Provider::Gemini(_) => "/candidates/0/content/parts/0/text",
            Provider::Anthropic(_) => "/content/0/text",
            Provider::Default => return body.to_string(),
        };

        let text = serde_json::from_str::<Value>(body).ok().and_then(|value| {
            value
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        text.unwrap_or_else(|| {
            log::warn!("Unexpected {} response envelope", self.name());
            body.to_string()
        })
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// OpenAI-style chat completion body with the image inlined as a data URL.
pub fn chat_completions_body(model: &str, data_url: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": USER_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }
        ],
        "temperature": TEMPERATURE,
    })
}

fn chat_completions_request(
    endpoint: &ProviderEndpoint,
    key: &str,
    payload: &ImagePayload,
) -> HttpRequest {
    HttpRequest::new(
        endpoint.url.clone(),
        chat_completions_body(&endpoint.model, &payload.data_url()),
    )
    .header("Authorization", format!("Bearer {}", key))
}

fn gemini_request(endpoint: &ProviderEndpoint, key: &str, payload: &ImagePayload) -> HttpRequest {
    let url = format!(
        "{}/{}:generateContent",
        endpoint.url.trim_end_matches('/'),
        endpoint.model
    );
    let body = json!({
        "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
        "contents": [{
            "role": "user",
            "parts": [
                { "text": USER_PROMPT },
                {
                    "inline_data": {
                        "mime_type": ImagePayload::MIME_TYPE,
                        "data": payload.base64,
                    }
                }
            ]
        }],
        "generationConfig": { "temperature": TEMPERATURE },
    });

    HttpRequest::new(url, body).header("x-goog-api-key", key)
}

fn anthropic_request(
    endpoint: &ProviderEndpoint,
    key: &str,
    payload: &ImagePayload,
) -> HttpRequest {
    let body = json!({
        "model": endpoint.model,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "system": SYSTEM_PROMPT,
        "temperature": TEMPERATURE,
        "messages": [{
            "role": "user",
            "content": [
                {
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": ImagePayload::MIME_TYPE,
                        "data": payload.base64,
                    }
                },
                { "type": "text", "text": USER_PROMPT }
            ]
        }],
    });

    HttpRequest::new(endpoint.url.clone(), body)
        .header("x-api-key", key)
        .header("anthropic-version", ANTHROPIC_VERSION)
}

// User keys are never forwarded to the hosted endpoint.
fn default_request(endpoint: &EndpointConfig, payload: &ImagePayload) -> HttpRequest {
    let request = HttpRequest::new(
        endpoint.url.clone(),
        json!({ "imageData": payload.data_url() }),
    );
    match endpoint.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => request
            .header("Authorization", format!("Bearer {}", key))
            .header("apikey", key),
        None => request,
    }
}
