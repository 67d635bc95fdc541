//! Wire envelopes for the generative text service and the transport that carries them.
//!
//! Two request protocols are spoken: a single structured-output call
//! (`/responses`) and a conversational completion (`/chat/completions`).

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use serde_json::Value;

use fernbook_core::GeneratorSettings;

use crate::error::TransportError;
use crate::parse::service_error_message;

pub const TEMPERATURE: f32 = 0.2;

/// Structured single-call request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponsesRequest {
    pub model: String,
    pub instructions: String,
    pub input: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub text: TextFormat,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextFormat {
    pub format: SchemaFormat,
}

/// `{"type": "json_schema", "name", "schema", "strict"}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchemaFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

impl SchemaFormat {
    pub fn strict(name: &str, schema: &Value) -> Self {
        Self {
            format_type: "json_schema",
            name: name.to_string(),
            schema: schema.clone(),
            strict: true,
        }
    }
}

/// Conversational request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ChatResponseFormat,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
    pub json_schema: NamedSchema,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NamedSchema {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One outbound call in either protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Responses(ResponsesRequest),
    Chat(ChatRequest),
}

impl Envelope {
    /// Path relative to the service base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Envelope::Responses(_) => "responses",
            Envelope::Chat(_) => "chat/completions",
        }
    }

    pub fn body(&self) -> Result<Value, serde_json::Error> {
        match self {
            Envelope::Responses(req) => serde_json::to_value(req),
            Envelope::Chat(req) => serde_json::to_value(req),
        }
    }
}

/// Carries an envelope to the service and returns the raw response body.
///
/// Non-success statuses and network failures are `Err`; interpreting the
/// body is left to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<Value, TransportError>;
}

/// HTTP transport with a bearer credential on every call.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::network(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &GeneratorSettings) -> Result<Self, TransportError> {
        Self::new(&settings.base_url, &settings.api_key)
    }

    fn url(&self, envelope: &Envelope) -> String {
        format!("{}/{}", self.base_url, envelope.endpoint())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: &Envelope) -> Result<Value, TransportError> {
        let body = envelope
            .body()
            .map_err(|e| TransportError::network(format!("encode request: {e}")))?;

        let response = self
            .client
            .post(self.url(envelope))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::network(e.to_string()))?;
        let parsed: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = parsed
                .as_ref()
                .and_then(service_error_message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(TransportError::status(status.as_u16(), message));
        }

        parsed.ok_or_else(|| {
            TransportError::status(status.as_u16(), "response body is not JSON".to_string())
        })
    }
}
