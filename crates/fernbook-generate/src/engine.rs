//! Structured-output client: three escalating tiers against the generative
//! text service, each folded into an [`AttemptOutcome`].
//!
//! - Primary: structured call with the caller's budget and timeout.
//! - Tightened: same protocol, smaller budget, compactness directive, +10s.
//! - Conversational: chat protocol, 10% larger budget, JSON-only directive.
//!
//! Only the last tier's failure reaches the caller.

use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use fernbook_core::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL, DEFAULT_TIMEOUT_MS};

use crate::deadline::{race, Raced, TimerRegistry};
use crate::error::{GenerationError, TransportError};
use crate::parse::{extract_json, is_incomplete};
use crate::prompt::strict_schema;
use crate::protocol::{
    ChatMessage, ChatRequest, ChatResponseFormat, Envelope, NamedSchema, ResponsesRequest,
    SchemaFormat, TextFormat, Transport, TEMPERATURE,
};

pub const COMPACT_DIRECTIVE: &str = "Keep the answer compact: short sentences, no repetition, \
and no optional detail. The complete JSON must fit well within the output limit.";

pub const JSON_ONLY_DIRECTIVE: &str = "Reply with only the JSON object that matches the schema. \
No prose, no code fences.";

const TIGHTENED_MIN_TOKENS: u32 = 600;
const TIGHTENED_EXTRA_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters of one structured-output call for one field group.
#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationRequest {
    pub schema_name: String,
    pub schema: Value,
    pub instruction: String,
    pub input_context: String,
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub model: String,
}

impl RegenerationRequest {
    pub fn new(
        schema_name: impl Into<String>,
        schema: Value,
        instruction: impl Into<String>,
        input_context: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            schema,
            instruction: instruction.into(),
            input_context: input_context.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Request whose schema is derived from the payload type `P`.
    pub fn for_payload<P: JsonSchema>(
        schema_name: impl Into<String>,
        instruction: impl Into<String>,
        input_context: impl Into<String>,
    ) -> Self {
        Self::new(schema_name, strict_schema::<P>(), instruction, input_context)
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Duration::from_millis(ms);
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Tightened,
    Conversational,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Primary => "primary",
            Tier::Tightened => "tightened",
            Tier::Conversational => "conversational",
        })
    }
}

/// What a single tier produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Value),
    /// JSON was found but the service flagged the output as cut short.
    Incomplete(Value),
    Timeout,
    TransportError(TransportError),
    NoJsonFound,
}

/// Payload plus the trail of tiers that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub payload: Value,
    pub tier: Tier,
    pub attempts: Vec<(Tier, AttemptOutcome)>,
}

pub struct StructuredClient<T> {
    transport: T,
    timers: TimerRegistry,
}

impl<T: Transport> StructuredClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timers: TimerRegistry::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Timers still armed. Zero once every call has settled.
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    pub async fn generate_structured(
        &self,
        request: &RegenerationRequest,
    ) -> Result<Value, GenerationError> {
        Ok(self.generate_with_report(request).await?.payload)
    }

    /// Generate and deserialize into `P`. The schema sent is always the one derived
    /// from `P`, whatever `request.schema` holds.
    pub async fn generate_typed<P: DeserializeOwned + JsonSchema>(
        &self,
        request: &RegenerationRequest,
    ) -> Result<P, GenerationError> {
        let request = RegenerationRequest {
            schema: strict_schema::<P>(),
            ..request.clone()
        };
        let payload = self.generate_structured(&request).await?;
        serde_json::from_value(payload).map_err(GenerationError::Payload)
    }

    pub async fn generate_with_report(
        &self,
        request: &RegenerationRequest,
    ) -> Result<GenerationReport, GenerationError> {
        let mut attempts = Vec::with_capacity(3);

        let primary = self
            .attempt(Tier::Primary, &primary_envelope(request), request.timeout)
            .await;
        attempts.push((Tier::Primary, primary.clone()));
        let primary_label = outcome_label(&primary);
        if let AttemptOutcome::Success(payload) = primary {
            return Ok(finish(payload, Tier::Primary, attempts));
        }
        tracing::warn!(
            schema = %request.schema_name,
            outcome = primary_label,
            "primary tier failed, tightening"
        );

        let retry_timeout = request.timeout + TIGHTENED_EXTRA_TIMEOUT;
        let tightened = self
            .attempt(Tier::Tightened, &tightened_envelope(request), retry_timeout)
            .await;
        attempts.push((Tier::Tightened, tightened.clone()));
        if let AttemptOutcome::Success(payload) | AttemptOutcome::Incomplete(payload) = tightened {
            return Ok(finish(payload, Tier::Tightened, attempts));
        }
        tracing::warn!(
            schema = %request.schema_name,
            "tightened tier failed, switching to conversational protocol"
        );

        let conversational = self
            .attempt(Tier::Conversational, &conversational_envelope(request), retry_timeout)
            .await;
        attempts.push((Tier::Conversational, conversational.clone()));
        match conversational {
            AttemptOutcome::Success(payload) | AttemptOutcome::Incomplete(payload) => {
                Ok(finish(payload, Tier::Conversational, attempts))
            }
            AttemptOutcome::Timeout => Err(GenerationError::Timeout(retry_timeout)),
            AttemptOutcome::TransportError(e) => Err(GenerationError::Transport(e)),
            AttemptOutcome::NoJsonFound => Err(GenerationError::NoModelOutput),
        }
    }

    async fn attempt(&self, tier: Tier, envelope: &Envelope, limit: Duration) -> AttemptOutcome {
        tracing::debug!(%tier, endpoint = envelope.endpoint(), ?limit, "sending request");
        let outcome = match race(&self.timers, limit, self.transport.send(envelope)).await {
            Raced::TimedOut => AttemptOutcome::Timeout,
            Raced::Completed(Err(e)) => AttemptOutcome::TransportError(e),
            Raced::Completed(Ok(body)) => match extract_json(&body) {
                Some(payload) if is_incomplete(&body) => AttemptOutcome::Incomplete(payload),
                Some(payload) => AttemptOutcome::Success(payload),
                None => AttemptOutcome::NoJsonFound,
            },
        };
        tracing::debug!(%tier, outcome = outcome_label(&outcome), "attempt settled");
        outcome
    }
}

fn finish(payload: Value, tier: Tier, attempts: Vec<(Tier, AttemptOutcome)>) -> GenerationReport {
    tracing::debug!(%tier, "structured output obtained");
    GenerationReport {
        payload,
        tier,
        attempts,
    }
}

fn outcome_label(outcome: &AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Success(_) => "success",
        AttemptOutcome::Incomplete(_) => "incomplete",
        AttemptOutcome::Timeout => "timeout",
        AttemptOutcome::TransportError(_) => "transport_error",
        AttemptOutcome::NoJsonFound => "no_json",
    }
}

/// `max(600, floor(0.8 * max))`
pub fn tightened_budget(max_output_tokens: u32) -> u32 {
    let reduced = (u64::from(max_output_tokens) * 4 / 5) as u32;
    reduced.max(TIGHTENED_MIN_TOKENS)
}

/// `ceil(1.1 * max)`
pub fn conversational_budget(max_output_tokens: u32) -> u32 {
    let inflated = (u64::from(max_output_tokens) * 11).div_ceil(10);
    u32::try_from(inflated).unwrap_or(u32::MAX)
}

fn structured_envelope(
    request: &RegenerationRequest,
    instructions: String,
    budget: u32,
) -> Envelope {
    Envelope::Responses(ResponsesRequest {
        model: request.model.clone(),
        instructions,
        input: request.input_context.clone(),
        temperature: TEMPERATURE,
        max_output_tokens: budget,
        text: TextFormat {
            format: SchemaFormat::strict(&request.schema_name, &request.schema),
        },
    })
}

fn primary_envelope(request: &RegenerationRequest) -> Envelope {
    structured_envelope(request, request.instruction.clone(), request.max_output_tokens)
}

fn tightened_envelope(request: &RegenerationRequest) -> Envelope {
    structured_envelope(
        request,
        format!("{}\n\n{}", request.instruction, COMPACT_DIRECTIVE),
        tightened_budget(request.max_output_tokens),
    )
}

fn conversational_envelope(request: &RegenerationRequest) -> Envelope {
    Envelope::Chat(ChatRequest {
        model: request.model.clone(),
        temperature: TEMPERATURE,
        max_tokens: conversational_budget(request.max_output_tokens),
        response_format: ChatResponseFormat {
            format_type: "json_schema",
            json_schema: NamedSchema {
                name: request.schema_name.clone(),
                schema: request.schema.clone(),
                strict: true,
            },
        },
        messages: vec![
            ChatMessage::system(request.instruction.clone()),
            ChatMessage::user(request.input_context.clone()),
            ChatMessage::system(JSON_ONLY_DIRECTIVE),
        ],
    })
}
