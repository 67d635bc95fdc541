#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fernbook_generate::protocol::Envelope;
use fernbook_generate::{Transport, TransportError};
use serde_json::{json, Value};

/// One scripted reply.
pub enum Step {
    Reply(Value),
    Fail(TransportError),
    /// Never answers within any test timeout.
    Hang,
}

/// Transport that replays a script and records every envelope it was given.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    sent: Mutex<Vec<Envelope>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, envelope: &Envelope) -> Result<Value, TransportError> {
        self.sent.lock().unwrap().push(envelope.clone());
        let step = self.script.lock().unwrap().pop_front();
        play(step).await
    }
}

/// Transport that answers by the schema name of each envelope, so
/// concurrently issued calls get deterministic replies.
#[derive(Default)]
pub struct KeyedTransport {
    replies: Mutex<HashMap<String, VecDeque<Step>>>,
    sent: Mutex<Vec<Envelope>>,
}

impl KeyedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, schema_name: &str, step: Step) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(schema_name.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    /// Schema names in the order their first envelope went out.
    pub fn first_calls(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for envelope in self.sent() {
            let name = schema_name(&envelope).to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

pub fn schema_name(envelope: &Envelope) -> &str {
    match envelope {
        Envelope::Responses(req) => &req.text.format.name,
        Envelope::Chat(req) => &req.response_format.json_schema.name,
    }
}

pub fn context_of(envelope: &Envelope) -> &str {
    match envelope {
        Envelope::Responses(req) => &req.input,
        Envelope::Chat(req) => &req.messages[1].content,
    }
}

#[async_trait]
impl Transport for KeyedTransport {
    async fn send(&self, envelope: &Envelope) -> Result<Value, TransportError> {
        self.sent.lock().unwrap().push(envelope.clone());
        let step = self
            .replies
            .lock()
            .unwrap()
            .get_mut(schema_name(envelope))
            .and_then(VecDeque::pop_front);
        play(step).await
    }
}

async fn play(step: Option<Step>) -> Result<Value, TransportError> {
    match step {
        Some(Step::Reply(body)) => Ok(body),
        Some(Step::Fail(err)) => Err(err),
        Some(Step::Hang) => {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            Ok(Value::Null)
        }
        None => Err(TransportError::network("script exhausted")),
    }
}

/// A structured-call response carrying `payload` as output text.
pub fn responses_body(payload: Value) -> Value {
    json!({
        "status": "completed",
        "output": [{
            "type": "message",
            "content": [{"type": "output_text", "text": payload.to_string()}]
        }]
    })
}

/// A conversational response carrying `payload` as message content.
pub fn chat_body(payload: Value) -> Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": payload.to_string()}}]
    })
}
