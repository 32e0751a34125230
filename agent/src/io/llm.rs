//! Language-model access.
//!
//! [`LlmClient`] is what the episode controller talks to. [`RetryingClient`]
//! implements it over a single-attempt [`ChatBackend`], raising the sampling
//! temperature on every retry. [`CommandBackend`] is the production backend:
//! one bridge process per attempt, JSON request on stdin, JSON reply on stdout.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::{ActionCall, FunctionCall, Message};
use crate::io::config::LlmConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Answers model queries. `None` means the retry budget ran out.
pub trait LlmClient {
    /// Free-text completion, cut at any of `stop`.
    fn complete(&self, query: &[Message], stop: &[String]) -> Option<String>;

    /// Structured selection among the offered function `specs`.
    fn complete_with_actions(&self, query: &[Message], specs: &[Value]) -> Option<ActionCall>;
}

/// One attempt's request as sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<Value>,
}

/// A backend's answer: text, a function call, or neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
}

/// A single chat completion attempt.
pub trait ChatBackend {
    fn chat(&self, request: &ChatRequest) -> Result<ChatReply>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub temperature_step: f64,
    pub max_tokens: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            temperature_step: 0.2,
            max_tokens: 100,
        }
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(cfg: &LlmConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            temperature_step: cfg.temperature_step,
            max_tokens: cfg.max_tokens,
        }
    }
}

/// Retries a backend until it produces an acceptable reply.
///
/// Transport errors count as failed attempts. There is no delay between
/// attempts.
#[derive(Debug)]
pub struct RetryingClient<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: ChatBackend> RetryingClient<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn attempt_until<T>(
        &self,
        mut request: ChatRequest,
        accept: impl Fn(ChatReply) -> Option<T>,
    ) -> Option<T> {
        for attempt in 0..self.policy.max_attempts {
            request.temperature = f64::from(attempt) * self.policy.temperature_step;
            match self.backend.chat(&request) {
                Ok(reply) => {
                    if let Some(value) = accept(reply) {
                        return Some(value);
                    }
                    debug!(attempt, "unusable reply, retrying");
                }
                Err(err) => warn!(attempt, err = %format!("{err:#}"), "chat attempt failed"),
            }
        }
        warn!(attempts = self.policy.max_attempts, "retry budget exhausted");
        None
    }
}

impl<B: ChatBackend> LlmClient for RetryingClient<B> {
    #[instrument(skip_all, fields(messages = query.len()))]
    fn complete(&self, query: &[Message], stop: &[String]) -> Option<String> {
        let request = ChatRequest {
            messages: query.to_vec(),
            temperature: 0.0,
            max_tokens: self.policy.max_tokens,
            stop: stop.to_vec(),
            functions: Vec::new(),
        };
        self.attempt_until(request, |reply| {
            reply.content.filter(|text| !text.trim().is_empty())
        })
    }

    #[instrument(skip_all, fields(messages = query.len(), functions = specs.len()))]
    fn complete_with_actions(&self, query: &[Message], specs: &[Value]) -> Option<ActionCall> {
        let request = ChatRequest {
            messages: query.to_vec(),
            temperature: 0.0,
            max_tokens: self.policy.max_tokens,
            stop: Vec::new(),
            functions: specs.to_vec(),
        };
        self.attempt_until(request, |reply| {
            let call = reply.function_call?;
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(arguments @ Value::Object(_)) => Some(ActionCall {
                    name: call.name,
                    arguments,
                }),
                _ => {
                    debug!(name = %call.name, "function arguments are not a JSON object");
                    None
                }
            }
        })
    }
}

/// Runs a bridge command per attempt.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandBackend {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self::new(
            cfg.command.clone(),
            Duration::from_secs(cfg.timeout_secs),
            cfg.output_limit_bytes,
        )
    }
}

impl ChatBackend for CommandBackend {
    #[instrument(skip_all, fields(temperature = request.temperature))]
    fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let payload = serde_json::to_vec(request).context("serialize chat request")?;
        let cmd = command_from_argv(&self.command).context("llm command")?;
        let output = run_command_with_timeout(cmd, &payload, self.timeout, self.output_limit_bytes)?;
        output.ensure_success("llm bridge")?;
        serde_json::from_slice(&output.stdout).context("parse llm bridge reply")
    }
}

/// Retrying client over the configured bridge command.
pub fn client_from_config(cfg: &LlmConfig) -> RetryingClient<CommandBackend> {
    RetryingClient::new(CommandBackend::from_config(cfg), RetryPolicy::from(cfg))
}
