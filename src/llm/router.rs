//! Skill router
//!
//! Two responsibilities, both adapter-facing:
//!
//! 1. [`SkillRouter::resolve`] - turn a free-form text message into one
//!    skill invocation (used by the task adapter for text parts).
//! 2. [`SkillRouter::run_chat`] - drive the bounded tool loop behind the
//!    chat-completions adapter: at most [`MAX_FUNCTION_CALLS`] model
//!    rounds, and at most one proof-producing call per request. The
//!    one-proof rule is loop state here, deliberately not part of the
//!    skill core.

use super::{ChatMessage, LlmProvider, ToolDef};
use crate::skills::{Skill, SkillCore, ALL_SKILLS};
use crate::{ProofportError, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

/// Upper bound on model rounds per chat request
pub const MAX_FUNCTION_CALLS: usize = 5;

/// System prompt for the chat tool loop
const ROUTER_PROMPT: &str = "You are the proofport assistant. You help callers generate and \
verify zero-knowledge proofs of identity attestations. Use the provided tools to act; never \
invent request ids or proof ids. When a tool returns a URL the caller must open, relay it \
verbatim. Be concise.";

/// A tool-execution step surfaced to streaming clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub skill: String,
    /// "completed", "failed" or "rejected"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of one chat request
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Messages appended to the history this turn (assistant and tool)
    pub appended: Vec<ChatMessage>,
    /// Tool steps, in execution order
    pub steps: Vec<StepEvent>,
    /// Final assistant text
    pub content: String,
    /// The last successful skill result, for the annotated response block
    pub last_result: Option<(Skill, Value)>,
}

/// Router over an LLM provider and the skill core
#[derive(Clone)]
pub struct SkillRouter {
    provider: Arc<dyn LlmProvider>,
    core: SkillCore,
}

impl SkillRouter {
    /// Create a router
    pub fn new(provider: Arc<dyn LlmProvider>, core: SkillCore) -> Self {
        Self { provider, core }
    }

    /// Tool definitions, one per skill
    pub fn tool_defs() -> Vec<ToolDef> {
        ALL_SKILLS
            .iter()
            .map(|skill| ToolDef::function(skill.as_str(), skill.description(), skill_schema(*skill)))
            .collect()
    }

    /// Resolve free-form text into a skill invocation
    ///
    /// Tool use is required for this turn, so the model answers with a
    /// skill call rather than prose; a provider that still returns no call
    /// is reported as unresolvable.
    pub async fn resolve(&self, text: &str) -> Result<(Skill, Value)> {
        let messages = [
            ChatMessage::text(
                "system",
                "Map the user's request onto exactly one tool call with the right arguments.",
            ),
            ChatMessage::text("user", text),
        ];
        let response = self
            .provider
            .chat_required(&messages, &Self::tool_defs())
            .await?;
        let call = response
            .tool_calls
            .as_ref()
            .and_then(|calls| calls.first())
            .ok_or_else(|| {
                ProofportError::invalid_params(
                    "could not resolve the message to a skill; send a data part with a skill field",
                )
            })?;
        let skill = Skill::from_str(&call.function.name)?;
        let args: Value = serde_json::from_str(&call.function.arguments)
            .map_err(|_| ProofportError::invalid_params("model produced unparseable arguments"))?;
        Ok((skill, args))
    }

    /// Run the bounded chat tool loop over a message history
    ///
    /// `step_sink`, when given, receives each [`StepEvent`] as it happens
    /// so streaming responses can relay tool progress live.
    pub async fn run_chat(
        &self,
        history: &[ChatMessage],
        step_sink: Option<tokio::sync::mpsc::UnboundedSender<StepEvent>>,
    ) -> Result<ChatOutcome> {
        let tools = Self::tool_defs();
        let mut messages: Vec<ChatMessage> = Vec::with_capacity(history.len() + 8);
        messages.push(ChatMessage::text("system", ROUTER_PROMPT));
        messages.extend_from_slice(history);

        let mut appended = Vec::new();
        let mut steps = Vec::new();
        let mut last_result = None;
        let mut proof_calls = 0usize;

        for _round in 0..MAX_FUNCTION_CALLS {
            let assistant = self.provider.chat(&messages, &tools).await?;
            messages.push(assistant.clone());
            appended.push(assistant.clone());

            if !assistant.has_tool_calls() {
                return Ok(ChatOutcome {
                    appended,
                    steps,
                    content: assistant.content.unwrap_or_default(),
                    last_result,
                });
            }

            for call in assistant.tool_calls.as_deref().unwrap_or_default() {
                let (result_text, step) = match Skill::from_str(&call.function.name) {
                    Ok(skill) if skill.is_proof_producing() && proof_calls >= 1 => {
                        let detail =
                            "only one proof-producing call is allowed per request".to_string();
                        (
                            json!({ "error": detail }).to_string(),
                            StepEvent {
                                skill: skill.as_str().to_string(),
                                status: "rejected".to_string(),
                                detail: Some(detail),
                            },
                        )
                    }
                    Ok(skill) => {
                        if skill.is_proof_producing() {
                            proof_calls += 1;
                        }
                        let args: Value = serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| json!({}));
                        match self.core.dispatch(skill, args).await {
                            Ok(result) => {
                                let summarized = summarize_result(skill, &result);
                                last_result = Some((skill, summarized.clone()));
                                (
                                    summarized.to_string(),
                                    StepEvent {
                                        skill: skill.as_str().to_string(),
                                        status: "completed".to_string(),
                                        detail: None,
                                    },
                                )
                            }
                            Err(err) => (
                                json!({ "error": err.to_string() }).to_string(),
                                StepEvent {
                                    skill: skill.as_str().to_string(),
                                    status: "failed".to_string(),
                                    detail: Some(err.to_string()),
                                },
                            ),
                        }
                    }
                    Err(err) => (
                        json!({ "error": err.to_string() }).to_string(),
                        StepEvent {
                            skill: call.function.name.clone(),
                            status: "failed".to_string(),
                            detail: Some(err.to_string()),
                        },
                    ),
                };
                if let Some(sink) = &step_sink {
                    let _ = sink.send(step.clone());
                }
                steps.push(step);
                let tool_message = ChatMessage::tool_result(call.id.clone(), result_text);
                messages.push(tool_message.clone());
                appended.push(tool_message);
            }
        }

        // The loop budget ran out; close the turn with what we have
        Ok(ChatOutcome {
            appended,
            steps,
            content: "I ran out of tool budget for this request; the last tool results are \
                      attached below."
                .to_string(),
            last_result,
        })
    }
}

/// Strip bulk fields (proof bytes, public inputs) before a result is fed
/// back to the model or echoed into a response
pub fn summarize_result(skill: Skill, result: &Value) -> Value {
    if !skill.is_proof_producing() {
        return result.clone();
    }
    let mut summary = result.clone();
    if let Some(map) = summary.as_object_mut() {
        map.remove("proof");
        map.remove("publicInputs");
    }
    summary
}

/// JSON schema of a skill's parameters
fn skill_schema(skill: Skill) -> Value {
    match skill {
        Skill::RequestSigning => json!({
            "type": "object",
            "properties": {
                "circuitId": { "type": "string", "description": "Circuit to prove; see get_supported_circuits" },
                "scope": { "type": "string", "description": "Nullifier domain, e.g. the app identifier" },
                "countryList": { "type": "array", "items": { "type": "string" }, "description": "ISO country codes (country circuit only)" },
                "isIncluded": { "type": "boolean", "description": "Prove inclusion (true) or exclusion (false) in the country list" }
            },
            "required": ["circuitId", "scope"]
        }),
        Skill::CheckStatus => json!({
            "type": "object",
            "properties": {
                "requestId": { "type": "string", "description": "Session id from request_signing" }
            },
            "required": ["requestId"]
        }),
        Skill::RequestPayment => json!({
            "type": "object",
            "properties": {
                "requestId": { "type": "string", "description": "Session id from request_signing" }
            },
            "required": ["requestId"]
        }),
        Skill::GenerateProof => json!({
            "type": "object",
            "properties": {
                "requestId": { "type": "string", "description": "Session id; omit only in direct mode" },
                "address": { "type": "string" },
                "signature": { "type": "string" },
                "scope": { "type": "string" },
                "circuitId": { "type": "string" },
                "countryList": { "type": "array", "items": { "type": "string" } },
                "isIncluded": { "type": "boolean" }
            }
        }),
        Skill::VerifyProof => json!({
            "type": "object",
            "properties": {
                "proofId": { "type": "string", "description": "Id of a stored proof" },
                "circuitId": { "type": "string" },
                "proof": { "type": "string" },
                "publicInputs": { "type": "array", "items": { "type": "string" } },
                "chainId": { "type": "integer" }
            }
        }),
        Skill::GetSupportedCircuits => json!({
            "type": "object",
            "properties": {
                "chainId": { "type": "integer" }
            }
        }),
    }
}
