//! Skill outcomes
//!
//! After a skill executes, the surrounding surface (task worker, tool
//! adapter, chat router) attaches a small outcome record: which state the
//! work landed in, a one-sentence guidance line, and the suggested next
//! skill. This keeps the "what should the caller do now" phrasing in one
//! place instead of four adapters.

use crate::skills::Skill;
use crate::types::TaskState;
use crate::ProofportError;
use serde::Serialize;
use serde_json::Value;

/// Outcome of one skill execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillOutcome {
    /// Task state the execution maps to
    #[serde(skip)]
    pub state: TaskState,
    /// One-sentence natural-language guidance
    pub guidance: String,
    /// Suggested next skill, when the flow has an obvious next step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_skill: Option<&'static str>,
}

/// Outcome of a successful skill call
pub fn outcome_for(skill: Skill, result: &Value) -> SkillOutcome {
    match skill {
        Skill::RequestSigning => SkillOutcome {
            state: TaskState::InputRequired,
            guidance: format!(
                "Signing session created; have the wallet holder open {} and sign, then poll check_status",
                result.get("signingUrl").and_then(Value::as_str).unwrap_or("the signing URL")
            ),
            next_skill: Some("check_status"),
        },
        Skill::CheckStatus => match result.get("phase").and_then(Value::as_str) {
            Some("ready") => SkillOutcome {
                state: TaskState::Completed,
                guidance: "The session is ready; call generate_proof with this requestId".to_string(),
                next_skill: Some("generate_proof"),
            },
            Some("payment") => SkillOutcome {
                state: TaskState::InputRequired,
                guidance: "Signing is complete but payment is outstanding; call request_payment"
                    .to_string(),
                next_skill: Some("request_payment"),
            },
            Some("expired") => SkillOutcome {
                state: TaskState::Failed,
                guidance: "The session has expired; start over with request_signing".to_string(),
                next_skill: Some("request_signing"),
            },
            _ => SkillOutcome {
                state: TaskState::InputRequired,
                guidance: "Waiting for the wallet holder to sign; poll check_status".to_string(),
                next_skill: Some("check_status"),
            },
        },
        Skill::RequestPayment => SkillOutcome {
            state: TaskState::InputRequired,
            guidance: format!(
                "Payment of {} required; open {} to pay, then poll check_status",
                result.get("amount").and_then(Value::as_str).unwrap_or("the listed amount"),
                result.get("paymentUrl").and_then(Value::as_str).unwrap_or("the payment URL"),
            ),
            next_skill: Some("check_status"),
        },
        Skill::GenerateProof => SkillOutcome {
            state: TaskState::Completed,
            guidance: format!(
                "Proof generated; share {} or call verify_proof with the proofId",
                result.get("verifyUrl").and_then(Value::as_str).unwrap_or("the verify URL"),
            ),
            next_skill: Some("verify_proof"),
        },
        Skill::VerifyProof => {
            let valid = result.get("valid").and_then(Value::as_bool).unwrap_or(false);
            SkillOutcome {
                state: TaskState::Completed,
                guidance: if valid {
                    "The proof verified on-chain".to_string()
                } else {
                    "The proof did NOT verify; see the error field for the verifier's reason"
                        .to_string()
                },
                next_skill: None,
            }
        }
        Skill::GetSupportedCircuits => SkillOutcome {
            state: TaskState::Completed,
            guidance: "Pick a circuit id and call request_signing".to_string(),
            next_skill: Some("request_signing"),
        },
    }
}

/// Outcome of a failed skill call
pub fn outcome_for_error(err: &ProofportError) -> SkillOutcome {
    SkillOutcome {
        state: TaskState::Failed,
        guidance: err.to_string(),
        next_skill: None,
    }
}
