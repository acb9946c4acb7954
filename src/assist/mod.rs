//! AI-backed procurement helpers.
//!
//! Each helper makes exactly one completion call, asks for a bare JSON object
//! and deserializes it. All interpretation of natural language happens in the
//! model; nothing here tries to second-guess its output beyond shape checks.

pub mod comparison;
pub mod proposal_parser;
pub mod rfp_parser;

pub use comparison::{Comparison, ScoreUpdate, VendorScore, compare_proposals, score_updates};
pub use proposal_parser::{ParsedProposal, RfpContext, parse_vendor_response};
pub use rfp_parser::{ParsedRfp, parse_rfp};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::AssistError;
use crate::llm::{
    ChatMessage, CompletionRequest, FinishReason, LlmProvider, estimate_cost, extract_json_object,
};

/// Sampling temperature for every assist call.
const ASSIST_TEMPERATURE: f32 = 0.1;

/// Send one system + user prompt pair and deserialize the JSON reply.
pub(crate) async fn complete_json<T: DeserializeOwned>(
    llm: &dyn LlmProvider,
    task: &'static str,
    system_prompt: &str,
    user_prompt: String,
    max_tokens: u32,
) -> Result<T, AssistError> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_prompt),
    ])
    .with_temperature(ASSIST_TEMPERATURE)
    .with_max_tokens(max_tokens);

    let response = llm.complete(request).await?;

    debug!(
        task,
        model = llm.model_name(),
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        cost_usd = %estimate_cost(llm, &response),
        "Assist call complete"
    );

    if response.content.trim().is_empty() {
        let reason = if response.finish_reason == FinishReason::Length {
            "model hit the token limit before answering"
        } else {
            "model returned empty content"
        };
        return Err(AssistError::Incomplete {
            task,
            reason: reason.to_string(),
        });
    }

    let json = extract_json_object(&response.content);
    serde_json::from_str(&json).map_err(|e| {
        warn!(task, error = %e, raw_response = %response.content, "Model output is not valid JSON");
        AssistError::InvalidResponse {
            task,
            reason: e.to_string(),
            raw: response.content.clone(),
        }
    })
}

/// `Some(trimmed)` unless the string is blank.
pub(crate) fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
