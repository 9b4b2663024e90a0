//! Bidirectional Anthropic Messages ⇄ OpenAI Chat Completions converter
//! (spec §4.4). All four directions operate on `serde_json::Value` object
//! graphs rather than typed structs, since the two wire formats diverge
//! enough (tagged unions, optional fields, `content` as string-or-array)
//! that a tagged-value representation stays closer to the upstream APIs'
//! own looseness than a rigid typed model would (spec §9 Design Notes).

pub mod request;
pub mod response;
pub mod sse;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("malformed body: {0}")]
    Malformed(&'static str),
}

pub use request::{anthropic_request_to_openai, openai_request_to_anthropic};
pub use response::{anthropic_response_to_openai, openai_response_to_anthropic};
pub use sse::{AnthropicToOpenAiSse, OpenAiToAnthropicSse};
