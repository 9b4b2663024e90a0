//! OpenAI-compatible forwarder: plain OpenAI-compatible providers,
//! OpenRouter, Gemini's OpenAI-compat endpoint, and the ChatGPT-subscription
//! dispatch path (spec §4.7 "OpenAI-compatible", "OpenRouter", "Codex
//! subscription").

use crate::store::types::{AuthKind, ProviderTag};

use super::{send_and_collect, ForwardError, ForwardRequest, ForwardResponse, UsageExtractor};

const DEFAULT_BASE: &str = "https://api.openai.com";
const CHATGPT_BASE: &str = "https://chatgpt.com/backend-api/codex";
const GEMINI_MARKER: &str = "generativelanguage.googleapis.com";

pub async fn forward(
    client: &reqwest::Client,
    provider: ProviderTag,
    req: &ForwardRequest,
) -> Result<ForwardResponse, ForwardError> {
    let is_chatgpt_sub = matches!(provider, ProviderTag::OpenaiSub)
        && req.auth_type == AuthKind::Oauth
        && req.external_account_id.is_some();

    let base = if is_chatgpt_sub && req.base_url.is_none() {
        CHATGPT_BASE.to_string()
    } else {
        req.base_url.clone().unwrap_or_else(|| DEFAULT_BASE.to_string())
    };
    let base = base.trim_end_matches('/').to_string();

    let mut path = req.path.clone();
    if matches!(provider, ProviderTag::Openrouter) && !path.starts_with("/api") {
        path = format!("/api{path}");
    }
    if base.contains(GEMINI_MARKER) {
        path = rewrite_gemini_path(&path);
    }
    if base_ends_in_version_segment(&base) {
        path = drop_leading_v1(&path);
    }

    let url = format!("{base}{path}");

    let mut builder = client
        .request(req.method.clone(), &url)
        .body(req.body.clone())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", req.api_key));

    if let Some(org) = req.headers.get("openai-organization") {
        builder = builder.header("OpenAI-Organization", org);
    }

    if is_chatgpt_sub {
        builder = builder
            .header("ChatGPT-Account-ID", req.external_account_id.as_deref().unwrap_or_default())
            .header(reqwest::header::USER_AGENT, "codex_cli_rs/0.1.0")
            .header("Originator", "codex_cli_rs");
    }

    if matches!(provider, ProviderTag::Openrouter) {
        builder = builder
            .header("HTTP-Referer", "https://sandboxed.sh")
            .header("X-Title", "sandboxed-relay");
    }

    send_and_collect(builder, UsageExtractor::OpenAiCompat).await
}

/// `true` if `base`'s last path segment is a bare version marker (`v1`,
/// `v1beta`, ...), in which case the forwarded path must not also carry
/// `/v1` or the provider sees a doubled-up version segment (spec §4.7).
fn base_ends_in_version_segment(base: &str) -> bool {
    base.rsplit('/')
        .next()
        .map(|seg| seg.len() > 1 && seg.starts_with('v') && seg[1..].chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn drop_leading_v1(path: &str) -> String {
    path.strip_prefix("/v1").map(str::to_string).unwrap_or_else(|| path.to_string())
}

fn rewrite_gemini_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/v1/") {
        format!("/v1beta/openai/{rest}")
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_suffixed_base_drops_v1_from_path() {
        assert!(base_ends_in_version_segment("https://api.example.com/v1"));
        assert!(base_ends_in_version_segment("https://api.example.com/v2"));
        assert!(!base_ends_in_version_segment("https://api.example.com/v1beta"));
        assert!(!base_ends_in_version_segment("https://api.example.com"));
        assert_eq!(drop_leading_v1("/v1/chat/completions"), "/chat/completions");
    }

    #[test]
    fn gemini_path_rewritten_to_v1beta_openai() {
        assert_eq!(rewrite_gemini_path("/v1/chat/completions"), "/v1beta/openai/chat/completions");
    }
}
