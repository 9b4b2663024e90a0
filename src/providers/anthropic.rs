//! Anthropic forwarder (spec §4.7 "Anthropic").

use reqwest::header::HeaderValue;

use crate::store::types::AuthKind;

use super::{send_and_collect, ForwardError, ForwardRequest, ForwardResponse, UsageExtractor};

const DEFAULT_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub async fn forward(client: &reqwest::Client, req: &ForwardRequest) -> Result<ForwardResponse, ForwardError> {
    let base = req.base_url.as_deref().unwrap_or(DEFAULT_BASE).trim_end_matches('/');
    let url = format!("{base}{}", req.path);

    let mut builder = client
        .request(req.method.clone(), &url)
        .body(req.body.clone())
        .header(reqwest::header::CONTENT_TYPE, "application/json");

    let version = req
        .headers
        .get("anthropic-version")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(ANTHROPIC_VERSION);
    builder = builder.header("Anthropic-Version", version);

    if req.auth_type == AuthKind::Oauth {
        builder = builder
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", req.api_key))
            .header("Anthropic-Beta", merged_beta_header(req.headers.get("anthropic-beta")))
            .header("Anthropic-Dangerous-Direct-Browser-Access", "true");
        if let Some(ua) = req.headers.get(reqwest::header::USER_AGENT) {
            builder = builder.header(reqwest::header::USER_AGENT, ua);
        }
        if let Some(app) = req.headers.get("x-app") {
            builder = builder.header("X-App", app);
        }
    } else {
        builder = builder.header("X-Api-Key", &req.api_key);
    }

    send_and_collect(builder, UsageExtractor::Anthropic).await
}

/// `Anthropic-Beta` always carries both OAuth betas; anything the caller
/// already sent is preserved alongside them, deduplicated (spec §4.7
/// "preserve any upstream-provided extras").
fn merged_beta_header(existing: Option<&HeaderValue>) -> String {
    let mut parts: Vec<String> = vec!["oauth-2025-04-20".to_string(), "claude-code-20250219".to_string()];
    if let Some(value) = existing.and_then(|v| v.to_str().ok()) {
        for part in value.split(',') {
            let part = part.trim();
            if !part.is_empty() && !parts.iter().any(|p| p == part) {
                parts.push(part.to_string());
            }
        }
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_beta_header_always_carries_oauth_betas() {
        let merged = merged_beta_header(None);
        assert!(merged.contains("oauth-2025-04-20"));
        assert!(merged.contains("claude-code-20250219"));
    }

    #[test]
    fn merged_beta_header_preserves_extras_without_duplicating() {
        let extra = HeaderValue::from_static("oauth-2025-04-20, prompt-caching-2024-07-31");
        let merged = merged_beta_header(Some(&extra));
        assert_eq!(merged.matches("oauth-2025-04-20").count(), 1);
        assert!(merged.contains("prompt-caching-2024-07-31"));
    }
}
