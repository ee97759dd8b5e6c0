// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! INCAR remediation advice from a Gemini model over the Generative Language REST API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::app::ports::RemediationAdvisorPort;
use crate::app::services::incar::patch_from_json;
use crate::app::types::PatchSet;

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub model: String,
    /// Base URL up to and including the API version, e.g. `.../v1beta`.
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

pub struct GeminiAdvisor {
    client: Client,
    settings: GeminiSettings,
}

impl GeminiAdvisor {
    pub fn new(settings: GeminiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, settings })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = self.url();
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });
        let reply: Value = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Request failed: POST {url}"))?
            .error_for_status()
            .with_context(|| format!("Request failed: POST {url}"))?
            .json()
            .await
            .context("Failed to decode model response")?;
        reply_text(&reply).ok_or_else(|| anyhow!("model response carried no text"))
    }
}

#[async_trait]
impl RemediationAdvisorPort for GeminiAdvisor {
    #[tracing::instrument(name = "advisor", level = "debug", skip_all, fields(model = %self.settings.model))]
    async fn analyze(&self, run_log_tail: &str, output_tail: &str, incar: &str) -> PatchSet {
        let prompt = build_prompt(run_log_tail, output_tail, incar);
        match self.generate(&prompt).await {
            Ok(text) => parse_advice(&text),
            Err(err) => {
                tracing::warn!("advisor request failed: {err:#}");
                PatchSet::new()
            }
        }
    }
}

/// Stand-in used when no API key is configured: never proposes a fix.
#[derive(Debug, Clone, Default)]
pub struct NoopAdvisor;

#[async_trait]
impl RemediationAdvisorPort for NoopAdvisor {
    async fn analyze(&self, _run_log_tail: &str, _output_tail: &str, _incar: &str) -> PatchSet {
        tracing::debug!("advisor disabled, no remediation proposed");
        PatchSet::new()
    }
}

pub fn build_prompt(run_log_tail: &str, output_tail: &str, incar: &str) -> String {
    format!(
        "You are a density functional theory expert specialised in VASP.\n\
         A VASP calculation has failed. Analyse the logs below and decide which INCAR \
         parameters must change to fix the error.\n\n\
         --- CURRENT INCAR ---\n{incar}\n---------------------\n\n\
         --- RUN.LOG (STDOUT) ---\n{run_log_tail}\n------------------------\n\n\
         --- OUTCAR (TAIL) ---\n{output_tail}\n---------------------\n\n\
         INSTRUCTIONS:\n\
         1. Identify the fatal error (e.g. ZHEGV, EDDDAV, FEXCP, slow electronic convergence).\n\
         2. Determine the corrective change to the INCAR file.\n\
         3. Return ONLY a JSON object whose keys are the INCAR tags to update or add.\n\
         4. Do not explain and do not use markdown. Return an empty object if no fix is clear.\n\n\
         Example output:\n{{\"ALGO\": \"Normal\", \"ISMEAR\": 0, \"SIGMA\": 0.05}}\n"
    )
}

/// Concatenated text parts of the first candidate.
fn reply_text(reply: &Value) -> Option<String> {
    let parts = reply
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Model text to patch set. Anything that is not a JSON object means no fix.
pub fn parse_advice(text: &str) -> PatchSet {
    let cleaned = strip_code_fences(text);
    let value: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("advisor reply is not JSON ({err}): {cleaned}");
            return PatchSet::new();
        }
    };
    match patch_from_json(&value) {
        Some(patch) => patch,
        None => {
            tracing::warn!("advisor reply is not a JSON object: {cleaned}");
            PatchSet::new()
        }
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::PatchValue;

    #[test]
    fn fenced_json_reply_becomes_patch() {
        let patch = parse_advice("```json\n{\"ALGO\": \"Normal\", \"ismear\": 0, \"LREAL\": false}\n```");
        let mut entries: Vec<(&str, &PatchValue)> = patch.iter().collect();
        entries.sort_by_key(|(tag, _)| *tag);
        assert_eq!(
            entries,
            vec![
                ("ALGO", &PatchValue::Text("Normal".to_string())),
                ("ISMEAR", &PatchValue::Integer(0)),
                ("LREAL", &PatchValue::Bool(false)),
            ]
        );
    }

    #[test]
    fn malformed_or_non_object_replies_mean_no_fix() {
        assert!(parse_advice("I would try ALGO = Normal").is_empty());
        assert!(parse_advice("[\"ALGO\", \"Normal\"]").is_empty());
        assert!(parse_advice("{}").is_empty());
        assert!(parse_advice("").is_empty());
    }

    #[test]
    fn reply_text_joins_parts_of_first_candidate() {
        let reply = json!({
            "candidates": [
                { "content": { "parts": [{ "text": "{\"ALGO\":" }, { "text": " \"Normal\"}" }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        });
        assert_eq!(
            reply_text(&reply).as_deref(),
            Some("{\"ALGO\": \"Normal\"}")
        );
        assert_eq!(reply_text(&json!({ "candidates": [] })), None);
        assert_eq!(reply_text(&json!({ "error": { "code": 429 } })), None);
    }

    #[test]
    fn prompt_carries_all_three_inputs() {
        let prompt = build_prompt("ZHEGV failed", "POSCAR: Si", "ALGO = Fast");
        assert!(prompt.contains("ZHEGV failed"));
        assert!(prompt.contains("POSCAR: Si"));
        assert!(prompt.contains("ALGO = Fast"));
        assert!(prompt.contains("{\"ALGO\": \"Normal\", \"ISMEAR\": 0, \"SIGMA\": 0.05}"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades_to_empty_patch() {
        let advisor = GeminiAdvisor::new(GeminiSettings {
            model: "gemini-2.0-flash".to_string(),
            endpoint: "http://127.0.0.1:9/v1beta".to_string(),
            api_key: "test".to_string(),
            timeout: Duration::from_secs(2),
        })
        .expect("client");
        assert!(advisor.analyze("ZHEGV", "", "ALGO = Fast").await.is_empty());
    }

    #[tokio::test]
    async fn noop_advisor_never_patches() {
        assert!(NoopAdvisor.analyze("ZHEGV", "", "").await.is_empty());
    }
}
