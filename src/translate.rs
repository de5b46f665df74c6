//! Derivative-translation trigger for finished model archives.
//!
//! Completed `.zip` artifacts are intermediate: the viewer needs them run
//! through the derivative pipeline. The trigger is fire-and-forget from the
//! callback's point of view — the pipeline's own status API is the source of
//! truth for progress.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::StorageConfig;
use crate::error::TranslateError;

/// Starts a viewer translation for a stored model archive.
#[async_trait]
pub trait ModelTranslator: Send + Sync {
    async fn translate(&self, object_id: &str) -> Result<(), TranslateError>;
}

#[derive(Debug, Serialize)]
struct TranslationJob {
    input: TranslationInput,
    output: TranslationOutput,
}

#[derive(Debug, Serialize)]
struct TranslationInput {
    urn: String,
}

#[derive(Debug, Serialize)]
struct TranslationOutput {
    formats: Vec<TranslationFormat>,
}

#[derive(Debug, Serialize)]
struct TranslationFormat {
    #[serde(rename = "type")]
    kind: String,
    views: Vec<String>,
}

/// Reqwest-backed client for the derivative service's job endpoint.
pub struct DerivativeClient {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl DerivativeClient {
    pub fn new(client: reqwest::Client, config: &StorageConfig) -> Self {
        Self {
            client,
            base_url: config.derivative_base_url.trim_end_matches('/').to_string(),
            token: config.access_token.clone(),
        }
    }

    fn job_payload(object_id: &str) -> TranslationJob {
        TranslationJob {
            input: TranslationInput {
                urn: STANDARD_NO_PAD.encode(object_id),
            },
            output: TranslationOutput {
                formats: vec![TranslationFormat {
                    kind: "svf".to_string(),
                    views: vec!["2d".to_string(), "3d".to_string()],
                }],
            },
        }
    }
}

#[async_trait]
impl ModelTranslator for DerivativeClient {
    async fn translate(&self, object_id: &str) -> Result<(), TranslateError> {
        let resp = self
            .client
            .post(format!("{}/designdata/job", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(&Self::job_payload(object_id))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TranslateError::Rejected { status, body });
        }

        tracing::info!(object_id, "Translation started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_encodes_urn_and_views() {
        let payload =
            DerivativeClient::job_payload("urn:adsk.objects:os.object:acme-shelving/ab12.zip");
        let json = serde_json::to_value(&payload).unwrap();

        let urn = json["input"]["urn"].as_str().unwrap();
        let decoded = STANDARD_NO_PAD.decode(urn).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            "urn:adsk.objects:os.object:acme-shelving/ab12.zip"
        );

        assert_eq!(json["output"]["formats"][0]["type"], "svf");
        assert_eq!(json["output"]["formats"][0]["views"][0], "2d");
        assert_eq!(json["output"]["formats"][0]["views"][1], "3d");
    }
}
