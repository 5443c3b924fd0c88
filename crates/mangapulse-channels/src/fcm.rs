//! FCM push transport — one bulk `registration_ids` request per
//! notification, chunked at the API's 1000-token limit.

use async_trait::async_trait;
use serde::Deserialize;

use mangapulse_core::config::PushConfig;
use mangapulse_core::error::{MangaPulseError, Result};
use mangapulse_core::traits::Notifier;
use mangapulse_core::types::{BulkReport, NotifyData};

/// FCM allows at most 1000 registration ids per request.
const MAX_TOKENS_PER_REQUEST: usize = 1000;

/// Push transport over the FCM HTTP send endpoint.
pub struct FcmPush {
    config: PushConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: u32,
    #[serde(default)]
    failure: u32,
}

impl FcmPush {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Whether a send could possibly succeed with this configuration.
    pub fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.server_key.is_empty()
    }

    async fn send_chunk(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: &NotifyData,
    ) -> Result<BulkReport> {
        let resp = self
            .client
            .post(&self.config.endpoint)
            .header(
                "Authorization",
                format!("key={}", self.config.server_key),
            )
            .json(&serde_json::json!({
                "registration_ids": tokens,
                "priority": "high",
                "notification": {
                    "title": title,
                    "body": body,
                    "sound": "default",
                    "android_channel_id": "manga_updates",
                },
                "data": data,
            }))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| MangaPulseError::Notify(format!("FCM send failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MangaPulseError::Notify(format!(
                "FCM API error {status}: {body}"
            )));
        }

        let parsed: FcmResponse = resp
            .json()
            .await
            .map_err(|e| MangaPulseError::Notify(format!("Invalid FCM response: {e}")))?;

        Ok(BulkReport {
            success_count: parsed.success,
            failure_count: parsed.failure,
            total: tokens.len() as u32,
        })
    }
}

#[async_trait]
impl Notifier for FcmPush {
    /// Best-effort bulk send. A failed chunk counts all of its tokens as
    /// failures and the remaining chunks are still attempted.
    async fn send_bulk(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: &NotifyData,
    ) -> Result<BulkReport> {
        if tokens.is_empty() {
            return Ok(BulkReport::default());
        }
        if !self.is_configured() {
            return Err(MangaPulseError::Notify(
                "FCM is disabled or the server key is not configured".into(),
            ));
        }

        let mut report = BulkReport::default();
        for chunk in tokens.chunks(MAX_TOKENS_PER_REQUEST) {
            match self.send_chunk(chunk, title, body, data).await {
                Ok(chunk_report) => report.absorb(chunk_report),
                Err(e) => {
                    tracing::warn!("⚠️ FCM chunk of {} token(s) failed: {e}", chunk.len());
                    report.absorb(BulkReport {
                        success_count: 0,
                        failure_count: chunk.len() as u32,
                        total: chunk.len() as u32,
                    });
                }
            }
        }
        Ok(report)
    }
}
