//! Best-effort webhook notification of rotation outcomes.

use crate::error::KeyResult;
use crate::types::RotationResult;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RotationNotice<'a> {
    event: &'static str,
    #[serde(flatten)]
    result: &'a RotationResult,
}

/// Posts rotation summaries to a configured URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> KeyResult<Self> {
        let client = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends the summary. Never fails: errors are logged and dropped.
    pub async fn notify_rotation(&self, result: &RotationResult) {
        let body = RotationNotice {
            event: "key_rotation",
            result,
        };
        match self.client.post(&self.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("rotation notification delivered to {}", self.url);
            }
            Ok(resp) => {
                warn!(
                    "rotation notification to {} rejected with status {}",
                    self.url,
                    resp.status()
                );
            }
            Err(e) => {
                warn!("rotation notification to {} failed: {e}", self.url);
            }
        }
    }
}
