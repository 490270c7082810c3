//! Discord webhook notifications for build outcomes.
//!
//! Best-effort delivery: a webhook failure is logged at warn and never
//! propagates into the build result.

use serde_json::json;

use crate::build::BuildOutcome;

const COLOR_GREEN: u32 = 0x0057_F287;
const COLOR_RED: u32 = 0x00ED_4245;

/// Posts build outcome embeds to a Discord webhook.
pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    /// Create a notifier for the given webhook URL.
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self { webhook_url: webhook_url.into(), client: reqwest::Client::new() }
    }

    /// Send a build outcome message. Failures are logged, not returned.
    pub async fn notify_build_outcome(&self, tag: &str, outcome: &BuildOutcome) {
        let (title, description, color) = match outcome {
            BuildOutcome::Succeeded => (
                format!("Build succeeded: {tag}"),
                "The release workflow completed successfully.".to_string(),
                COLOR_GREEN,
            ),
            BuildOutcome::Failed(reason) => {
                (format!("Build failed: {tag}"), format!("Reason: {reason}"), COLOR_RED)
            }
        };

        let payload = json!({
            "embeds": [{
                "title": title,
                "description": description,
                "color": color,
            }]
        });

        match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(tag, "Discord notification sent");
            }
            Ok(response) => {
                tracing::warn!(tag, status = %response.status(), "Discord webhook rejected notification");
            }
            Err(e) => {
                tracing::warn!(tag, error = %e, "Failed to send Discord notification");
            }
        }
    }
}
