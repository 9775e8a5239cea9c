//! Fire-and-forget push-notification delivery.
//!
//! Notifications are best-effort: failures are logged and never retried.
//! When no delivery endpoint is configured the send is dropped with a
//! warning so the surrounding request still succeeds.

use serde_json::{json, Value};
use tracing::{info, warn};

/// A push notification addressed to a single device token.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub body: String,
    /// Optional structured payload forwarded to the client app.
    pub data: Option<Value>,
}

/// Build the delivery payload for a device token.
#[doc(hidden)]
pub fn build_payload(token: &str, notification: &Notification) -> Value {
    json!({
        "message": {
            "token": token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
            },
            "data": notification.data.clone().unwrap_or_else(|| json!({})),
        }
    })
}

/// Push delivery client.
#[derive(Debug, Clone)]
pub struct Notifier {
    endpoint: Option<String>,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    /// Create a notifier. `endpoint` unset means delivery is disabled.
    pub fn new(endpoint: Option<String>, auth_token: Option<String>) -> Self {
        Self {
            endpoint,
            auth_token,
            client: reqwest::Client::new(),
        }
    }

    /// Deliver a notification to a device token.
    ///
    /// Returns `true` when the delivery endpoint accepted the message.
    /// All failure modes are logged; nothing is retried.
    pub async fn send(&self, token: &str, notification: &Notification) -> bool {
        let Some(endpoint) = &self.endpoint else {
            warn!("push delivery endpoint not configured, dropping notification");
            return false;
        };

        let payload = build_payload(token, notification);
        let mut request = self.client.post(endpoint).json(&payload);
        if let Some(auth) = &self.auth_token {
            request = request.header("authorization", format!("Bearer {auth}"));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(title = %notification.title, "notification delivered");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "push endpoint rejected notification");
                false
            }
            Err(err) => {
                warn!(error = %err, "push delivery failed");
                false
            }
        }
    }
}
