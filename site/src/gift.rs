//! Gift subscriptions and the billing provider's webhook payload.

use bitserve::query::Record;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftData {
    pub gifter_email: Option<String>,
    pub gifter_name: Option<String>,
    pub giftee_email: String,
    pub giftee_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub send_at: OffsetDateTime,
    pub message: String,
    pub subscription_id: Option<String>,
    pub activated: bool,
    pub plan_code: String,
}

impl Record for GiftData {
    const TABLE: &'static str = "gifts";
}

impl GiftData {
    /// Body of the notification sent to the giftee once the gift is active.
    pub fn giftee_email_text(&self, duration: &str) -> String {
        let gifter = self.gifter_name.as_deref().unwrap_or("Someone");
        let mut text = format!(
            "Hi {},\n\n{gifter} has given you {duration} of access to every episode.\n",
            self.giftee_name
        );
        if !self.message.is_empty() {
            text.push_str(&format!("\nThey wrote:\n\n{}\n", self.message));
        }
        text.push_str("\nSign in with GitHub to start watching.\n");
        text
    }
}

/// A webhook notification from the billing provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Webhook {
    pub account: WebhookAccount,
    #[serde(default)]
    pub subscription: Option<WebhookSubscription>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookAccount {
    pub account_code: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookSubscription {
    pub uuid: String,
    pub plan: WebhookPlan,
    pub state: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub activated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookPlan {
    pub plan_code: String,
}

impl WebhookSubscription {
    pub fn is_gift(&self) -> bool {
        self.plan.plan_code.starts_with("gift")
    }
}
