//! Webhooks from the billing provider and from GitHub.

use bitserve::query::Stored;
use bitserve::session::UserData;
use bitserve::{Interpreter, InterpreterExt};
use hyper::StatusCode;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::Plan;
use crate::collaborators::{Email, SubscriptionStatus};
use crate::gift::{GiftData, Webhook, WebhookSubscription};
use crate::Site;

pub const GIFT_EMAIL_SUBJECT: &str = "We have a gift for you...";

/// A subscription changed at the billing provider.
///
/// The account's status is re-synced from the provider in a detached chain
/// while the main chain applies gift changes. A payload that cannot be
/// decoded is acknowledged so the provider stops retrying it.
pub fn recurly<I: Interpreter>(site: &Site) -> I {
    let site = site.clone();
    I::with_request_body(move |body| {
        let webhook: Webhook = match serde_json::from_slice(&body) {
            Ok(webhook) => webhook,
            Err(e) => {
                warn!(error = %e, "ignoring malformed billing webhook");
                return I::finish();
            }
        };
        info!(account = %webhook.account.account_code, "billing webhook");
        I::detach(
            sync_subscription_status(&site, webhook.account.account_code),
            update_gift(&site, webhook.subscription),
        )
    })
}

/// Copy the provider's view of the account onto the user record.
fn sync_subscription_status<I: Interpreter>(site: &Site, account_code: String) -> I {
    let lookup = site.billing.subscription_status(&account_code);
    I::await_async(lookup, move |result| {
        let status = match result {
            Ok(Some(status)) => status,
            Ok(None) => {
                error!(account = %account_code, "billing provider does not know this account");
                return I::finish();
            }
            Err(e) => return I::log_failure("load subscription status", Err::<(), _>(e)),
        };
        let Ok(user_id) = Uuid::parse_str(&account_code) else {
            error!(account = %account_code, "account code is not a user id");
            return I::finish();
        };
        I::run_query(
            Stored::<UserData>::select_by("id", user_id),
            move |result| match result {
                Ok(Some(user)) => apply_status(user, status),
                Ok(None) => {
                    error!(%user_id, "billing webhook for an unknown user");
                    I::finish()
                }
                Err(e) => I::log_failure("load user for billing webhook", Err::<(), _>(e)),
            },
        )
    })
}

fn apply_status<I: Interpreter>(mut user: Stored<UserData>, status: SubscriptionStatus) -> I {
    user.data.subscriber = status.subscriber;
    user.data.download_credits = status.download_credits;
    user.data.canceled = status.canceled;
    I::run_query(user.update(), |result| {
        I::log_failure("update user from billing webhook", result)
    })
}

/// Apply a gift subscription's state change. Repeated deliveries of the
/// same event change nothing.
fn update_gift<I: Interpreter>(site: &Site, subscription: Option<WebhookSubscription>) -> I {
    let Some(subscription) = subscription.filter(WebhookSubscription::is_gift) else {
        return I::finish();
    };
    let catalog = site.catalog();
    let mailer = site.mailer.clone();
    I::query_or_fail(
        Stored::<GiftData>::select_by("subscription_id", &subscription.uuid),
        move |gift| {
            let Some(mut gift) = gift else {
                error!(subscription = %subscription.uuid, "billing webhook for an unknown gift");
                return I::write_status("", StatusCode::INTERNAL_SERVER_ERROR);
            };
            match (subscription.state.as_str(), subscription.activated_at) {
                ("future", Some(activated_at)) if gift.data.send_at != activated_at => {
                    info!(gift = %gift.id, %activated_at, "rescheduling gift");
                    gift.data.send_at = activated_at;
                    I::query_or_fail(gift.update(), |()| I::finish())
                }
                ("active", _) if !gift.data.activated => {
                    let duration = catalog
                        .plan(&subscription.plan.plan_code)
                        .map_or_else(|| "unknown".to_string(), Plan::pretty_duration);
                    let email = Email {
                        to: gift.data.giftee_email.clone(),
                        name: gift.data.giftee_name.clone(),
                        subject: GIFT_EMAIL_SUBJECT.into(),
                        text: gift.data.giftee_email_text(&duration),
                    };
                    info!(gift = %gift.id, to = %email.to, "sending gift email");
                    gift.data.activated = true;
                    let notify = I::await_async(mailer.send(email), |result| {
                        I::log_failure("send gift email", result)
                    });
                    I::detach(notify, I::query_or_fail(gift.update(), |()| I::finish()))
                }
                _ => I::finish(),
            }
        },
    )
}

/// The content repository changed: reload the catalog after answering.
pub fn github<I: Interpreter>(site: &Site) -> I {
    let refresh = I::await_async(site.refresh_task(), |result| {
        I::log_failure("refresh catalog", result)
    });
    I::detach(refresh, I::finish())
}
