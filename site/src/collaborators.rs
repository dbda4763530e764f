//! Narrow interfaces to the billing provider, outbound email and GitHub
//! sign-in.
//!
//! Every call is an `AsyncTask`, so handlers await them through the
//! interpreter and tests answer them by task name.

use bitserve::{AsyncTask, TaskError};
use serde::{Deserialize, Serialize};

pub const SUBSCRIPTION_STATUS: &str = "billing.subscription_status";
pub const COUPON: &str = "billing.coupon";
pub const SEND_EMAIL: &str = "mailer.send";
pub const ACCESS_TOKEN: &str = "oauth.access_token";
pub const PROFILE: &str = "oauth.profile";

/// The billing provider's view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub subscriber: bool,
    pub download_credits: i64,
    pub canceled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub coupon_code: String,
    pub state: String,
    pub description: String,
    pub discount_percent: Option<u32>,
}

impl Coupon {
    pub fn is_redeemable(&self) -> bool {
        self.state == "redeemable"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub name: String,
    pub subject: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubProfile {
    pub id: i64,
    pub login: String,
    pub email: Option<String>,
    pub avatar_url: String,
    pub name: Option<String>,
}

pub trait Billing: Send + Sync {
    /// `None` when the provider does not know the account.
    fn subscription_status(&self, account_code: &str) -> AsyncTask<Option<SubscriptionStatus>>;

    fn coupon(&self, code: &str) -> AsyncTask<Coupon>;
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: Email) -> AsyncTask<()>;
}

pub trait OAuth: Send + Sync {
    /// Exchange an authorization code; `None` when the provider refuses.
    fn access_token(&self, code: &str) -> AsyncTask<Option<String>>;

    fn profile(&self, access_token: &str) -> AsyncTask<GithubProfile>;
}

/// Stands in for every collaborator when no credentials are configured;
/// each call fails with a descriptive error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

fn unconfigured<T: Send + 'static>(name: &str, detail: &str, what: &str) -> AsyncTask<T> {
    AsyncTask::ready(
        name,
        detail,
        Err(TaskError::Failed(format!("{what} is not configured"))),
    )
}

impl Billing for Unconfigured {
    fn subscription_status(&self, account_code: &str) -> AsyncTask<Option<SubscriptionStatus>> {
        unconfigured(SUBSCRIPTION_STATUS, account_code, "billing provider")
    }

    fn coupon(&self, code: &str) -> AsyncTask<Coupon> {
        unconfigured(COUPON, code, "billing provider")
    }
}

impl Mailer for Unconfigured {
    fn send(&self, email: Email) -> AsyncTask<()> {
        unconfigured(SEND_EMAIL, &email.to, "mailer")
    }
}

impl OAuth for Unconfigured {
    fn access_token(&self, _code: &str) -> AsyncTask<Option<String>> {
        unconfigured(ACCESS_TOKEN, "", "GitHub sign-in")
    }

    fn profile(&self, _access_token: &str) -> AsyncTask<GithubProfile> {
        unconfigured(PROFILE, "", "GitHub sign-in")
    }
}
