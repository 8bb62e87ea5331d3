use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use subtext_contracts::store::{Credentials, SecureStore};
use tracing::{info, warn};

use super::{first_message, response_json_or_error, ApiClient, RawResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Value,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub features: Vec<String>,
}

impl SubscriptionPlan {
    /// Analyses per month; `None` means unlimited.
    pub fn monthly_limit(&self) -> Option<u64> {
        if self.limit == -1 {
            return None;
        }
        Some(self.limit.max(0) as u64)
    }

    pub fn limit_label(&self) -> String {
        match self.monthly_limit() {
            Some(limit) => limit.to_string(),
            None => "Unlimited".to_string(),
        }
    }

    pub fn price_label(&self) -> String {
        match &self.price {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl ApiClient {
    /// Ask the backend whether the account is subscribed and cache the answer.
    ///
    /// Any failure reads as "not subscribed" and leaves the cache alone.
    pub fn subscription_status<S: SecureStore>(&self, credentials: &Credentials<S>) -> bool {
        let Some(token) = credentials.token() else {
            return false;
        };
        let endpoint = self.endpoint("subscription/status");
        let fetched = self
            .http
            .get(&endpoint)
            .bearer_auth(token)
            .send()
            .map_err(anyhow::Error::from)
            .and_then(|response| response_json_or_error("subscription status", response));
        match fetched {
            Ok(payload) => {
                let has_subscription = payload
                    .get("hasSubscription")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if let Err(err) = credentials.save_subscription_status(has_subscription) {
                    warn!(error = %err, "failed caching subscription status");
                }
                has_subscription
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch subscription status");
                false
            }
        }
    }

    pub fn subscription_plans(&self) -> Result<Vec<SubscriptionPlan>> {
        let endpoint = self.endpoint("subscriptions/plans");
        let response = self
            .http
            .get(&endpoint)
            .send()
            .with_context(|| format!("request to {endpoint} failed"))?;
        let payload = response_json_or_error("subscription plans", response)?;
        if payload.get("success").and_then(Value::as_bool) != Some(true) {
            bail!("Failed to load subscription plans");
        }
        let plans = payload.get("plans").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(plans).context("subscription plans payload is malformed")
    }

    /// Record a subscription the payment provider already approved.
    pub fn activate_subscription<S: SecureStore>(
        &self,
        credentials: &Credentials<S>,
        subscription_id: &str,
        tier: &str,
    ) -> Result<Value> {
        let token = credentials.usable_token()?;
        let endpoint = self.endpoint("subscriptions/create");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(token)
            .json(&json!({
                "subscriptionId": subscription_id,
                "tier": tier,
            }))
            .send()
            .with_context(|| format!("request to {endpoint} failed"))?;
        let raw = RawResponse::read(response)
            .with_context(|| format!("reading {endpoint} response failed"))?;
        let body = raw.json_or_null();
        if !raw.is_success() {
            let message = first_message(&body, &["message"])
                .unwrap_or_else(|| "Failed to activate subscription".to_string());
            bail!(message);
        }
        credentials.save_subscription_status(true)?;
        info!(tier, "subscription activated");
        Ok(body)
    }
}
