use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::PipelineError;

use super::SecureStore;

pub const KEY_USER_TOKEN: &str = "userToken";
pub const KEY_USER_DATA: &str = "userData";
pub const KEY_HAS_SUBSCRIPTION: &str = "hasSubscription";
pub const KEY_HAS_SEEN_ONBOARDING: &str = "hasSeenOnboarding";

/// Tokens shorter than this are treated as malformed.
pub const MIN_TOKEN_CHARS: usize = 10;

/// Cached copy of the `user` object returned by login or signup.
///
/// Kept as the backend sent it; only the fields the client displays have
/// typed accessors, and those tolerate any JSON type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(Map<String, Value>);

impl UserProfile {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn id(&self) -> Option<&Value> {
        self.0.get("id").filter(|id| !id.is_null())
    }

    pub fn email(&self) -> Option<&str> {
        self.text("email")
    }

    pub fn full_name(&self) -> Option<&str> {
        self.text("fullName")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthStatus {
    Authenticated {
        user: UserProfile,
        has_subscription: bool,
    },
    Unauthenticated,
}

/// Typed access to the persisted credential and flags.
#[derive(Debug)]
pub struct Credentials<S: SecureStore> {
    store: S,
}

impl<S: SecureStore> Credentials<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn save_token(&self, token: &str) -> anyhow::Result<()> {
        self.store.set(KEY_USER_TOKEN, token)
    }

    pub fn token(&self) -> Option<String> {
        self.read(KEY_USER_TOKEN)
    }

    pub fn remove_token(&self) -> anyhow::Result<()> {
        self.store.delete(KEY_USER_TOKEN)
    }

    /// Token for an authenticated call, or `AuthRequired` if absent or malformed.
    pub fn usable_token(&self) -> Result<String, PipelineError> {
        let Some(token) = self.token() else {
            return Err(PipelineError::AuthRequired(
                "no authentication token".to_string(),
            ));
        };
        if token.chars().count() < MIN_TOKEN_CHARS {
            return Err(PipelineError::AuthRequired(
                "stored token is malformed".to_string(),
            ));
        }
        Ok(token)
    }

    pub fn save_user_profile(&self, user: &UserProfile) -> anyhow::Result<()> {
        self.store
            .set(KEY_USER_DATA, &serde_json::to_string(user)?)
    }

    pub fn user_profile(&self) -> Option<UserProfile> {
        let raw = self.read(KEY_USER_DATA)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(err) => {
                warn!(error = %err, "stored user profile is not valid JSON");
                None
            }
        }
    }

    pub fn remove_user_profile(&self) -> anyhow::Result<()> {
        self.store.delete(KEY_USER_DATA)
    }

    pub fn save_subscription_status(&self, has_subscription: bool) -> anyhow::Result<()> {
        self.store
            .set(KEY_HAS_SUBSCRIPTION, if has_subscription { "true" } else { "false" })
    }

    pub fn has_subscription(&self) -> bool {
        self.read(KEY_HAS_SUBSCRIPTION).as_deref() == Some("true")
    }

    pub fn remove_subscription_status(&self) -> anyhow::Result<()> {
        self.store.delete(KEY_HAS_SUBSCRIPTION)
    }

    pub fn has_seen_onboarding(&self) -> bool {
        self.read(KEY_HAS_SEEN_ONBOARDING).as_deref() == Some("true")
    }

    pub fn mark_onboarding_complete(&self) -> anyhow::Result<()> {
        self.store.set(KEY_HAS_SEEN_ONBOARDING, "true")
    }

    pub fn reset_onboarding(&self) -> anyhow::Result<()> {
        self.store.delete(KEY_HAS_SEEN_ONBOARDING)
    }

    /// Forget the logged-in user: token, profile and subscription flag.
    pub fn clear_login(&self) -> anyhow::Result<()> {
        self.remove_token()?;
        self.remove_user_profile()?;
        self.remove_subscription_status()
    }

    /// Wipe every key this application owns.
    pub fn clear_all(&self) -> anyhow::Result<()> {
        self.clear_login()?;
        self.reset_onboarding()
    }

    /// Startup auth check. A token without a cached profile is a broken login
    /// and is cleared.
    pub fn check_auth(&self) -> anyhow::Result<AuthStatus> {
        if self.token().is_none() {
            return Ok(AuthStatus::Unauthenticated);
        }
        match self.user_profile() {
            Some(user) => Ok(AuthStatus::Authenticated {
                user,
                has_subscription: self.has_subscription(),
            }),
            None => {
                warn!("token present without user profile; clearing login");
                self.remove_token()?;
                self.remove_subscription_status()?;
                Ok(AuthStatus::Unauthenticated)
            }
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "secure store read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AuthStatus, Credentials, UserProfile, KEY_USER_DATA};
    use crate::error::PipelineError;
    use crate::store::{MemoryStore, SecureStore};

    fn credentials() -> Credentials<MemoryStore> {
        Credentials::new(MemoryStore::new())
    }

    #[test]
    fn usable_token_requires_presence_and_length() -> anyhow::Result<()> {
        let creds = credentials();
        assert!(matches!(
            creds.usable_token(),
            Err(PipelineError::AuthRequired(_))
        ));
        creds.save_token("short")?;
        assert!(matches!(
            creds.usable_token(),
            Err(PipelineError::AuthRequired(_))
        ));
        creds.save_token("0123456789")?;
        assert_eq!(creds.usable_token(), Ok("0123456789".to_string()));
        Ok(())
    }

    #[test]
    fn flags_default_to_false() -> anyhow::Result<()> {
        let creds = credentials();
        assert!(!creds.has_subscription());
        assert!(!creds.has_seen_onboarding());
        creds.store().set("hasSubscription", "yes")?;
        assert!(!creds.has_subscription());
        creds.save_subscription_status(true)?;
        assert!(creds.has_subscription());
        creds.mark_onboarding_complete()?;
        assert!(creds.has_seen_onboarding());
        creds.reset_onboarding()?;
        assert!(!creds.has_seen_onboarding());
        Ok(())
    }

    #[test]
    fn user_profile_keeps_unknown_fields() -> anyhow::Result<()> {
        let creds = credentials();
        let user: UserProfile = serde_json::from_value(json!({
            "id": "u-1",
            "email": "a@b.c",
            "fullName": "Ada",
            "plan": "pro"
        }))?;
        creds.save_user_profile(&user)?;
        let loaded = creds.user_profile().unwrap_or_default();
        assert_eq!(loaded.full_name(), Some("Ada"));
        assert_eq!(loaded.get("plan"), Some(&json!("pro")));
        assert_eq!(loaded, user);
        Ok(())
    }

    #[test]
    fn user_profile_accepts_any_id_type() -> anyhow::Result<()> {
        let user: UserProfile = serde_json::from_value(json!({
            "id": 42,
            "email": null,
            "fullName": ["not", "a", "string"]
        }))?;
        assert_eq!(user.id(), Some(&json!(42)));
        assert_eq!(user.email(), None);
        assert_eq!(user.full_name(), None);
        assert!(serde_json::from_value::<UserProfile>(json!("u-1")).is_err());
        Ok(())
    }

    #[test]
    fn check_auth_clears_token_without_profile() -> anyhow::Result<()> {
        let creds = credentials();
        creds.save_token("0123456789abcdef")?;
        creds.save_subscription_status(true)?;
        assert_eq!(creds.check_auth()?, AuthStatus::Unauthenticated);
        assert!(creds.token().is_none());
        assert!(!creds.has_subscription());
        Ok(())
    }

    #[test]
    fn check_auth_reports_profile_and_subscription() -> anyhow::Result<()> {
        let creds = credentials();
        creds.save_token("0123456789abcdef")?;
        creds.store().set(KEY_USER_DATA, r#"{"email":"a@b.c"}"#)?;
        creds.save_subscription_status(true)?;
        match creds.check_auth()? {
            AuthStatus::Authenticated {
                user,
                has_subscription,
            } => {
                assert_eq!(user.email(), Some("a@b.c"));
                assert!(has_subscription);
            }
            AuthStatus::Unauthenticated => panic!("expected authenticated"),
        }
        Ok(())
    }

    #[test]
    fn clear_all_removes_every_key() -> anyhow::Result<()> {
        let creds = credentials();
        creds.save_token("0123456789abcdef")?;
        creds.save_user_profile(&UserProfile::default())?;
        creds.save_subscription_status(true)?;
        creds.mark_onboarding_complete()?;
        creds.clear_all()?;
        assert!(creds.token().is_none());
        assert!(creds.user_profile().is_none());
        assert!(!creds.has_subscription());
        assert!(!creds.has_seen_onboarding());
        Ok(())
    }
}
