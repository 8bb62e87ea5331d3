use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use subtext_contracts::store::{Credentials, SecureStore, UserProfile};
use tracing::{debug, info, warn};

use super::{first_message, ApiClient, RawResponse};

pub const MIN_PASSWORD_CHARS: usize = 6;

/// What login or signup handed back, after persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub user: Option<UserProfile>,
    pub access_token: Option<String>,
    pub payload: Value,
}

impl ApiClient {
    pub fn signup<S: SecureStore>(
        &self,
        credentials: &Credentials<S>,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<AuthSession> {
        let (email, password, full_name) = (email.trim(), password.trim(), full_name.trim());
        if email.is_empty() || password.is_empty() || full_name.is_empty() {
            bail!("Please fill in all fields");
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            bail!("Password must be at least {MIN_PASSWORD_CHARS} characters");
        }
        let payload = json!({
            "email": email,
            "password": password,
            "fullName": full_name,
        });
        let raw = self.post_auth("auth/signup", &payload)?;
        let body = raw.json_or_null();
        if !raw.is_success() {
            let message = first_message(&body, &["details", "error"])
                .unwrap_or_else(|| "Signup failed".to_string());
            bail!(message);
        }
        persist_session(credentials, body)
    }

    pub fn login<S: SecureStore>(
        &self,
        credentials: &Credentials<S>,
        email: &str,
        password: &str,
    ) -> Result<AuthSession> {
        let payload = json!({
            "email": email,
            "password": password,
        });
        let raw = self.post_auth("auth/login", &payload)?;
        let body = raw.json_or_null();
        if !raw.is_success() {
            let message =
                first_message(&body, &["error"]).unwrap_or_else(|| "Login failed".to_string());
            bail!(message);
        }
        persist_session(credentials, body)
    }

    /// Tell the backend we are leaving, then forget the login locally.
    ///
    /// The remote call is best effort; local state is cleared regardless.
    pub fn logout<S: SecureStore>(&self, credentials: &Credentials<S>) -> Result<()> {
        if let Some(token) = credentials.token() {
            let endpoint = self.endpoint("auth/logout");
            match self.http.post(&endpoint).bearer_auth(token).send() {
                Ok(response) => debug!(status = response.status().as_u16(), "logout acknowledged"),
                Err(err) => warn!(error = %err, "logout request failed"),
            }
        }
        credentials.clear_login()?;
        info!("logged out");
        Ok(())
    }

    fn post_auth(&self, path: &str, payload: &Value) -> Result<RawResponse> {
        let endpoint = self.endpoint(path);
        let response = self
            .http
            .post(&endpoint)
            .json(payload)
            .send()
            .with_context(|| format!("request to {endpoint} failed"))?;
        RawResponse::read(response).with_context(|| format!("reading {endpoint} response failed"))
    }
}

fn persist_session<S: SecureStore>(
    credentials: &Credentials<S>,
    payload: Value,
) -> Result<AuthSession> {
    let access_token = payload
        .get("session")
        .and_then(|session| session.get("accessToken"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    let user = payload
        .get("user")
        .and_then(Value::as_object)
        .map(|fields| UserProfile::new(fields.clone()));

    // Profile first: a token without a profile is discarded by `check_auth`.
    if let Some(profile) = user.as_ref() {
        credentials.save_user_profile(profile)?;
    }
    if let Some(token) = access_token.as_deref() {
        credentials.save_token(token)?;
    }

    info!(
        has_token = access_token.is_some(),
        has_user = user.is_some(),
        "auth session stored"
    );
    Ok(AuthSession {
        user,
        access_token,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use subtext_contracts::store::{AuthStatus, Credentials, MemoryStore};

    use crate::api::mock_server::spawn_one_shot_server;
    use crate::api::ApiClient;
    use crate::config::ClientConfig;

    fn client(base: &str) -> anyhow::Result<ApiClient> {
        ApiClient::new(ClientConfig::default().with_api_base(base))
    }

    #[test]
    fn login_persists_token_and_profile() -> anyhow::Result<()> {
        let (base, requests) = spawn_one_shot_server(
            "200 OK",
            &json!({
                "session": {"accessToken": "access-0123456789"},
                "user": {"id": "u-1", "email": "a@b.c"}
            })
            .to_string(),
        );
        let creds = Credentials::new(MemoryStore::new());
        let session = client(&base)?.login(&creds, "a@b.c", "hunter22")?;

        assert_eq!(session.access_token.as_deref(), Some("access-0123456789"));
        assert_eq!(creds.token().as_deref(), Some("access-0123456789"));
        assert_eq!(
            creds.user_profile().and_then(|user| user.email().map(str::to_string)),
            Some("a@b.c".to_string())
        );

        let request = requests.recv()?;
        assert_eq!(request.path, "/auth/login");
        let body: Value = serde_json::from_slice(&request.body)?;
        assert_eq!(body, json!({"email": "a@b.c", "password": "hunter22"}));
        Ok(())
    }

    #[test]
    fn login_keeps_numeric_user_id_and_stays_authenticated() -> anyhow::Result<()> {
        let (base, _requests) = spawn_one_shot_server(
            "200 OK",
            &json!({
                "session": {"accessToken": "access-0123456789"},
                "user": {"id": 42, "email": "a@b.c"}
            })
            .to_string(),
        );
        let creds = Credentials::new(MemoryStore::new());
        let session = client(&base)?.login(&creds, "a@b.c", "hunter22")?;
        assert_eq!(session.user.as_ref().and_then(|user| user.id()), Some(&json!(42)));

        match creds.check_auth()? {
            AuthStatus::Authenticated { user, .. } => {
                assert_eq!(user.id(), Some(&json!(42)));
            }
            AuthStatus::Unauthenticated => panic!("login should survive the auth check"),
        }
        assert_eq!(creds.token().as_deref(), Some("access-0123456789"));
        Ok(())
    }

    #[test]
    fn signup_trims_fields_before_sending() -> anyhow::Result<()> {
        let (base, requests) = spawn_one_shot_server("200 OK", r#"{"user":{"id":"u-1"}}"#);
        let creds = Credentials::new(MemoryStore::new());
        client(&base)?.signup(&creds, "  a@b.c ", " secret1 ", " Ada ")?;
        let body: Value = serde_json::from_slice(&requests.recv()?.body)?;
        assert_eq!(
            body,
            json!({"email": "a@b.c", "password": "secret1", "fullName": "Ada"})
        );
        Ok(())
    }

    #[test]
    fn signup_rejects_blank_fields_and_short_passwords_offline() -> anyhow::Result<()> {
        let creds = Credentials::new(MemoryStore::new());
        let offline = client("http://127.0.0.1:1")?;

        let err = offline
            .signup(&creds, "  a@b.c ", "secret1", "   ")
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Please fill in all fields"));

        let err = offline
            .signup(&creds, "a@b.c", " 12345 ", "Ada")
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Password must be at least 6 characters"));
        Ok(())
    }

    #[test]
    fn login_failure_uses_backend_error() -> anyhow::Result<()> {
        let (base, _requests) =
            spawn_one_shot_server("400 Bad Request", r#"{"error":"Invalid credentials"}"#);
        let creds = Credentials::new(MemoryStore::new());
        let err = client(&base)?
            .login(&creds, "a@b.c", "wrong")
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Invalid credentials"));
        assert!(creds.token().is_none());
        Ok(())
    }

    #[test]
    fn signup_failure_prefers_details() -> anyhow::Result<()> {
        let (base, requests) = spawn_one_shot_server(
            "400 Bad Request",
            r#"{"error":"Signup failed","details":"Password too weak"}"#,
        );
        let creds = Credentials::new(MemoryStore::new());
        let err = client(&base)?
            .signup(&creds, "a@b.c", "123456", "Ada")
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Password too weak"));

        let body: Value = serde_json::from_slice(&requests.recv()?.body)?;
        assert_eq!(body["fullName"], json!("Ada"));
        Ok(())
    }

    #[test]
    fn signup_failure_without_json_uses_default_message() -> anyhow::Result<()> {
        let (base, _requests) = spawn_one_shot_server("500 Internal Server Error", "oops");
        let creds = Credentials::new(MemoryStore::new());
        let err = client(&base)?
            .signup(&creds, "a@b.c", "123456", "Ada")
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Signup failed"));
        Ok(())
    }

    #[test]
    fn logout_clears_local_state_even_when_backend_unreachable() -> anyhow::Result<()> {
        let creds = Credentials::new(MemoryStore::new());
        creds.save_token("access-0123456789")?;
        creds.save_subscription_status(true)?;
        let port = std::net::TcpListener::bind("127.0.0.1:0")?
            .local_addr()?
            .port();
        client(&format!("http://127.0.0.1:{port}"))?.logout(&creds)?;
        assert!(creds.token().is_none());
        assert!(!creds.has_subscription());
        Ok(())
    }
}
