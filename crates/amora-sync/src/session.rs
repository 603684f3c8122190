//! Authentication lifecycle: login, signup, logout, and session reads.
//!
//! The session lives in two store slots, `token` and `user`. This module is
//! the only writer of those slots.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::store::keys;
use crate::types::LoginResponse;
use crate::{
    ApiClient, KeyValueStore, LoginOutcome, Registration, Session, SignupReceipt, SyncError, User,
};

/// Owns the persisted session.
pub struct SessionManager {
    api: Arc<ApiClient>,
    store: Arc<dyn KeyValueStore>,
}

impl SessionManager {
    pub fn new(api: Arc<ApiClient>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { api, store }
    }

    /// Authenticate and persist the resulting session.
    ///
    /// Payload fields beyond the session are returned, not stored.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, SyncError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(SyncError::Validation(
                "email and password are required".to_string(),
            ));
        }

        #[derive(Serialize)]
        struct LoginRequest<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response: LoginResponse = self
            .api
            .post_json("/auth/login", &LoginRequest { email, password })
            .await?;
        let outcome = response.into_outcome();

        self.persist(&outcome.session).await?;
        info!(user_id = outcome.session.identity.id, "logged in");
        Ok(outcome)
    }

    /// Register a new account. Does not log in.
    #[tracing::instrument(skip(self, registration), fields(email = %registration.email))]
    pub async fn signup(&self, registration: &Registration) -> Result<SignupReceipt, SyncError> {
        if registration.email.trim().is_empty() || registration.password.is_empty() {
            return Err(SyncError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let receipt = self.api.post_json("/auth/signup", registration).await?;
        info!("registered account");
        Ok(receipt)
    }

    /// Clear the session. Never fails; cleanup errors are only logged.
    pub async fn logout(&self) {
        for key in [keys::TOKEN, keys::USER] {
            if let Err(e) = self.store.remove(key).await {
                warn!(key, error = %e, "failed to clear session slot during logout");
            }
        }
        info!("logged out");
    }

    /// The current session, or `None` unless both slots are populated.
    pub async fn current(&self) -> Option<Session> {
        let credential = self.read_slot(keys::TOKEN).await?;
        let raw_user = self.read_slot(keys::USER).await?;

        match serde_json::from_str::<User>(&raw_user) {
            Ok(identity) => Some(Session {
                credential,
                identity,
            }),
            Err(e) => {
                warn!(error = %e, "stored identity is unreadable, treating as logged out");
                None
            }
        }
    }

    /// The bearer credential, if a complete session exists.
    pub async fn token(&self) -> Option<String> {
        self.current().await.map(|s| s.credential)
    }

    /// The logged-in identity, if a complete session exists.
    pub async fn user_info(&self) -> Option<User> {
        self.current().await.map(|s| s.identity)
    }

    /// Like [`current`](Self::current), but absence is an [`SyncError::Auth`].
    pub async fn require(&self) -> Result<Session, SyncError> {
        self.current()
            .await
            .ok_or_else(|| SyncError::Auth("not authenticated".to_string()))
    }

    async fn read_slot(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "failed to read session slot");
                None
            }
        }
    }

    /// Write both halves; undo the credential if the identity cannot be saved.
    async fn persist(&self, session: &Session) -> Result<(), SyncError> {
        let identity = serde_json::to_string(&session.identity)?;

        self.store.set(keys::TOKEN, &session.credential).await?;
        if let Err(e) = self.store.set(keys::USER, &identity).await {
            warn!(error = %e, "failed to persist identity, rolling back credential");
            if let Err(rollback) = self.store.remove(keys::TOKEN).await {
                // `current` still reports no session while the user slot is empty.
                warn!(error = %rollback, "failed to roll back credential");
            }
            return Err(e.into());
        }

        debug!("persisted session");
        Ok(())
    }
}
