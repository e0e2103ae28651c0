use std::sync::{Arc, RwLock};

/// Shared handle to the caller's identity.
///
/// Cloning yields another handle to the same session. A session with no
/// user id is unauthenticated.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    user_id: Arc<RwLock<Option<String>>>,
}

impl AuthSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let session = Self::default();
        session.sign_in(user_id);
        session
    }

    /// Session from an optional configured id. Blank ids count as absent.
    pub fn from_user_id(user_id: Option<&str>) -> Self {
        match user_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Self::signed_in(id),
            None => Self::anonymous(),
        }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        if let Ok(mut guard) = self.user_id.write() {
            *guard = Some(user_id.into());
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut guard) = self.user_id.write() {
            *guard = None;
        }
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().ok().and_then(|guard| guard.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }
}
