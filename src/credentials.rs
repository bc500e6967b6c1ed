// Credential collaborator
//
// The dashboard stores the login token elsewhere; the client only needs to
// read it at connect time and to drop it when the server rejects it.

use parking_lot::RwLock;

/// Source of the bearer token
pub trait CredentialProvider: Send + Sync {
    /// Current token, if the user is logged in
    fn token(&self) -> Option<String>;

    /// Forget the token (server answered 401)
    fn clear(&self);
}

/// In-memory token holder
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.is_empty())),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        *self.token.write() = (!token.is_empty()).then_some(token);
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn clear(&self) {
        *self.token.write() = None;
    }
}
