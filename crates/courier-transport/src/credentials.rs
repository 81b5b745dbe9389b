//! Relay credentials, resolved at connect time so rotation does not require
//! rebuilding the transport.

pub trait CredentialsProvider: Send + Sync {
    fn login(&self) -> String;
    fn password(&self) -> String;
}

/// Fixed credentials from configuration.
pub struct StaticCredentials {
    login: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn login(&self) -> String {
        self.login.clone()
    }

    fn password(&self) -> String {
        self.password.clone()
    }
}
