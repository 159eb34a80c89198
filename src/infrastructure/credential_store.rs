use crate::domain::models::AuthToken;
use crate::infrastructure::error::TrackerError;
use std::sync::Mutex;

/// Durable storage for the backend bearer credential. The service purges it
/// whenever the backend reports the credential expired or invalid.
pub trait CredentialStore: Send + Sync {
    fn save_token(&self, token: &AuthToken) -> Result<(), TrackerError>;
    fn load_token(&self) -> Result<Option<AuthToken>, TrackerError>;
    fn delete_token(&self) -> Result<(), TrackerError>;
}

/// Token storage backed by the operating system keychain.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, TrackerError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| TrackerError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("timekeeper.api", "default")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_token(&self, token: &AuthToken) -> Result<(), TrackerError> {
        let payload = serde_json::to_string(token)
            .map_err(|error| TrackerError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| TrackerError::Credential(error.to_string()))
    }

    fn load_token(&self) -> Result<Option<AuthToken>, TrackerError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(TrackerError::Credential(error.to_string())),
        };

        let token = serde_json::from_str::<AuthToken>(&payload)
            .map_err(|error| TrackerError::Credential(error.to_string()))?;
        Ok(Some(token))
    }

    fn delete_token(&self) -> Result<(), TrackerError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(TrackerError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    token: Mutex<Option<AuthToken>>,
}

impl InMemoryCredentialStore {
    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Option<AuthToken>>, TrackerError> {
        self.token
            .lock()
            .map_err(|error| TrackerError::Credential(format!("in-memory lock poisoned: {error}")))
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_token(&self, token: &AuthToken) -> Result<(), TrackerError> {
        *self.guard()? = Some(token.clone());
        Ok(())
    }

    fn load_token(&self) -> Result<Option<AuthToken>, TrackerError> {
        Ok(self.guard()?.clone())
    }

    fn delete_token(&self) -> Result<(), TrackerError> {
        *self.guard()? = None;
        Ok(())
    }
}
