use super::{normalize_email, DirectoryError, Identity, IdentityDirectory};
use crate::hashing::SecretHasher;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug)]
struct Account {
    identity: Identity,
    password_hash: String,
}

/// In-process directory for tests and local runs.
#[derive(Debug)]
pub struct MemoryDirectory {
    accounts: Mutex<HashMap<String, Account>>,
    hasher: SecretHasher,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new(SecretHasher::light())
    }
}

impl MemoryDirectory {
    #[must_use]
    pub fn new(hasher: SecretHasher) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            hasher,
        }
    }

    /// Add (or replace) an account with an unverified email.
    ///
    /// # Errors
    ///
    /// Returns an error if the password cannot be hashed.
    pub async fn insert(&self, email: &str, password: &str) -> Result<Identity, DirectoryError> {
        let identity = Identity {
            user_id: Uuid::now_v7(),
            email: normalize_email(email),
            email_verified: false,
        };
        let password_hash = self.hasher.hash(password)?;
        self.accounts.lock().await.insert(
            identity.email.clone(),
            Account {
                identity: identity.clone(),
                password_hash,
            },
        );
        Ok(identity)
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, DirectoryError> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .get(&normalize_email(email))
            .map(|account| account.identity.clone()))
    }

    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Identity>, DirectoryError> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .get(&normalize_email(email))
            .filter(|account| self.hasher.verify(password, &account.password_hash))
            .map(|account| account.identity.clone()))
    }

    async fn set_password(&self, user_id: Uuid, password: &str) -> Result<(), DirectoryError> {
        let password_hash = self.hasher.hash(password)?;
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts
            .values_mut()
            .find(|account| account.identity.user_id == user_id)
        {
            account.password_hash = password_hash;
        }
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), DirectoryError> {
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts
            .values_mut()
            .find(|account| account.identity.user_id == user_id)
        {
            account.identity.email_verified = true;
        }
        Ok(())
    }
}
