//! User registration and credential checks.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::UserError;
use crate::model::User;
use crate::store::LedgerStore;

pub struct UserService {
    store: Arc<dyn LedgerStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, login: &str, password: &str) -> Result<User, UserError> {
        if login.is_empty() || password.is_empty() {
            return Err(UserError::EmptyCredentials);
        }
        Ok(self
            .store
            .insert_user(login, &hash_password(password))
            .await?)
    }

    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User, UserError> {
        let user = self
            .store
            .find_user_by_login(login)
            .await?
            .ok_or(UserError::InvalidCredentials)?;
        if user.password_hash != hash_password(password) {
            return Err(UserError::InvalidCredentials);
        }
        Ok(user)
    }
}

fn hash_password(password: &str) -> String {
    STANDARD.encode(Sha256::digest(password.as_bytes()))
}
