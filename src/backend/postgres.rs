use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use super::CredentialVerifier;
use crate::error::AuthError;

/// Credenziali nella tabella `users (username, password)`, con la password
/// salvata come hash bcrypt.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apre il pool. Fallisce subito se il database non è raggiungibile.
    pub async fn connect(options: PgConnectOptions) -> Result<Self, AuthError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let password = password.to_owned();
        let hash =
            tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
                .await??;

        sqlx::query("INSERT INTO users (username, password) VALUES ($1, $2)")
            .bind(username)
            .bind(&hash)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if e.as_database_error()
                    .is_some_and(|db| db.is_unique_violation())
                {
                    AuthError::UsernameTaken(username.to_string())
                } else {
                    AuthError::Store(e)
                }
            })?;

        info!("Registered user {}", username);
        Ok(())
    }
}

#[async_trait]
impl CredentialVerifier for PgCredentialStore {
    async fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT password FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        match hash {
            Some(hash) => check_password(password, hash).await,
            None => Ok(false),
        }
    }
}

/// Confronto bcrypt fuori dal runtime async. Un hash corrotto vale come
/// password errata.
pub(crate) async fn check_password(password: &str, hash: String) -> Result<bool, AuthError> {
    let password = password.to_owned();
    let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await?;
    match outcome {
        Ok(matched) => Ok(matched),
        Err(e) => {
            warn!("Stored password hash is unusable: {}", e);
            Ok(false)
        }
    }
}
