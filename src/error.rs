use std::time::Duration;

use thiserror::Error;

/// Errori del Credential Verifier. Non vengono mai inoltrati al client.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("password check task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("username {0:?} is already registered")]
    UsernameTaken(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no pod is assigned to user {0:?}")]
    NoTarget(String),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum HostKeyError {
    /// Il record esiste già: chi crea deve ripiegare su un update.
    #[error("host key record already exists")]
    AlreadyExists,

    #[error("host key store error: {0}")]
    Store(String),

    #[error("host key i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("host key is not valid UTF-8")]
    NotUtf8,

    #[error("cannot decode host key: {0}")]
    Decode(#[from] russh::keys::Error),

    #[error("cannot generate or encode host key: {0}")]
    Key(#[from] russh::keys::ssh_key::Error),
}
