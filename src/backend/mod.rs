//! Collaboratori esterni del gateway: verifica credenziali, risoluzione
//! utente -> pod ed esecuzione remota.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{AuthError, ExecError, ResolveError};

pub mod kubectl;
pub mod postgres;
pub mod resolver;

/// Pod di destinazione di un utente.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetRef {
    pub namespace: String,
    pub pod: String,
}

impl TargetRef {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)
    }
}

/// Output catturato di un comando one-shot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: u32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Processo remoto dietro una shell interattiva.
#[async_trait]
pub trait ShellProcess: Send {
    /// Attende la terminazione e restituisce l'exit status.
    /// Deve poter essere cancellato e richiamato.
    async fn wait(&mut self) -> std::io::Result<u32>;

    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Shell interattiva aperta nel pod.
pub struct RemoteShell {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub process: Box<dyn ShellProcess>,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// `Ok(false)` sia per utente sconosciuto che per password errata.
    async fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError>;
}

#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, username: &str) -> Result<TargetRef, ResolveError>;
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn exec(&self, target: &TargetRef, command: &str) -> Result<ExecOutput, ExecError>;

    async fn attach(&self, target: &TargetRef) -> Result<RemoteShell, ExecError>;
}

/// Servizi costruiti una volta all'avvio e condivisi da tutte le connessioni.
#[derive(Clone)]
pub struct Services {
    pub verifier: Arc<dyn CredentialVerifier>,
    pub resolver: Arc<dyn TargetResolver>,
    pub executor: Arc<dyn RemoteExecutor>,
}

impl Services {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        resolver: Arc<dyn TargetResolver>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            verifier,
            resolver,
            executor,
        }
    }
}
