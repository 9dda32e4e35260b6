//! Fake dei collaboratori esterni per i test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::backend::{
    CredentialVerifier, ExecOutput, RemoteExecutor, RemoteShell, Services, ShellProcess,
    TargetRef, TargetResolver,
};
use crate::channel::{ChannelGone, ChannelOutput};
use crate::error::{AuthError, ExecError, ResolveError};

/// Password in chiaro, solo per i test.
pub struct StaticCredentials {
    users: HashMap<String, String>,
    broken: bool,
}

impl StaticCredentials {
    pub fn new(users: &[(&str, &str)]) -> Self {
        Self {
            users: users
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
            broken: false,
        }
    }

    /// Simula un database irraggiungibile.
    pub fn broken() -> Self {
        Self {
            users: HashMap::new(),
            broken: true,
        }
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentials {
    async fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        if self.broken {
            return Err(AuthError::Store(sqlx::Error::PoolTimedOut));
        }
        Ok(self.users.get(username).is_some_and(|p| p == password))
    }
}

pub struct StaticResolver {
    targets: HashMap<String, TargetRef>,
}

impl StaticResolver {
    pub fn new(targets: &[(&str, TargetRef)]) -> Self {
        Self {
            targets: targets
                .iter()
                .map(|(u, t)| (u.to_string(), t.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl TargetResolver for StaticResolver {
    async fn resolve(&self, username: &str) -> Result<TargetRef, ResolveError> {
        self.targets
            .get(username)
            .cloned()
            .ok_or_else(|| ResolveError::NoTarget(username.to_string()))
    }
}

/// Capisce pochi comandi:
/// `echo <testo>`, `false`, `unreachable` (errore di trasporto).
/// Le shell interattive fanno eco dello stdin finché non ricevono EOF.
#[derive(Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<(TargetRef, String)>>,
    pub attached: Arc<AtomicBool>,
    pub killed: Arc<AtomicBool>,
}

impl FakeExecutor {
    pub fn calls(&self) -> Vec<(TargetRef, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn exec(&self, target: &TargetRef, command: &str) -> Result<ExecOutput, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((target.clone(), command.to_string()));

        let output = if let Some(text) = command.strip_prefix("echo ") {
            ExecOutput {
                stdout: format!("{}\n", text).into_bytes(),
                ..Default::default()
            }
        } else if command == "false" {
            ExecOutput {
                stderr: b"false: failed\n".to_vec(),
                exit_status: 1,
                ..Default::default()
            }
        } else if command == "unreachable" {
            return Err(ExecError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        } else {
            ExecOutput {
                stderr: format!("sh: {}: not found\n", command).into_bytes(),
                exit_status: 127,
                ..Default::default()
            }
        };
        Ok(output)
    }

    async fn attach(&self, _target: &TargetRef) -> Result<RemoteShell, ExecError> {
        self.attached.store(true, Ordering::SeqCst);

        let (stdin, mut remote_stdin) = tokio::io::duplex(1024);
        let (mut remote_stdout, stdout) = tokio::io::duplex(1024);
        let (remote_stderr, stderr) = tokio::io::duplex(64);
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut remote_stdin, &mut remote_stdout).await;
            drop(remote_stdout);
            drop(remote_stderr);
            let _ = exit_tx.send(0);
        });

        Ok(RemoteShell {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            process: Box::new(FakeProcess {
                exit: Some(exit_rx),
                killed: self.killed.clone(),
            }),
        })
    }
}

struct FakeProcess {
    exit: Option<oneshot::Receiver<u32>>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl ShellProcess for FakeProcess {
    async fn wait(&mut self) -> std::io::Result<u32> {
        let Some(exit) = self.exit.as_mut() else {
            return Ok(0);
        };
        let status = exit.await.unwrap_or(1);
        self.exit = None;
        Ok(status)
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.exit = None;
        Ok(())
    }
}

/// alice/wonderland ha un pod, bob/builder no.
pub fn fake_services() -> (Services, Arc<FakeExecutor>) {
    let executor = Arc::new(FakeExecutor::default());
    let services = Services::new(
        Arc::new(StaticCredentials::new(&[
            ("alice", "wonderland"),
            ("bob", "builder"),
        ])),
        Arc::new(StaticResolver::new(&[(
            "alice",
            TargetRef::new("default", "pod-alice"),
        )])),
        executor.clone(),
    );
    (services, executor)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Written {
    Data(Vec<u8>),
    Stderr(Vec<u8>),
    Reply(bool),
    ExitStatus(u32),
    Eof,
    Close,
}

#[derive(Default)]
pub struct RecordingOutput {
    written: Mutex<Vec<Written>>,
}

impl RecordingOutput {
    pub fn written(&self) -> Vec<Written> {
        self.written.lock().unwrap().clone()
    }

    pub fn stdout_text(&self) -> String {
        let mut text = String::new();
        for written in self.written() {
            if let Written::Data(bytes) = written {
                text.push_str(&String::from_utf8_lossy(&bytes));
            }
        }
        text
    }

    fn push(&self, written: Written) {
        self.written.lock().unwrap().push(written);
    }
}

#[async_trait]
impl ChannelOutput for RecordingOutput {
    async fn data(&self, bytes: &[u8]) -> Result<(), ChannelGone> {
        self.push(Written::Data(bytes.to_vec()));
        Ok(())
    }

    async fn stderr(&self, bytes: &[u8]) -> Result<(), ChannelGone> {
        self.push(Written::Stderr(bytes.to_vec()));
        Ok(())
    }

    async fn reply(&self, success: bool) {
        self.push(Written::Reply(success));
    }

    async fn exit_status(&self, status: u32) {
        self.push(Written::ExitStatus(status));
    }

    async fn eof(&self) {
        self.push(Written::Eof);
    }

    async fn close(&self) {
        self.push(Written::Close);
    }
}
