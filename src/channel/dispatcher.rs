//! Macchina a stati di un singolo canale `session`.
//!
//! ```text
//! Idle --pty-req/window-change/env/exec--> Idle
//! Idle --exec (close_after_exec)--> Closed
//! Idle --shell--> Bridging --exit/close--> Closed
//! Idle --eof/errore di risoluzione--> Closed
//! ```

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;

use super::output::ChannelOutput;
use super::request::{ChannelEvent, ChannelRequest};
use crate::backend::{RemoteShell, Services, TargetRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    /// Terminale: il canale è collegato a una shell remota.
    Bridging,
    Closed,
}

pub struct Dispatcher {
    username: String,
    services: Services,
    output: Arc<dyn ChannelOutput>,
    state: ChannelState,
    close_after_exec: bool,
}

impl Dispatcher {
    pub fn new(
        username: impl Into<String>,
        services: Services,
        output: Arc<dyn ChannelOutput>,
    ) -> Self {
        Self {
            username: username.into(),
            services,
            output,
            state: ChannelState::Idle,
            close_after_exec: false,
        }
    }

    /// Chiude il canale (EOF + close) dopo la risposta a un `exec`, come fa
    /// un sshd classico. Senza, il canale resta in `Idle` finché il client
    /// non manda EOF.
    pub fn close_after_exec(mut self, enabled: bool) -> Self {
        self.close_after_exec = enabled;
        self
    }

    /// Consuma gli eventi del canale in ordine di arrivo finché il canale
    /// resta in `Idle`. Se lo stream finisce prima di qualunque richiesta
    /// esce senza fare nulla.
    pub async fn run(mut self, mut events: UnboundedReceiver<ChannelEvent>) {
        while self.state == ChannelState::Idle {
            let Some(event) = events.recv().await else {
                break;
            };
            match event {
                ChannelEvent::Request(request) => self.handle_request(request, &mut events).await,
                ChannelEvent::Data(bytes) => {
                    debug!("Dropping {} bytes sent to an idle channel", bytes.len())
                }
                ChannelEvent::Eof => self.close().await,
            }
        }
        debug!("Channel handler for {} finished", self.username);
    }

    async fn handle_request(
        &mut self,
        request: ChannelRequest,
        events: &mut UnboundedReceiver<ChannelEvent>,
    ) {
        match request {
            ChannelRequest::PtyReq { term, cols, rows } => {
                debug!("pty-req: term={}, cols={}, rows={}", term, cols, rows);
                self.output.reply(true).await;
            }
            ChannelRequest::WindowChange { .. } => self.output.reply(true).await,
            ChannelRequest::Env { name, .. } => {
                debug!("Ignoring env variable {}", name);
                self.output.reply(true).await;
            }
            ChannelRequest::Shell => self.shell(events).await,
            ChannelRequest::Exec { command } => self.exec(&command).await,
            ChannelRequest::Other { kind } => {
                debug!("Unsupported channel request: {}", kind);
                self.output.reply(false).await;
            }
        }
    }

    async fn resolve(&mut self) -> Option<TargetRef> {
        match self.services.resolver.resolve(&self.username).await {
            Ok(target) => Some(target),
            Err(e) => {
                warn!("Failed to get pod for user {}: {}", self.username, e);
                let _ = self.output.data(format!("Error: {}\r\n", e).as_bytes()).await;
                None
            }
        }
    }

    async fn exec(&mut self, command: &str) {
        debug!("exec for {}: {}", self.username, command);

        let Some(target) = self.resolve().await else {
            self.output.reply(false).await;
            self.close().await;
            return;
        };

        match self.services.executor.exec(&target, command).await {
            Ok(output) => {
                if !output.stdout.is_empty() {
                    let _ = self.output.data(&output.stdout).await;
                }
                if !output.stderr.is_empty() {
                    let _ = self.output.stderr(&output.stderr).await;
                }
                debug!("Command in {} exited with {}", target, output.exit_status);
                self.output.exit_status(output.exit_status).await;
                self.output.reply(output.success()).await;
            }
            Err(e) => {
                warn!("Command for {} in {} failed: {}", self.username, target, e);
                let line = format!("Failed to execute command: {}\n", e);
                let _ = self.output.data(line.as_bytes()).await;
                self.output.reply(false).await;
            }
        }

        if self.close_after_exec {
            self.output.eof().await;
            self.close().await;
        }
    }

    async fn shell(&mut self, events: &mut UnboundedReceiver<ChannelEvent>) {
        self.output.reply(true).await;
        let welcome = format!("Welcome to the SSH server, {}!\r\n", self.username);
        let _ = self.output.data(welcome.as_bytes()).await;

        let Some(target) = self.resolve().await else {
            self.close().await;
            return;
        };

        let shell = match self.services.executor.attach(&target).await {
            Ok(shell) => shell,
            Err(e) => {
                warn!("Failed to attach to {} for {}: {}", target, self.username, e);
                let _ = self
                    .output
                    .data(format!("Failed to start shell: {}\r\n", e).as_bytes())
                    .await;
                self.close().await;
                return;
            }
        };

        let banner = format!(
            "Connected to pod {} in namespace {}\r\n",
            target.pod, target.namespace
        );
        let _ = self.output.data(banner.as_bytes()).await;

        self.state = ChannelState::Bridging;
        self.bridge(shell, events).await;
        self.state = ChannelState::Closed;
    }

    async fn bridge(&mut self, shell: RemoteShell, events: &mut UnboundedReceiver<ChannelEvent>) {
        let RemoteShell {
            stdin,
            stdout,
            stderr,
            mut process,
        } = shell;

        let stdout_pump = tokio::spawn(pump(stdout, self.output.clone(), false));
        let stderr_pump = tokio::spawn(pump(stderr, self.output.clone(), true));
        let mut stdin = Some(stdin);

        let exited = loop {
            tokio::select! {
                status = process.wait() => break Some(status),
                event = events.recv() => match event {
                    Some(ChannelEvent::Data(bytes)) => {
                        let failed = match stdin.as_mut() {
                            Some(writer) => writer.write_all(&bytes).await.is_err(),
                            None => false,
                        };
                        if failed {
                            debug!("Remote shell stdin is closed");
                            stdin = None;
                        }
                    }
                    Some(ChannelEvent::Eof) => {
                        if let Some(mut writer) = stdin.take() {
                            let _ = writer.shutdown().await;
                        }
                    }
                    Some(ChannelEvent::Request(request)) => self.reply_while_bridging(request).await,
                    None => break None,
                },
            }
        };

        match exited {
            Some(status) => {
                let _ = stdout_pump.await;
                let _ = stderr_pump.await;
                let status = status.unwrap_or_else(|e| {
                    warn!("Failed to wait for remote shell: {}", e);
                    255
                });
                info!("Shell for {} exited with status {}", self.username, status);
                self.output.exit_status(status).await;
                self.output.eof().await;
                self.output.close().await;
            }
            None => {
                info!("Client closed the shell channel of {}", self.username);
                if let Err(e) = process.kill().await {
                    debug!("Failed to kill remote shell: {}", e);
                }
                stdout_pump.abort();
                stderr_pump.abort();
            }
        }
    }

    /// Durante il bridging sono ammesse solo richieste sul terminale.
    async fn reply_while_bridging(&self, request: ChannelRequest) {
        match request {
            ChannelRequest::PtyReq { .. }
            | ChannelRequest::WindowChange { .. }
            | ChannelRequest::Env { .. } => self.output.reply(true).await,
            other => {
                debug!("Rejecting {} request on an interactive channel", other.kind());
                self.output.reply(false).await;
            }
        }
    }

    async fn close(&mut self) {
        self.output.close().await;
        self.state = ChannelState::Closed;
    }
}

async fn pump(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    output: Arc<dyn ChannelOutput>,
    stderr: bool,
) {
    let mut buf = vec![0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Remote stream read failed: {}", e);
                break;
            }
        };
        let sent = if stderr {
            output.stderr(&buf[..n]).await
        } else {
            output.data(&buf[..n]).await
        };
        if sent.is_err() {
            break;
        }
    }
}
