//! Accesso al cluster tramite il binario `kubectl`.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use super::{ExecOutput, RemoteExecutor, RemoteShell, ShellProcess, TargetRef};
use crate::error::{ExecError, HostKeyError};
use crate::host_key::HostKeyStore;

/// Chiave dentro `data` del secret che contiene la host key.
pub const HOST_KEY_DATA_KEY: &str = "key";

#[derive(Debug, Clone)]
pub struct Kubectl {
    program: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    /// Senza kubeconfig `kubectl` usa la configurazione in-cluster.
    pub fn new(program: impl Into<PathBuf>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            kubeconfig,
        }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Esegue `kubectl <args>` e raccoglie l'output. `stdin` viene scritto
    /// per intero e poi chiuso.
    pub async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> std::io::Result<Output> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("running {} {}", self.program_name(), args.join(" "));
        let mut child = cmd.spawn()?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await?;
                pipe.shutdown().await?;
            }
        }

        child.wait_with_output().await
    }
}

fn exit_code(status: std::process::ExitStatus) -> u32 {
    // terminato da un segnale
    status.code().map(|code| code as u32).unwrap_or(255)
}

/// Esecuzione remota con `kubectl exec`.
#[derive(Debug, Clone)]
pub struct KubectlExecutor {
    kubectl: Kubectl,
    shell: String,
    timeout: Option<Duration>,
}

impl KubectlExecutor {
    pub fn new(kubectl: Kubectl, shell: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            kubectl,
            shell: shell.into(),
            timeout,
        }
    }

    fn exec_args<'a>(&'a self, target: &'a TargetRef, interactive: bool) -> Vec<&'a str> {
        let mut args = vec!["exec"];
        if interactive {
            args.push("-i");
        }
        args.extend([
            "-n",
            target.namespace.as_str(),
            target.pod.as_str(),
            "--",
            self.shell.as_str(),
        ]);
        args
    }

    fn spawn_error(&self, source: std::io::Error) -> ExecError {
        ExecError::Spawn {
            program: self.kubectl.program_name(),
            source,
        }
    }
}

#[async_trait]
impl RemoteExecutor for KubectlExecutor {
    async fn exec(&self, target: &TargetRef, command: &str) -> Result<ExecOutput, ExecError> {
        let mut args = self.exec_args(target, false);
        args.extend(["-c", command]);

        let run = self.kubectl.run(&args, None);
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| ExecError::Timeout(limit))?,
            None => run.await,
        }
        .map_err(|e| self.spawn_error(e))?;

        Ok(ExecOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: exit_code(output.status),
        })
    }

    async fn attach(&self, target: &TargetRef) -> Result<RemoteShell, ExecError> {
        let mut child = self
            .kubectl
            .command()
            .args(self.exec_args(target, true))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let missing = || std::io::Error::other("child stdio was not captured");
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;

        info!("Attached shell {} in {}", self.shell, target);
        Ok(RemoteShell {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            process: Box::new(child),
        })
    }
}

#[async_trait]
impl ShellProcess for Child {
    async fn wait(&mut self) -> std::io::Result<u32> {
        Child::wait(self).await.map(exit_code)
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        Child::kill(self).await
    }
}

/// Host key salvata nel secret `name` del namespace dato.
#[derive(Debug, Clone)]
pub struct SecretHostKeyStore {
    kubectl: Kubectl,
    namespace: String,
    name: String,
}

impl SecretHostKeyStore {
    pub fn new(kubectl: Kubectl, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kubectl,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Manifest passato su stdin, così la chiave non compare tra gli argomenti
    /// del processo.
    fn manifest(&self, key: &[u8]) -> Vec<u8> {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "Opaque",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
            },
            "data": {
                HOST_KEY_DATA_KEY: STANDARD.encode(key),
            },
        })
        .to_string()
        .into_bytes()
    }

    fn store_error(&self, action: &str, output: &Output) -> HostKeyError {
        HostKeyError::Store(format!(
            "kubectl {} secret {}/{} failed: {}",
            action,
            self.namespace,
            self.name,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

#[async_trait]
impl HostKeyStore for SecretHostKeyStore {
    fn describe(&self) -> String {
        format!("secret {}/{}", self.namespace, self.name)
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, HostKeyError> {
        let jsonpath = format!("jsonpath={{.data.{}}}", HOST_KEY_DATA_KEY);
        let output = self
            .kubectl
            .run(
                &[
                    "get",
                    "secret",
                    self.name.as_str(),
                    "-n",
                    self.namespace.as_str(),
                    "-o",
                    jsonpath.as_str(),
                ],
                None,
            )
            .await?;

        if !output.status.success() {
            if String::from_utf8_lossy(&output.stderr).contains("NotFound") {
                return Ok(None);
            }
            return Err(self.store_error("get", &output));
        }

        let encoded = String::from_utf8_lossy(&output.stdout);
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Ok(None);
        }
        match STANDARD.decode(encoded) {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                // trattato come chiave illeggibile: verrà rigenerata
                warn!("Secret {}/{} holds invalid base64: {}", self.namespace, self.name, e);
                Ok(Some(Vec::new()))
            }
        }
    }

    async fn create(&self, key: &[u8]) -> Result<(), HostKeyError> {
        let output = self
            .kubectl
            .run(&["create", "-f", "-"], Some(&self.manifest(key)))
            .await?;

        if output.status.success() {
            Ok(())
        } else if String::from_utf8_lossy(&output.stderr).contains("AlreadyExists") {
            Err(HostKeyError::AlreadyExists)
        } else {
            Err(self.store_error("create", &output))
        }
    }

    async fn update(&self, key: &[u8]) -> Result<(), HostKeyError> {
        let output = self
            .kubectl
            .run(&["apply", "-f", "-"], Some(&self.manifest(key)))
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(self.store_error("apply", &output))
        }
    }
}
