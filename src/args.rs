use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::backend::resolver::{DEFAULT_NAMESPACE, DEFAULT_POD_PREFIX};

/// Configurazione da linea di comando, con fallback sulle variabili d'ambiente
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "SSH gateway that runs exec and shell sessions inside each user's pod.\n\n\
        After an exec the channel stays open for further requests until the client \
        sends EOF; `ssh host cmd` from a terminal therefore waits for Ctrl-D. \
        Use --close-after-exec to close the channel as soon as the command ends."
)]
pub struct Args {
    /// Indirizzo IP su cui ascoltare
    #[arg(long, env = "PODGATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Porta su cui ascoltare
    #[arg(short, long, env = "PODGATE_PORT", default_value = "2222")]
    pub port: u16,

    /// Host del database PostgreSQL con le credenziali
    #[arg(long, env = "DB_HOST")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT")]
    pub db_port: u16,

    #[arg(long, env = "DB_USER")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: String,

    #[arg(long, env = "DB_NAME")]
    pub db_name: String,

    /// Kubeconfig da usare; se assente kubectl usa la configurazione in-cluster
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Binario kubectl
    #[arg(long, env = "PODGATE_KUBECTL", default_value = "kubectl")]
    pub kubectl: PathBuf,

    /// Namespace dei pod utente e del secret con la host key
    #[arg(long, env = "PODGATE_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Prefisso del nome del pod: l'utente `alice` va in `<prefisso>alice`
    #[arg(long, env = "PODGATE_POD_PREFIX", default_value = DEFAULT_POD_PREFIX)]
    pub pod_prefix: String,

    /// Shell usata nel pod per exec e sessioni interattive
    #[arg(long, env = "PODGATE_SHELL", default_value = "/bin/sh")]
    pub shell: String,

    /// Salva la host key su file invece che nel secret Kubernetes
    #[arg(long, env = "PODGATE_HOST_KEY_FILE")]
    pub host_key_file: Option<PathBuf>,

    /// Avvia anche se la host key generata non può essere salvata
    #[arg(long, env = "PODGATE_EPHEMERAL_HOST_KEY")]
    pub ephemeral_host_key: bool,

    /// Durata massima di un comando exec (in secondi)
    #[arg(long, env = "PODGATE_EXEC_TIMEOUT")]
    pub exec_timeout: Option<u64>,

    /// Chiude il canale appena termina un comando exec
    #[arg(long, env = "PODGATE_CLOSE_AFTER_EXEC")]
    pub close_after_exec: bool,

    /// Timeout di inattività delle connessioni (in secondi, 0 = nessuno)
    #[arg(long, env = "PODGATE_IDLE_TIMEOUT", default_value = "600")]
    pub idle_timeout: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Registra un nuovo utente ed esce
    AddUser {
        username: String,

        #[arg(long, env = "PODGATE_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

impl Args {
    pub fn exec_timeout(&self) -> Option<Duration> {
        self.exec_timeout.map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}
