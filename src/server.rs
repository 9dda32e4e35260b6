use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use russh::keys::PrivateKey;
use russh::server::Server as _;
use russh::{MethodKind, MethodSet};
use tokio::net::TcpListener;

use crate::SshSession;
use crate::backend::Services;

#[derive(Clone)]
pub struct Server {
    services: Services,
    close_after_exec: bool,
}

impl Server {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            close_after_exec: false,
        }
    }

    /// Vedi [`crate::channel::Dispatcher::close_after_exec`].
    pub fn close_after_exec(mut self, enabled: bool) -> Self {
        self.close_after_exec = enabled;
        self
    }
}

impl russh::server::Server for Server {
    type Handler = SshSession;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        if let Some(addr) = peer_addr {
            info!("New connection from {}", addr);
        }
        SshSession::new(self.services.clone(), peer_addr).close_after_exec(self.close_after_exec)
    }

    fn handle_session_error(&mut self, error: anyhow::Error) {
        warn!("Session ended with error: {:#}", error);
    }
}

/// Configurazione russh: solo autenticazione password, con la host key
/// persistente. `idle_timeout` a zero disattiva il timeout di inattività.
pub fn ssh_config(host_key: PrivateKey, idle_timeout: Duration) -> russh::server::Config {
    russh::server::Config {
        methods: MethodSet::from(&[MethodKind::Password][..]),
        auth_rejection_time: Duration::from_secs(3),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        inactivity_timeout: (!idle_timeout.is_zero()).then_some(idle_timeout),
        keys: vec![host_key],
        ..Default::default()
    }
}

/// Accetta connessioni finché il listener resta valido.
pub async fn serve(
    config: russh::server::Config,
    listener: TcpListener,
    mut server: Server,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    server.run_on_socket(Arc::new(config), &listener).await
}
