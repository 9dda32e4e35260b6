use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::backend::Services;
use crate::channel::{ChannelEvent, ChannelRequest, Dispatcher, SessionOutput};

/// Identità stabilita dopo un'autenticazione riuscita.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub remote_addr: Option<SocketAddr>,
    pub username: String,
    pub established_at: Instant,
}

/// Stato di una singola connessione SSH.
///
/// Il handler non esegue mai lavoro lento: ogni evento di canale viene
/// accodato al task [`Dispatcher`] del canale, che risponde tramite l'handle
/// della sessione.
pub struct SshSession {
    services: Services,
    peer_addr: Option<SocketAddr>,
    authenticated: Option<AuthenticatedSession>,
    channels: HashMap<ChannelId, UnboundedSender<ChannelEvent>>,
    close_after_exec: bool,
}

impl SshSession {
    pub fn new(services: Services, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            services,
            peer_addr,
            authenticated: None,
            channels: HashMap::new(),
            close_after_exec: false,
        }
    }

    pub fn close_after_exec(mut self, enabled: bool) -> Self {
        self.close_after_exec = enabled;
        self
    }

    pub fn authenticated(&self) -> Option<&AuthenticatedSession> {
        self.authenticated.as_ref()
    }

    fn peer(&self) -> String {
        self.peer_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown peer".to_string())
    }

    /// `false` se il canale non ha (più) un dispatcher in ascolto.
    fn forward(&mut self, id: ChannelId, event: ChannelEvent) -> bool {
        let Some(sender) = self.channels.get(&id) else {
            return false;
        };
        if sender.send(event).is_ok() {
            return true;
        }
        self.channels.remove(&id);
        false
    }

    fn forward_request(
        &mut self,
        id: ChannelId,
        request: ChannelRequest,
        session: &mut Session,
    ) -> Result<(), anyhow::Error> {
        let kind = request.kind().to_string();
        if !self.forward(id, ChannelEvent::Request(request)) {
            debug!("{} request on inactive channel {:?}", kind, id);
            session.channel_failure(id)?;
        }
        Ok(())
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

impl russh::server::Handler for SshSession {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.services.verifier.verify(user, password).await {
            Ok(true) => {
                info!("User {} authenticated from {}", user, self.peer());
                self.authenticated = Some(AuthenticatedSession {
                    remote_addr: self.peer_addr,
                    username: user.to_string(),
                    established_at: Instant::now(),
                });
                Ok(Auth::Accept)
            }
            Ok(false) => {
                info!("Rejected password for {} from {}", user, self.peer());
                Ok(reject())
            }
            Err(e) => {
                error!("Credential check for {} failed: {}", user, e);
                Ok(reject())
            }
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        debug!("Public key authentication is not supported ({})", user);
        Ok(reject())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Some(auth) = &self.authenticated else {
            return Ok(false);
        };

        let id = channel.id();
        let (tx, rx) = mpsc::unbounded_channel();
        let output = Arc::new(SessionOutput::new(session.handle(), id));
        let dispatcher = Dispatcher::new(auth.username.clone(), self.services.clone(), output)
            .close_after_exec(self.close_after_exec);
        tokio::spawn(dispatcher.run(rx));

        debug!("Session channel {:?} opened for {}", id, auth.username);
        self.channels.insert(id, tx);
        // gli eventi arrivano dai callback, il Channel non serve
        drop(channel);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        warn!(
            "Rejected direct-tcpip to {}:{} from {}",
            host_to_connect,
            port_to_connect,
            self.peer()
        );
        Ok(false)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        warn!("Rejected x11 channel from {}", self.peer());
        Ok(false)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        warn!("Rejected tcpip-forward of {}:{} from {}", address, port, self.peer());
        Ok(false)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::PtyReq {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
        };
        self.forward_request(channel, request, session)
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::WindowChange {
            cols: col_width,
            rows: row_height,
        };
        self.forward_request(channel, request, session)
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Env {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        };
        self.forward_request(channel, request, session)
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Other {
            kind: "x11-req".to_string(),
        };
        self.forward_request(channel, request, session)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward_request(channel, ChannelRequest::Shell, session)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward_request(channel, ChannelRequest::exec(data), session)
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        info!("subsystem: {}", name);
        let request = ChannelRequest::Other {
            kind: "subsystem".to_string(),
        };
        self.forward_request(channel, request, session)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, ChannelEvent::Data(data.to_vec()));
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, ChannelEvent::Eof);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // chiudere il sender termina il dispatcher (e la shell remota)
        self.channels.remove(&channel);
        debug!("Channel {:?} closed", channel);
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        match &self.authenticated {
            Some(auth) => info!(
                "Session of {} from {} ended after {:?}",
                auth.username,
                self.peer(),
                auth.established_at.elapsed()
            ),
            None => debug!("Unauthenticated connection from {} ended", self.peer()),
        }
    }
}
