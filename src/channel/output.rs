use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use thiserror::Error;

/// Il canale (o l'intera connessione) è già stato chiuso.
#[derive(Debug, Error)]
#[error("channel is closed")]
pub struct ChannelGone;

/// Lato in scrittura di un canale `session`.
///
/// Le risposte e le notifiche sono best effort: se il peer se n'è andato
/// non c'è nessuno a cui segnalarlo.
#[async_trait]
pub trait ChannelOutput: Send + Sync {
    async fn data(&self, bytes: &[u8]) -> Result<(), ChannelGone>;

    /// Extended data di tipo 1 (stderr).
    async fn stderr(&self, bytes: &[u8]) -> Result<(), ChannelGone>;

    async fn reply(&self, success: bool);

    async fn exit_status(&self, status: u32);

    async fn eof(&self);

    async fn close(&self);
}

const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Scrive sul canale `id` tramite l'handle della sessione russh.
#[derive(Clone)]
pub struct SessionOutput {
    handle: Handle,
    id: ChannelId,
}

impl SessionOutput {
    pub fn new(handle: Handle, id: ChannelId) -> Self {
        Self { handle, id }
    }
}

#[async_trait]
impl ChannelOutput for SessionOutput {
    async fn data(&self, bytes: &[u8]) -> Result<(), ChannelGone> {
        self.handle
            .data(self.id, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| ChannelGone)
    }

    async fn stderr(&self, bytes: &[u8]) -> Result<(), ChannelGone> {
        self.handle
            .extended_data(self.id, SSH_EXTENDED_DATA_STDERR, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| ChannelGone)
    }

    async fn reply(&self, success: bool) {
        let _ = if success {
            self.handle.channel_success(self.id).await
        } else {
            self.handle.channel_failure(self.id).await
        };
    }

    async fn exit_status(&self, status: u32) {
        let _ = self.handle.exit_status_request(self.id, status).await;
    }

    async fn eof(&self) {
        let _ = self.handle.eof(self.id).await;
    }

    async fn close(&self) {
        let _ = self.handle.close(self.id).await;
    }
}
