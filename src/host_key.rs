//! Identità persistente del server: la stessa host key a ogni riavvio, così
//! i client vedono sempre lo stesso fingerprint.

use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, info, warn};
use russh::keys::ssh_key::LineEnding;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, HashAlg, PrivateKey};
use tokio::io::AsyncWriteExt;

use crate::error::HostKeyError;

/// Nome del record condiviso da tutte le istanze del gateway.
pub const HOST_KEY_RECORD: &str = "ssh-host-key";

/// Storage del materiale della host key.
#[async_trait]
pub trait HostKeyStore: Send + Sync {
    fn describe(&self) -> String;

    /// `Ok(None)` se il record non esiste.
    async fn load(&self) -> Result<Option<Vec<u8>>, HostKeyError>;

    /// Deve fallire con [`HostKeyError::AlreadyExists`] se il record esiste.
    async fn create(&self, key: &[u8]) -> Result<(), HostKeyError>;

    async fn update(&self, key: &[u8]) -> Result<(), HostKeyError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HostKeyOptions {
    /// Se la persistenza fallisce, usa comunque la chiave appena generata.
    pub allow_ephemeral: bool,
}

/// Carica la host key dallo store, oppure ne genera e salva una nuova.
///
/// Un errore di lettura diverso da "record assente" è fatale: rigenerare
/// ruoterebbe l'identità del server. Due processi che generano in parallelo
/// convergono sull'ultima scrittura.
pub async fn obtain_host_key(
    store: &dyn HostKeyStore,
    options: HostKeyOptions,
) -> Result<PrivateKey, HostKeyError> {
    match store.load().await? {
        Some(bytes) => match parse_host_key(&bytes) {
            Ok(key) => {
                info!("Loaded host key from {}", store.describe());
                return Ok(key);
            }
            Err(e) => warn!(
                "Host key in {} is unreadable, generating a new one: {}",
                store.describe(),
                e
            ),
        },
        None => info!("No host key in {}, generating one", store.describe()),
    }

    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
    let encoded = key.to_openssh(LineEnding::LF)?;

    match persist(store, encoded.as_bytes()).await {
        Ok(()) => info!("Saved new host key to {}", store.describe()),
        Err(e) if options.allow_ephemeral => warn!(
            "Could not save host key to {} ({}), using an ephemeral key",
            store.describe(),
            e
        ),
        Err(e) => return Err(e),
    }

    Ok(key)
}

async fn persist(store: &dyn HostKeyStore, key: &[u8]) -> Result<(), HostKeyError> {
    match store.create(key).await {
        Err(HostKeyError::AlreadyExists) => {
            debug!("{} already exists, updating it", store.describe());
            store.update(key).await
        }
        other => other,
    }
}

/// Accetta chiavi OpenSSH e PEM (PKCS#1/PKCS#8).
pub fn parse_host_key(bytes: &[u8]) -> Result<PrivateKey, HostKeyError> {
    let text = std::str::from_utf8(bytes).map_err(|_| HostKeyError::NotUtf8)?;
    Ok(russh::keys::decode_secret_key(text, None)?)
}

pub fn fingerprint(key: &PrivateKey) -> String {
    key.public_key().fingerprint(HashAlg::Sha256).to_string()
}

/// Host key su file, per installazioni senza cluster.
#[derive(Debug, Clone)]
pub struct FileHostKeyStore {
    path: PathBuf,
}

impl FileHostKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open_options() -> tokio::fs::OpenOptions {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        #[cfg(unix)]
        options.mode(0o600);
        options
    }
}

#[async_trait]
impl HostKeyStore for FileHostKeyStore {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, HostKeyError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, key: &[u8]) -> Result<(), HostKeyError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match Self::open_options().create_new(true).open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(HostKeyError::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(key).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn update(&self, key: &[u8]) -> Result<(), HostKeyError> {
        // scrittura atomica: file temporaneo + rename
        let tmp = self.path.with_extension("tmp");
        let mut file = Self::open_options()
            .create(true)
            .truncate(true)
            .open(&tmp)
            .await?;
        file.write_all(key).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Store in memoria con errori iniettabili.
    #[derive(Default)]
    struct MemoryStore {
        record: Mutex<Option<Vec<u8>>>,
        unreachable: bool,
        read_only: bool,
        updates: AtomicUsize,
    }

    impl MemoryStore {
        fn with_record(bytes: &[u8]) -> Self {
            Self {
                record: Mutex::new(Some(bytes.to_vec())),
                ..Default::default()
            }
        }

        fn record(&self) -> Option<Vec<u8>> {
            self.record.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HostKeyStore for MemoryStore {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn load(&self) -> Result<Option<Vec<u8>>, HostKeyError> {
            if self.unreachable {
                return Err(HostKeyError::Store("connection refused".to_string()));
            }
            Ok(self.record())
        }

        async fn create(&self, key: &[u8]) -> Result<(), HostKeyError> {
            if self.read_only {
                return Err(HostKeyError::Store("forbidden".to_string()));
            }
            let mut record = self.record.lock().unwrap();
            if record.is_some() {
                return Err(HostKeyError::AlreadyExists);
            }
            *record = Some(key.to_vec());
            Ok(())
        }

        async fn update(&self, key: &[u8]) -> Result<(), HostKeyError> {
            if self.read_only {
                return Err(HostKeyError::Store("forbidden".to_string()));
            }
            self.updates.fetch_add(1, Ordering::SeqCst);
            *self.record.lock().unwrap() = Some(key.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_start_loads_the_persisted_key() {
        let store = MemoryStore::default();

        let first = obtain_host_key(&store, HostKeyOptions::default()).await.unwrap();
        assert!(store.record().is_some());

        let second = obtain_host_key(&store, HostKeyOptions::default()).await.unwrap();
        assert_eq!(fingerprint(&first), fingerprint(&second));
        assert_eq!(store.updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreadable_record_is_replaced_through_update() {
        let store = MemoryStore::with_record(b"not a key");

        let key = obtain_host_key(&store, HostKeyOptions::default()).await.unwrap();
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);

        let stored = parse_host_key(&store.record().unwrap()).unwrap();
        assert_eq!(fingerprint(&stored), fingerprint(&key));
    }

    #[tokio::test]
    async fn unreachable_store_is_fatal() {
        let store = MemoryStore {
            unreachable: true,
            ..Default::default()
        };
        let err = obtain_host_key(&store, HostKeyOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HostKeyError::Store(_)));
    }

    #[tokio::test]
    async fn failed_persistence_is_fatal_unless_ephemeral() {
        let store = MemoryStore {
            read_only: true,
            ..Default::default()
        };
        assert!(obtain_host_key(&store, HostKeyOptions::default()).await.is_err());

        let options = HostKeyOptions {
            allow_ephemeral: true,
        };
        assert!(obtain_host_key(&store, options).await.is_ok());
        assert!(store.record().is_none());
    }

    #[tokio::test]
    async fn concurrent_starts_converge_on_one_record() {
        let store = MemoryStore::default();
        let (a, b) = tokio::join!(
            obtain_host_key(&store, HostKeyOptions::default()),
            obtain_host_key(&store, HostKeyOptions::default()),
        );
        let (a, b) = (fingerprint(&a.unwrap()), fingerprint(&b.unwrap()));

        let stored = fingerprint(&parse_host_key(&store.record().unwrap()).unwrap());
        assert!(stored == a || stored == b);

        let restarted = obtain_host_key(&store, HostKeyOptions::default()).await.unwrap();
        assert_eq!(fingerprint(&restarted), stored);
    }

    #[tokio::test]
    async fn file_store_keeps_identity_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHostKeyStore::new(dir.path().join("keys").join("host_key"));

        let first = obtain_host_key(&store, HostKeyOptions::default()).await.unwrap();
        let second = obtain_host_key(&store, HostKeyOptions::default()).await.unwrap();
        assert_eq!(fingerprint(&first), fingerprint(&second));

        let err = store.create(b"other").await.unwrap_err();
        assert!(matches!(err, HostKeyError::AlreadyExists));
    }

    #[tokio::test]
    async fn file_store_update_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHostKeyStore::new(dir.path().join("host_key"));

        assert!(store.load().await.unwrap().is_none());
        store.create(b"one").await.unwrap();
        store.update(b"two").await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap(), b"two");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host_key");
        FileHostKeyStore::new(&path).create(b"key").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
