//! Gateway SSH che autentica gli utenti con password e ne inoltra le
//! sessioni `exec` e `shell` dentro il pod assegnato.

pub mod args;
pub mod backend;
pub mod channel;
pub mod error;
pub mod host_key;
pub mod server;
pub mod ssh_session;

#[cfg(test)]
pub(crate) mod testing;

pub use server::Server;
pub use ssh_session::SshSession;
