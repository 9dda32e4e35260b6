use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;
use sqlx::postgres::PgConnectOptions;
use tokio::net::TcpListener;

use podgate::args::{Args, Command};
use podgate::backend::Services;
use podgate::backend::kubectl::{Kubectl, KubectlExecutor, SecretHostKeyStore};
use podgate::backend::postgres::PgCredentialStore;
use podgate::backend::resolver::NamingConvention;
use podgate::host_key::{
    self, FileHostKeyStore, HOST_KEY_RECORD, HostKeyOptions, HostKeyStore,
};
use podgate::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parsing degli argomenti da linea di comando
    let args = Args::parse();

    let db_options = PgConnectOptions::new()
        .host(&args.db_host)
        .port(args.db_port)
        .username(&args.db_user)
        .password(&args.db_password)
        .database(&args.db_name);
    let credentials = PgCredentialStore::connect(db_options)
        .await
        .with_context(|| format!("cannot connect to database {}", args.db_name))?;

    if let Some(Command::AddUser { username, password }) = &args.command {
        credentials.register(username, password).await?;
        return Ok(());
    }

    let kubectl = Kubectl::new(&args.kubectl, args.kubeconfig.clone());

    // Host key: su file se richiesto, altrimenti nel secret del namespace
    let store: Box<dyn HostKeyStore> = match &args.host_key_file {
        Some(path) => Box::new(FileHostKeyStore::new(path)),
        None => Box::new(SecretHostKeyStore::new(
            kubectl.clone(),
            args.namespace.as_str(),
            HOST_KEY_RECORD,
        )),
    };
    let options = HostKeyOptions {
        allow_ephemeral: args.ephemeral_host_key,
    };
    let key = host_key::obtain_host_key(store.as_ref(), options)
        .await
        .with_context(|| format!("cannot obtain host key from {}", store.describe()))?;
    info!("Host key fingerprint: {}", host_key::fingerprint(&key));

    let services = Services::new(
        Arc::new(credentials),
        Arc::new(NamingConvention::new(args.namespace.as_str(), args.pod_prefix.as_str())),
        Arc::new(KubectlExecutor::new(
            kubectl,
            args.shell.as_str(),
            args.exec_timeout(),
        )),
    );

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("cannot listen on {}:{}", args.host, args.port))?;

    info!("Starting SSH gateway on {}:{}", args.host, args.port);
    server::serve(
        server::ssh_config(key, args.idle_timeout()),
        listener,
        server::Server::new(services).close_after_exec(args.close_after_exec),
    )
    .await
    .context("server stopped")?;

    Ok(())
}
