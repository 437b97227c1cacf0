use std::{process::exit, sync::Arc};

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use config::ControllerConfig;
use controller::{
    cache::KubePodStatusWriter, netattachdef::start_netattachdef_reflector,
    pod::start_pod_reflector, reconciler::context::ReconcilerContext, wait_until_synced,
    PodNetworksController,
};
use dynamic_networks_core::{
    cri::{client::DEFAULT_RUNTIME_TIMEOUT, CriRuntime, GrpcSandboxService},
    delegate::{client::DEFAULT_DELEGATE_TIMEOUT, UnixSocketDelegateClient},
};
use events::KubeEventRecorder;
use kube::Client;
use log::{error, info, LevelFilter};
use queue::WorkQueue;
use tokio::signal::unix::{signal, SignalKind};

mod cli;
mod config;
mod controller;
mod events;
mod queue;

const COMMIT_HASH_ENV: &str = "DYNAMIC_NETWORK_CONTROLLER_COMMIT_HASH";
const UNKNOWN_VERSION: &str = "SHA-NOT-FOUND";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    configure_logger(cli.verbose_logging);

    info!("Starting pod networks controller version {}", version());

    let config = load_config(&cli);
    let client = create_client().await;
    let runtime = connect_runtime(&config).await;
    let delegate = UnixSocketDelegateClient::new(config.delegate_socket_path(), DEFAULT_DELEGATE_TIMEOUT);

    info!(
        "Using the {} runtime at '{}' and the delegate at '{}'",
        config.cri_type,
        config.cri_socket_path.display(),
        delegate.socket_path().display()
    );

    let queue = WorkQueue::default();

    info!("Creating pod and network attachment definition watchers...");

    let (pod_reflector, pods, pods_synced) = start_pod_reflector(&client, &cli.node_name, queue.clone());
    let (netdef_reflector, netdefs, netdefs_synced) = start_netattachdef_reflector(&client);

    let context = ReconcilerContext {
        pods: Arc::new(pods),
        netdefs: Arc::new(netdefs),
        runtime: Arc::new(runtime),
        delegate: Arc::new(delegate),
        events: Arc::new(KubeEventRecorder::new(client.clone(), &cli.node_name)),
        status_writer: Arc::new(KubePodStatusWriter::new(client)),
    };

    let controller = PodNetworksController::new(queue, Arc::new(context), cli.max_retries);
    let caches_synced = wait_until_synced(vec![pods_synced, netdefs_synced]);
    let shutdown = async {
        if let Err(err) = shutdown_signal().await {
            error!("Couldn't listen for shutdown signals! {err:?}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = pod_reflector => error!("Pod watcher stopped unexpectedly!"),
        _ = netdef_reflector => error!("Network attachment definition watcher stopped unexpectedly!"),
        _ = controller.run(caches_synced, shutdown) => {},
    }

    Ok(())
}

fn version() -> String {
    std::env::var(COMMIT_HASH_ENV).unwrap_or_else(|_| UNKNOWN_VERSION.to_owned())
}

fn load_config(cli: &Cli) -> ControllerConfig {
    match ControllerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            error!("Couldn't load the controller config! {error}");
            exit(1)
        }
    }
}

async fn create_client() -> Client {
    match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            error!("Couldn't create client! {error:?}");
            exit(2)
        }
    }
}

async fn connect_runtime(config: &ControllerConfig) -> CriRuntime<GrpcSandboxService> {
    match GrpcSandboxService::connect(&config.cri_socket_path, DEFAULT_RUNTIME_TIMEOUT).await {
        Ok(service) => CriRuntime::new(service),
        Err(error) => {
            error!("Couldn't connect to the {} runtime! {error}", config.cri_type);
            exit(2)
        }
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Couldn't install the SIGTERM handler!")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Couldn't listen for SIGINT!")?,
        _ = terminate.recv() => {},
    }

    info!("Received a shutdown signal");

    Ok(())
}

fn configure_logger(verbose: bool) {
    let mut logger = env_logger::builder();

    logger
        .default_format()
        .format_module_path(false)
        .filter_level(LevelFilter::Info);

    if verbose {
        logger.filter(Some("dynamic_networks_controller"), LevelFilter::Debug);
        logger.filter(Some("dynamic_networks_core"), LevelFilter::Debug);
    }

    logger.parse_default_env().init();
}
