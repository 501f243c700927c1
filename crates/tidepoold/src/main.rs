//! `tidepoold`: the Tidepool daemon.
//!
//! Looks for a cluster to join at startup, founds one if none answers in
//! time, and then answers join requests from other nodes.
//!
//! # Usage
//!
//! ```text
//! tidepoold start                                   # start with defaults
//! tidepoold start -c tidepool.toml                  # start with a config file
//! tidepoold start -l 127.0.0.1:5702 -m 127.0.0.1:5701  # join a known member
//! tidepoold start --dns tidepool.default.svc        # discover members via DNS
//! tidepoold check-config -c tidepool.toml           # print the effective config
//! ```

mod config;
mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tidepool_cluster::{
    ClusterState, DnsDiscovery, JoinCoordinator, JoinHandshake, JoinOutcome, JoinResponder,
    StaticAddressSource, StaticDiscovery, abort_signal,
};
use tidepool_net::{JoinListener, TcpTransport};
use tidepool_types::{Address, Member, NodeId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use config::{CliConfig, CandidateSource};
use handler::JoinHandler;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "tidepoold", version, about = "Tidepool cluster member daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join or found a cluster, then serve join requests.
    Start {
        #[command(flatten)]
        overrides: StartArgs,
    },

    /// Validate the configuration and print the effective join settings.
    CheckConfig {
        #[command(flatten)]
        overrides: StartArgs,
    },
}

/// Flags overriding config file values.
#[derive(Debug, Default, clap::Args)]
struct StartArgs {
    /// Override the listen address (e.g. "127.0.0.1:5702").
    #[arg(short, long)]
    listen: Option<String>,

    /// Override the advertised address.
    #[arg(short, long)]
    advertise: Option<String>,

    /// Known member to try. Can be specified multiple times.
    #[arg(short, long)]
    member: Vec<String>,

    /// Discover members by resolving this host name.
    #[arg(long)]
    dns: Option<String>,

    /// Seconds to look for a cluster before founding one.
    #[arg(long, env = "TIDEPOOL_MAX_WAIT")]
    max_wait: Option<u64>,

    /// Only join members presenting this cluster name.
    #[arg(long, env = "TIDEPOOL_CLUSTER_NAME")]
    cluster_name: Option<String>,

    /// Use public instead of private addresses of discovered peers.
    #[arg(long)]
    use_public_address: bool,
}

impl StartArgs {
    /// CLI args override config file values.
    fn apply(self, config: &mut CliConfig) {
        if let Some(addr) = self.listen {
            config.node.listen_addr = addr;
        }
        if let Some(addr) = self.advertise {
            config.node.advertise_addr = Some(addr);
        }
        if !self.member.is_empty() {
            config.discovery.members = self.member;
        }
        if let Some(dns) = self.dns {
            config.discovery.dns = Some(dns);
        }
        if let Some(secs) = self.max_wait {
            config.join.max_wait_secs = secs;
        }
        if let Some(name) = self.cluster_name {
            config.join.cluster_name = name;
        }
        if self.use_public_address {
            config.join.use_public_address = true;
        }
    }
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start { overrides } => {
            overrides.apply(&mut config);
            cmd_start(config).await
        }
        Commands::CheckConfig { overrides } => {
            overrides.apply(&mut config);
            cmd_check_config(&config)
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// tidepoold start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    let listen = config.listen_address()?;
    let local = local_member(&config)?;
    let join_config = config.join_config()?;
    let cluster_name = join_config.cluster_name.clone();

    info!(
        node_id = %local.node_id,
        listen = %listen,
        advertise = %local.address,
        generation = local.generation,
        cluster_name = %cluster_name,
        "starting tidepoold"
    );

    let identity = config
        .identity()?
        .map(|identity| {
            info!(kind = identity.kind(), "attaching identity to join requests");
            identity.to_payload()
        })
        .transpose()
        .context("failed to encode identity")?;

    let handshake = JoinHandshake::new(
        &join_config,
        Arc::new(TcpTransport::new()),
        &local,
        identity,
    );
    let coordinator = build_coordinator(&config, join_config, &local.address, handshake)?;

    // --- Serve join requests (answers `Pending` until the node has a view) ---
    let state = ClusterState::new(local);
    let listener = JoinListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind join listener on {listen}"))?;
    info!(addr = %listener.local_addr()?, "serving join requests");

    let mut views = state.subscribe();
    tokio::spawn(async move {
        while let Ok(view) = views.recv().await {
            info!(
                version = view.version,
                members = view.len(),
                master = %view.master,
                "membership view updated"
            );
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handler = JoinHandler::new(JoinResponder::new(state.clone(), cluster_name));
    let server = tokio::spawn(handler.clone().serve(listener, shutdown_rx));

    // --- Join attempt (Ctrl-C aborts it) ---
    let (abort, signal) = abort_signal();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });
    let outcome = coordinator.find_cluster_or_found(&signal).await;
    ctrl_c.abort();

    match outcome {
        Ok(JoinOutcome::Joined(view)) => state.install(view).await,
        Ok(JoinOutcome::BecomeFounder) => {
            state.found().await;
        }
        Ok(JoinOutcome::Aborted(reason)) => {
            info!(%reason, "join attempt stopped; exiting");
            stop_server(&shutdown_tx, server).await;
            return Ok(());
        }
        Err(e) => {
            stop_server(&shutdown_tx, server).await;
            return Err(e).context("join attempt failed");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!(handled = handler.handled(), "shutting down");
    stop_server(&shutdown_tx, server).await;
    Ok(())
}

async fn stop_server(shutdown: &watch::Sender<bool>, server: JoinHandle<()>) {
    let _ = shutdown.send(true);
    if let Err(e) = server.await {
        warn!(%e, "join listener task failed");
    }
}

/// The local member: advertised address, generation, and a node id derived
/// from the configured seed (or random bytes).
fn local_member(config: &CliConfig) -> Result<Member> {
    let node_id = match &config.node.node_seed {
        Some(seed) => NodeId::from_data(seed.as_bytes()),
        None => {
            use rand::RngCore;
            let mut seed = [0u8; 32];
            rand::rng().fill_bytes(&mut seed);
            NodeId::from_data(&seed)
        }
    };
    Ok(Member {
        node_id,
        address: config.advertise_address()?,
        generation: config.node.generation,
    })
}

/// Build the coordinator for the source selected by `[discovery]`.
fn build_coordinator(
    config: &CliConfig,
    join_config: tidepool_cluster::JoinConfig,
    local_address: &Address,
    handshake: JoinHandshake,
) -> Result<JoinCoordinator> {
    let coordinator = match config.candidate_source()? {
        CandidateSource::Dns { host, port } => {
            info!(%host, port, "discovering members via dns");
            let discovery = DnsDiscovery::new(host, port)?;
            JoinCoordinator::with_discovery(
                join_config,
                Arc::new(discovery),
                local_address.clone(),
                handshake,
            )?
        }
        CandidateSource::Peers(peers) => {
            info!(peers = peers.len(), "using configured peer records");
            JoinCoordinator::with_discovery(
                join_config,
                Arc::new(StaticDiscovery::new(peers)),
                local_address.clone(),
                handshake,
            )?
        }
        CandidateSource::Members(members) => {
            info!(members = members.len(), "using configured member list");
            let source = StaticAddressSource::new(local_address.clone(), members);
            JoinCoordinator::new(join_config, Arc::new(source), handshake)?
        }
    };
    Ok(coordinator)
}

// -----------------------------------------------------------------------
// tidepoold check-config
// -----------------------------------------------------------------------

fn cmd_check_config(config: &CliConfig) -> Result<()> {
    let listen = config.listen_address()?;
    let advertise = config.advertise_address()?;
    let join = config.join_config()?;
    let source = config.candidate_source()?;
    let identity = config.identity()?;

    println!("listen:             {listen}");
    println!("advertise:          {advertise}");
    println!("cluster name:       {}", join.cluster_name);
    println!("max wait:           {:?}", join.max_wait);
    println!("use public address: {}", join.use_public_address);
    println!("connect timeout:    {:?}", join.connect_timeout);
    println!("response timeout:   {:?}", join.response_timeout);
    println!(
        "backoff:            {:?} .. {:?}",
        join.backoff.min_park, join.backoff.max_park
    );
    match source {
        CandidateSource::Dns { host, port } => {
            println!("discovery:          dns {host} (port {port})");
        }
        CandidateSource::Peers(peers) => {
            println!("discovery:          {} peer records", peers.len());
        }
        CandidateSource::Members(members) => {
            let members: Vec<String> = members.iter().map(ToString::to_string).collect();
            println!("discovery:          members [{}]", members.join(", "));
        }
    }
    println!(
        "identity:           {}",
        identity.as_ref().map_or("none", |i| i.kind())
    );
    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
