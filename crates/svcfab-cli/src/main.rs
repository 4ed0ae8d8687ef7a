//! # svcfab CLI Entry Point
//!
//! Main binary for the svcfab fabric. A node plays one role per process:
//!
//! ```bash
//! # Run an allocator: spawn service instances for the fabric on this host
//! svcfab allocator -c svcfab.json
//!
//! # Run a manager fronting the locally running "imgproc" instance
//! svcfab manager -c svcfab.json --service imgproc
//!
//! # Resolve a service to a provider (cache → discovery → allocation)
//! svcfab resolve -c svcfab.json imgproc
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use tokio_util::sync::CancellationToken;

use svcfab_common::identity;
use svcfab_common::overlay::discovery::MulticastDiscovery;
use svcfab_common::overlay::quic::{QuicOverlay, QuicOverlayConfig};
use svcfab_common::overlay::Overlay;
use svcfab_common::protocol::{ALLOCATOR_RENDEZVOUS, ALLOC_PROTOCOL_ID, REQUEST_PROTOCOL_ID};
use svcfab_common::registry::{RegistryCache, StaticRegistry};
use svcfab_fabric::{Controller, PeerCache, Sweeper, SweeperConfig};
use svcfab_metrics::FabricMetrics;
use svcfab_node::{AllocatorHandler, ManagerHandler, ProcessSpawner};

use config::Config;

#[derive(FromArgs)]
/// svcfab - peer-to-peer service allocation and routing fabric
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Allocator(AllocatorArgs),
    Manager(ManagerArgs),
    Resolve(ResolveArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "allocator")]
/// run the allocator role: spawn service instances on command
struct AllocatorArgs {
    /// path to the node config file
    #[argh(option, short = 'c', default = "PathBuf::from(\"svcfab.json\")")]
    config: PathBuf,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "manager")]
/// run the manager role: front a local service instance
struct ManagerArgs {
    /// path to the node config file
    #[argh(option, short = 'c', default = "PathBuf::from(\"svcfab.json\")")]
    config: PathBuf,

    /// service to front (overrides the config's manager section)
    #[argh(option)]
    service: Option<String>,

    /// local address of the fronted instance (overrides the config)
    #[argh(option)]
    service_addr: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "resolve")]
/// resolve a service name to a provider and print the result
struct ResolveArgs {
    /// path to the node config file
    #[argh(option, short = 'c', default = "PathBuf::from(\"svcfab.json\")")]
    config: PathBuf,

    /// service name to resolve
    #[argh(positional)]
    service: String,
}

/// Everything a running node shares between its tasks.
struct NodeContext {
    overlay: Arc<QuicOverlay>,
    discovery: Arc<MulticastDiscovery>,
    registry: Arc<RegistryCache>,
    metrics: Arc<FabricMetrics>,
    cancel: CancellationToken,
}

/// Identity, discovery, overlay endpoint, registry, and the metrics
/// endpoint - the parts every role needs.
fn bring_up(config: &Config) -> Result<NodeContext> {
    let id = identity::load_or_generate(&config.key_path)
        .context("failed to load node identity")?;
    tracing::info!(id = %id.short(), "node identity loaded");

    let cancel = CancellationToken::new();

    let discovery = Arc::new(
        MulticastDiscovery::new(id, &config.psk, &config.interface)
            .context("failed to initialize discovery")?,
    );
    for peer in &config.bootstrap_peers {
        let node_id = peer
            .node_id
            .parse()
            .with_context(|| format!("bad bootstrap node id: {}", peer.node_id))?;
        let addr = peer
            .addr
            .parse()
            .with_context(|| format!("bad bootstrap address: {}", peer.addr))?;
        discovery.pin_peer(&peer.rendezvous, node_id, addr);
    }

    let bind_addr: SocketAddr = format!("[::]:{}", config.overlay_port).parse()?;
    let overlay = QuicOverlay::new(
        id,
        QuicOverlayConfig {
            bind_addr,
            ..Default::default()
        },
        discovery.clone(),
        cancel.clone(),
    )
    .context("failed to bring up the overlay endpoint")?;

    discovery.clone().spawn(cancel.clone());
    overlay.clone().spawn_accept();

    let metrics = Arc::new(FabricMetrics::new());
    let metrics_addr = SocketAddr::from(([127, 0, 0, 1], config.metrics_port));
    tokio::spawn(svcfab_metrics::serve(
        metrics_addr,
        metrics.clone(),
        cancel.clone(),
    ));

    let registry = Arc::new(RegistryCache::with_default_ttl(Arc::new(
        StaticRegistry::new(config.service_infos()),
    )));

    Ok(NodeContext {
        overlay,
        discovery,
        registry,
        metrics,
        cancel,
    })
}

async fn run_allocator(args: AllocatorArgs) -> Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if config.allocator.spawn_command.is_empty() {
        anyhow::bail!("allocator.spawn_command is not configured");
    }

    let ctx = bring_up(&config)?;

    let spawner = Arc::new(ProcessSpawner::new(
        config.allocator.spawn_command.clone(),
        config.allocator.instance_addr.clone(),
    ));
    ctx.overlay.register_handler(
        ALLOC_PROTOCOL_ID,
        Arc::new(AllocatorHandler::new(spawner, ctx.metrics.clone())),
    );
    ctx.discovery.advertise(ALLOCATOR_RENDEZVOUS);

    tracing::info!("allocator running; waiting for requests");
    wait_for_shutdown(&ctx.cancel).await;
    Ok(())
}

async fn run_manager(args: ManagerArgs) -> Result<()> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(service) = args.service {
        config.manager.service = service;
    }
    if let Some(addr) = args.service_addr {
        config.manager.service_addr = addr;
    }
    if config.manager.service.is_empty() || config.manager.service_addr.is_empty() {
        anyhow::bail!("manager.service and manager.service_addr must be configured");
    }

    let ctx = bring_up(&config)?;

    let info = ctx
        .registry
        .get_or_request(&config.manager.service)
        .await
        .with_context(|| format!("unknown service: {}", config.manager.service))?;

    ctx.overlay.register_handler(
        REQUEST_PROTOCOL_ID,
        Arc::new(ManagerHandler::new(
            info.name.clone(),
            config.manager.service_addr.clone(),
            ctx.metrics.clone(),
        )),
    );
    // The service hash is the manager's rendezvous key.
    ctx.discovery.advertise(&info.hash);

    // The closed loop: track providers of other services and keep their
    // reliability fresh.
    let cache = Arc::new(PeerCache::new());
    Sweeper::new(
        cache,
        ctx.overlay.clone(),
        ctx.registry.clone(),
        ctx.metrics.clone(),
        SweeperConfig {
            interval: config.sweep_interval(),
        },
    )
    .spawn(ctx.cancel.clone());

    tracing::info!(
        service = %info.name,
        instance = %config.manager.service_addr,
        "manager running"
    );
    wait_for_shutdown(&ctx.cancel).await;
    Ok(())
}

async fn run_resolve(args: ResolveArgs) -> Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let ctx = bring_up(&config)?;

    let info = ctx
        .registry
        .get_or_request(&args.service)
        .await
        .with_context(|| format!("unknown service: {}", args.service))?;

    // Give discovery a couple of announce intervals to populate.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    let cache = Arc::new(PeerCache::new());
    let controller = Controller::new(
        ctx.overlay.clone(),
        cache,
        ctx.metrics.clone(),
    );

    let resolution = controller.resolve(&info.name, &info.hash).await?;
    println!(
        "{}",
        serde_json::json!({
            "service": info.name,
            "hash": info.hash,
            "peer": resolution.peer.to_string(),
            "address": resolution.address,
            "rtt_ms": resolution.perf.map(|p| p.rtt.as_millis() as u64),
        })
    );

    ctx.cancel.cancel();
    Ok(())
}

async fn wait_for_shutdown(cancel: &CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli: Cli = argh::from_env();
    match cli.command {
        Commands::Allocator(args) => run_allocator(args).await,
        Commands::Manager(args) => run_manager(args).await,
        Commands::Resolve(args) => run_resolve(args).await,
    }
}
