//! Tegu, the SDN reservation controller.
//!
//! Wires the actors together: reservation manager, network manager,
//! flow-queue manager, agent dispatcher, and the ticker that drives them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tegu_controller::agents::{AgentManager, AgentRequest};
use tegu_controller::checkpoint::CheckpointStore;
use tegu_controller::config::{Config, QueueType};
use tegu_controller::flowqueue::{FlowQueueManager, FqRequest};
use tegu_controller::network::{NetRequest, NetworkManager};
use tegu_controller::oracle::{FabricOracle, FileOracle, StaticOracle};
use tegu_controller::reservation::{ResRequest, ReservationManager};
use tegu_controller::ticker::{self, FOREVER};

#[derive(Debug, Parser)]
#[command(name = "tegu", about = "SDN reservation controller")]
struct Args {
    /// Checkpoint file to reload on startup.
    #[arg(short = 'c', long = "checkpoint")]
    checkpoint: Option<PathBuf>,

    /// Agent listen port (overrides TEGU_AGENT_PORT).
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Super cookie (overrides TEGU_SUPER_COOKIE).
    #[arg(short = 's', long = "super-cookie")]
    super_cookie: Option<String>,

    /// Raise log verbosity.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(p) = args.port {
        config.agent_port = p;
    }
    if let Some(c) = args.super_cookie {
        config.super_cookie = c;
    }

    let level = match args.verbose {
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(agent_port = config.agent_port, ckpt_dir = %config.checkpoint_dir, "starting tegu");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // mailboxes
    let (res_tx, res_rx) = mpsc::channel::<ResRequest>(512);
    let (net_tx, net_rx) = mpsc::channel::<NetRequest>(512);
    let (fq_tx, fq_rx) = mpsc::channel::<FqRequest>(512);
    let (agent_tx, agent_rx) = mpsc::channel::<AgentRequest>(512);
    let (connected_tx, connected_rx) = watch::channel(0usize);

    // actor D: agent dispatcher owns the TCP port
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.agent_port))
        .await
        .with_context(|| format!("binding agent port {}", config.agent_port))?;
    let agent_mgr = AgentManager::new(
        listener,
        agent_rx,
        net_tx.clone(),
        res_tx.clone(),
        connected_tx,
        shutdown_rx.clone(),
        config.intermed_dscps.clone(),
    );
    tokio::spawn(agent_mgr.run());

    // actor C: flow-queue manager
    let fq_mgr = FlowQueueManager::new(
        fq_rx,
        agent_tx.clone(),
        res_tx.clone(),
        connected_rx,
        shutdown_rx.clone(),
        config.intermed_refresh_floor,
        config.intermed_dscps.clone(),
    );
    tokio::spawn(fq_mgr.run());

    // actor B: network manager with its discovery oracle
    let oracle: Box<dyn FabricOracle> = match &config.topo_file {
        Some(path) => Box::new(FileOracle::new(path)),
        None => {
            warn!("no topology file configured, starting with an empty fabric");
            Box::new(StaticOracle(Default::default()))
        }
    };
    let net_mgr = NetworkManager::new(
        net_rx,
        config.default_ulcap,
        oracle,
        fq_tx.clone(),
        shutdown_rx.clone(),
    );
    tokio::spawn(net_mgr.run());

    // actor A: reservation manager
    let ckpt = CheckpointStore::open(
        &config.checkpoint_dir,
        config.checkpoint_keep,
        config.checkpoint_max_age_days,
    )
    .context("opening checkpoint directory")?;
    let res_mgr = ReservationManager::new(
        res_rx,
        net_tx.clone(),
        fq_tx.clone(),
        ckpt,
        config.super_cookie.clone(),
        config.queue_type == QueueType::Endpoint,
        shutdown_rx.clone(),
    );
    let res_task = tokio::spawn(res_mgr.run());

    // actor E: the ticker drives everyone else
    let ticker = ticker::spawn(shutdown_rx.clone());
    {
        let res = res_tx.clone();
        ticker.add_spot(config.push_interval, FOREVER, move || {
            let _ = res.try_send(ResRequest::PushTick);
        });
    }
    {
        let res = res_tx.clone();
        ticker.add_spot(config.queue_check_interval, FOREVER, move || {
            let _ = res.try_send(ResRequest::QueueTick);
        });
    }
    {
        let res = res_tx.clone();
        ticker.add_spot(config.checkpoint_interval, FOREVER, move || {
            let _ = res.try_send(ResRequest::Checkpoint);
        });
    }
    {
        let net = net_tx.clone();
        ticker.add_spot(config.topo_refresh_interval, FOREVER, move || {
            let _ = net.try_send(NetRequest::RefreshTopo);
        });
    }
    {
        let agents = agent_tx.clone();
        ticker.add_spot(config.mac2phost_interval, FOREVER, move || {
            let _ = agents.try_send(AgentRequest::Mac2PhostTick);
        });
    }

    // recover a prior inventory before the first push tick does any work
    if let Some(path) = args.checkpoint {
        let (tx, rx) = oneshot::channel();
        res_tx
            .send(ResRequest::Load {
                path: path.clone(),
                reply: tx,
            })
            .await
            .ok();
        match rx.await {
            Ok(Ok(n)) => info!(loaded = n, path = %path.display(), "checkpoint recovered"),
            Ok(Err(e)) => warn!(error = %e, "checkpoint recovery failed"),
            Err(_) => warn!("reservation manager did not answer the load request"),
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    // give the reservation manager a moment to park its checkpoint
    let _ = tokio::time::timeout(Duration::from_secs(5), res_task).await;
    Ok(())
}
