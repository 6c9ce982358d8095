//! RaftKV Server Binary
//!
//! Starts a single-node RaftKV cluster on the in-process consensus module and
//! serves clients over TCP.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use raftkv::consensus::{LoopbackCluster, LoopbackNode};
use raftkv::fsm::{load_snapshot_file, FileSnapshotSink, FsmSnapshot, SnapshotMeta};
use raftkv::network::Server;
use raftkv::{Config, KvStateMachine, Node, ReadPolicy};
use tracing_subscriber::{fmt, EnvFilter};

/// RaftKV Server
#[derive(Parser, Debug)]
#[command(name = "raftkv-server")]
#[command(about = "Replicated key-value store node")]
#[command(version)]
struct Args {
    /// Node id
    #[arg(short, long, default_value = "node-1")]
    id: String,

    /// Data directory
    #[arg(short, long, default_value = "./raftkv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:10002")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Commit wait deadline in milliseconds
    #[arg(short, long, default_value = "3000")]
    apply_timeout_ms: u64,

    /// Where reads are served
    #[arg(short, long, value_enum, default_value = "stale")]
    read_policy: ReadPolicyArg,

    /// Seconds between snapshots (0 disables them)
    #[arg(short, long, default_value = "60")]
    snapshot_secs: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReadPolicyArg {
    Stale,
    Leader,
}

impl From<ReadPolicyArg> for ReadPolicy {
    fn from(arg: ReadPolicyArg) -> Self {
        match arg {
            ReadPolicyArg::Stale => ReadPolicy::Stale,
            ReadPolicyArg::Leader => ReadPolicy::Leader,
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,raftkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("RaftKV Server v{}", raftkv::VERSION);
    tracing::info!("Node id: {}", args.id);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    // Build config from args
    let config = Config::builder()
        .node_id(&args.id)
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .apply_timeout(Duration::from_millis(args.apply_timeout_ms))
        .read_policy(args.read_policy.into())
        .snapshot_interval(Duration::from_secs(args.snapshot_secs))
        .build();

    let (cluster, node) = match start_node(&config) {
        Ok(started) => started,
        Err(e) => {
            tracing::error!("Failed to start node: {}", e);
            std::process::exit(1);
        }
    };

    if !config.snapshot_interval.is_zero() {
        spawn_snapshotter(cluster, Arc::clone(&node), &config);
    }

    let server = match Server::bind(config, node) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

/// Restore the last snapshot, then bootstrap a one-voter cluster
fn start_node(config: &Config) -> raftkv::Result<(LoopbackCluster, Arc<Node>)> {
    let cluster = LoopbackCluster::new();

    if let Some(bytes) = load_snapshot_file(&config.snapshot_path())? {
        tracing::info!("Restoring snapshot from {}", config.snapshot_path().display());
        cluster.install_base(SnapshotMeta::default(), bytes)?;
    }

    let machine = Arc::new(KvStateMachine::new());
    let consensus: LoopbackNode =
        cluster.register(&config.node_id, &config.listen_addr, machine.clone())?;
    cluster.bootstrap(&[config.node_id.as_str()])?;

    let node = Node::new(config.clone(), Arc::new(consensus), machine);
    tracing::info!("Node bootstrapped as {}", node.role());
    Ok((cluster, Arc::new(node)))
}

/// Periodically persist the state machine and compact the log behind it
fn spawn_snapshotter(cluster: LoopbackCluster, node: Arc<Node>, config: &Config) {
    let interval = config.snapshot_interval;
    let path = config.snapshot_path();

    let spawned = thread::Builder::new()
        .name("snapshotter".to_string())
        .spawn(move || loop {
            thread::sleep(interval);

            let snapshot = node.machine().snapshot();
            let result = FileSnapshotSink::create(&path)
                .and_then(|mut sink| snapshot.persist(&mut sink))
                .and_then(|_| cluster.compact());
            match result {
                Ok(meta) => tracing::info!("Snapshot written at index {}", meta.index),
                Err(e) => tracing::warn!("Snapshot failed: {}", e),
            }
        });

    if let Err(e) = spawned {
        tracing::error!("Failed to start snapshot thread: {}", e);
    }
}
