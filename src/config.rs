//! Configuration for RaftKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a RaftKV node
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Unique id of this node inside the cluster
    pub node_id: String,

    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for snapshot files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── snapshot.json    (latest persisted snapshot)
    pub data_dir: PathBuf,

    /// How often the server persists a snapshot (zero disables it)
    pub snapshot_interval: Duration,

    // -------------------------------------------------------------------------
    // Write Path Configuration
    // -------------------------------------------------------------------------
    /// Deadline for a submitted command to be reported committed
    pub apply_timeout: Duration,

    /// Whether reads are served locally on any node or only on the leader
    pub read_policy: ReadPolicy,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address for clients
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

/// Read consistency policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// Serve reads from the local state machine on any node (may be stale)
    #[default]
    Stale,

    /// Serve reads only on the current leader, redirect elsewhere
    Leader,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            data_dir: PathBuf::from("./raftkv_data"),
            snapshot_interval: Duration::from_secs(60),
            apply_timeout: Duration::from_secs(3),
            read_policy: ReadPolicy::Stale,
            listen_addr: "127.0.0.1:10002".to_string(),
            max_connections: 1024,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    const SNAPSHOT_FILENAME: &'static str = "snapshot.json";

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Path of the persisted snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(Self::SNAPSHOT_FILENAME)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the node id
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = id.into();
        self
    }

    /// Set the data directory (root for snapshot files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the snapshot interval
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.config.snapshot_interval = interval;
        self
    }

    /// Set the commit wait deadline
    pub fn apply_timeout(mut self, timeout: Duration) -> Self {
        self.config.apply_timeout = timeout;
        self
    }

    /// Set the read policy
    pub fn read_policy(mut self, policy: ReadPolicy) -> Self {
        self.config.read_policy = policy;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
