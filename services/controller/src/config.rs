//! Controller configuration.

use std::time::Duration;

use anyhow::Result;

/// Process-wide configuration. Loaded from `TEGU_*` environment variables;
/// the CLI flags override the handful spec'd on the command line.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port agents connect to.
    pub agent_port: u16,

    /// Directory for checkpoint files.
    pub checkpoint_dir: String,

    /// Checkpoint files retained.
    pub checkpoint_keep: usize,

    /// Days before a retained checkpoint is dropped anyway.
    pub checkpoint_max_age_days: i64,

    /// Topology snapshot file consumed by the file oracle, if configured.
    pub topo_file: Option<String>,

    /// Administrative bearer secret with access to every pledge.
    pub super_cookie: String,

    /// `endpoint` restricts generated queue plans to endpoint queues.
    pub queue_type: QueueType,

    /// Default per-tenant link capacity percentage.
    pub default_ulcap: u32,

    /// Scheduler cadences.
    pub push_interval: Duration,
    pub queue_check_interval: Duration,
    pub checkpoint_interval: Duration,
    pub topo_refresh_interval: Duration,
    pub mac2phost_interval: Duration,

    /// Hard floor between intermediate-queue refreshes.
    pub intermed_refresh_floor: Duration,

    /// DSCP values the intermediate-queue scaffolding matches on.
    pub intermed_dscps: String,

    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    Endpoint,
    All,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let agent_port = std::env::var("TEGU_AGENT_PORT")
            .unwrap_or_else(|_| "29055".to_string())
            .parse()?;

        let checkpoint_dir = std::env::var("TEGU_CKPT_DIR")
            .unwrap_or_else(|_| "/var/lib/tegu/resmgr".to_string());

        let topo_file = std::env::var("TEGU_TOPO_FILE").ok();

        let super_cookie =
            std::env::var("TEGU_SUPER_COOKIE").unwrap_or_else(|_| "admin".to_string());

        let queue_type = match std::env::var("TEGU_QUEUE_TYPE").as_deref() {
            Ok("all") => QueueType::All,
            _ => QueueType::Endpoint,
        };

        let default_ulcap = std::env::var("TEGU_DEFAULT_ULCAP")
            .unwrap_or_else(|_| "100".to_string())
            .parse()?;

        let log_level = std::env::var("TEGU_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let intermed_dscps =
            std::env::var("TEGU_INTERMED_DSCPS").unwrap_or_else(|_| "40 41 42".to_string());

        Ok(Self {
            agent_port,
            checkpoint_dir,
            checkpoint_keep: 10,
            checkpoint_max_age_days: 90,
            topo_file,
            super_cookie,
            queue_type,
            default_ulcap,
            push_interval: Duration::from_secs(2),
            queue_check_interval: Duration::from_secs(1),
            checkpoint_interval: Duration::from_secs(180),
            topo_refresh_interval: Duration::from_secs(30),
            mac2phost_interval: Duration::from_secs(60),
            intermed_refresh_floor: Duration::from_secs(1800),
            intermed_dscps,
            log_level,
        })
    }
}
