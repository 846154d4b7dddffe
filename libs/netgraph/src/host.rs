//! Host records as reported by the fabric oracle.

use serde::{Deserialize, Serialize};

/// A point where a host attaches to the fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub switch: String,
    pub port: i32,
}

/// A VM or bare host known to the graph.
///
/// Owned by the network manager; mutated only when the oracle (or an agent
/// `map_mac2phost` report) says something changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    #[serde(default)]
    pub os_id: Option<String>,
    #[serde(default)]
    pub ip4: Option<String>,
    #[serde(default)]
    pub ip6: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    /// Physical host carrying the VM.
    #[serde(default)]
    pub phost: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub float_ip: Option<String>,
    /// Multi-homed hosts list several attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            os_id: None,
            ip4: None,
            ip6: None,
            mac: None,
            phost: None,
            gateway: None,
            float_ip: None,
            attachments: Vec::new(),
        }
    }

    /// The name without any `tenant/` prefix.
    pub fn bare_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}
