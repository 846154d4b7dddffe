//! Mirror pledges: port mirroring toward a GRE tunnel, VLAN, or local port.

use serde::{Deserialize, Serialize};

use crate::window::Window;
use crate::PledgeError;

/// Where mirrored traffic is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MirrorOutput {
    /// GRE tunnel to an IPv4 or IPv6 collector.
    Gre(String),
    /// Mirror onto a VLAN.
    Vlan(u16),
    /// Mirror to a local port, referenced by UUID.
    Port(String),
}

impl MirrorOutput {
    /// Parse the output spec as the mirror API supplies it: an IP address,
    /// `vlan:<id>`, or a port UUID.
    pub fn parse(s: &str) -> Result<Self, PledgeError> {
        if s.parse::<std::net::IpAddr>().is_ok() {
            return Ok(Self::Gre(s.to_string()));
        }
        if let Some(v) = s.strip_prefix("vlan:") {
            let id: u16 = v
                .parse()
                .map_err(|_| PledgeError::InvalidOutput(s.to_string()))?;
            validate_vlan(id)?;
            return Ok(Self::Vlan(id));
        }
        if s.is_empty() {
            return Err(PledgeError::InvalidOutput(s.to_string()));
        }
        Ok(Self::Port(s.to_string()))
    }

    /// Render for the mirror wizard command line.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Gre(ip) => format!("gre:{ip}"),
            Self::Vlan(id) => format!("vlan:{id}"),
            Self::Port(uuid) => uuid.clone(),
        }
    }
}

fn validate_vlan(v: u16) -> Result<(), PledgeError> {
    if v > 4095 {
        return Err(PledgeError::InvalidVlan(v));
    }
    Ok(())
}

/// A port-mirroring reservation, realized on one physical host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorPledge {
    pub id: String,
    pub cookie: String,
    pub window: Window,
    /// Source ports to mirror, as neutron UUIDs or MAC addresses.
    pub ports: Vec<String>,
    pub output: MirrorOutput,
    /// Only mirror these VLANs when set.
    #[serde(default)]
    pub vlans: Vec<u16>,
    #[serde(default)]
    pub options: Option<String>,
    /// The compute host carrying the mirrored ports.
    pub phost: String,
    #[serde(default)]
    pub paused: bool,
    #[serde(skip)]
    pub pushed: bool,
    /// Set once the teardown command has gone out; mirrors need an explicit
    /// removal, unlike flow-mods which expire on their own.
    #[serde(skip)]
    pub removed: bool,
    /// Last wizard output/error reported by the agent.
    #[serde(skip)]
    pub last_output: Option<String>,
    #[serde(skip)]
    pub last_error: Option<String>,
}

impl MirrorPledge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Option<String>,
        cookie: impl Into<String>,
        ports: Vec<String>,
        output: MirrorOutput,
        vlans: Vec<u16>,
        phost: impl Into<String>,
        commence: i64,
        expiry: i64,
        now: i64,
    ) -> Result<Self, PledgeError> {
        if ports.is_empty() {
            return Err(PledgeError::NoMirrorPorts);
        }
        for v in &vlans {
            validate_vlan(*v)?;
        }
        Ok(Self {
            id: name.unwrap_or_else(|| mint_mirror_name(now, 0)),
            cookie: cookie.into(),
            window: Window::new(commence, expiry, now)?,
            ports,
            output,
            vlans,
            options: None,
            phost: phost.into(),
            paused: false,
            pushed: false,
            removed: false,
            last_output: None,
            last_error: None,
        })
    }
}

/// Mint a `mir-` prefixed name unique per (second, sequence).
pub fn mint_mirror_name(now: i64, seq: u32) -> String {
    format!("mir-{now:x}_{seq}")
}
