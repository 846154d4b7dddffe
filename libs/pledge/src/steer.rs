//! Steering pledges: force traffic between two endpoints through an ordered
//! chain of middleboxes.

use serde::{Deserialize, Serialize};

use crate::bandwidth::host_matches;
use crate::window::Window;
use crate::PledgeError;

/// A flow-steering reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteerPledge {
    pub id: String,
    pub cookie: String,
    pub name: String,
    pub window: Window,
    pub tenant: String,
    /// Source endpoint (VM name or IP).
    pub src: String,
    /// Destination endpoint (VM name or IP).
    pub dest: String,
    /// Middlebox chain in traversal order (VM names).
    pub mboxes: Vec<String>,
    /// Transport match, `proto[:port]` (e.g. `tcp:80`, `udp`).
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub paused: bool,
    #[serde(skip)]
    pub pushed: bool,
}

impl SteerPledge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        cookie: impl Into<String>,
        tenant: impl Into<String>,
        src: impl Into<String>,
        dest: impl Into<String>,
        mboxes: Vec<String>,
        commence: i64,
        expiry: i64,
        now: i64,
    ) -> Result<Self, PledgeError> {
        if mboxes.is_empty() {
            return Err(PledgeError::NoMiddleboxes);
        }
        let id = id.into();
        Ok(Self {
            name: id.clone(),
            id,
            cookie: cookie.into(),
            window: Window::new(commence, expiry, now)?,
            tenant: tenant.into(),
            src: src.into(),
            dest: dest.into(),
            mboxes,
            protocol: None,
            paused: false,
            pushed: false,
        })
    }

    pub fn references_host(&self, host: &str) -> bool {
        host_matches(&self.src, host)
            || host_matches(&self.dest, host)
            || self.mboxes.iter().any(|m| host_matches(m, host))
    }
}
