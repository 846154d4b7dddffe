//! Bandwidth pledges: a guaranteed rate between two endpoints for a window.

use serde::{Deserialize, Serialize};

use crate::window::Window;
use crate::PledgeError;

/// A bandwidth reservation between hosts `h1` and `h2`.
///
/// `amt_out` is the committed rate from h1 toward h2 and `amt_in` the rate
/// back, both in bytes per second. Path summaries are filled in when the
/// network manager commits the reservation; they are informational (listings)
/// and are recomputed on checkpoint reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthPledge {
    pub id: String,
    pub cookie: String,
    pub name: String,
    pub window: Window,
    pub h1: String,
    pub h2: String,
    #[serde(default)]
    pub p1: Option<u16>,
    #[serde(default)]
    pub p2: Option<u16>,
    pub amt_out: i64,
    pub amt_in: i64,
    #[serde(default)]
    pub dscp: u8,
    #[serde(default)]
    pub ext_ip: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub paused: bool,
    /// Runtime-only: cleared on reload so recovered pledges are re-pushed.
    #[serde(skip)]
    pub pushed: bool,
}

impl BandwidthPledge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        cookie: impl Into<String>,
        h1: impl Into<String>,
        h2: impl Into<String>,
        amt_out: i64,
        amt_in: i64,
        commence: i64,
        expiry: i64,
        now: i64,
    ) -> Result<Self, PledgeError> {
        if amt_out < 0 || amt_in < 0 {
            return Err(PledgeError::InvalidRate {
                out: amt_out,
                inb: amt_in,
            });
        }
        let id = id.into();
        Ok(Self {
            name: id.clone(),
            id,
            cookie: cookie.into(),
            window: Window::new(commence, expiry, now)?,
            h1: h1.into(),
            h2: h2.into(),
            p1: None,
            p2: None,
            amt_out,
            amt_in,
            dscp: 0,
            ext_ip: None,
            paths: Vec::new(),
            paused: false,
            pushed: false,
        })
    }

    /// The tenant portion of the h1 name (`tenant/vm`), if any.
    pub fn tenant(&self) -> &str {
        match self.h1.split_once('/') {
            Some((tenant, _)) => tenant,
            None => "",
        }
    }

    pub fn references_host(&self, host: &str) -> bool {
        host_matches(&self.h1, host) || host_matches(&self.h2, host)
    }
}

/// Compare a pledge endpoint against a host name, tolerating a `tenant/`
/// prefix on either side.
pub(crate) fn host_matches(endpoint: &str, host: &str) -> bool {
    if endpoint == host {
        return true;
    }
    let bare_ep = endpoint.rsplit('/').next().unwrap_or(endpoint);
    let bare_host = host.rsplit('/').next().unwrap_or(host);
    bare_ep == bare_host
}
