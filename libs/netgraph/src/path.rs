//! Paths: an ordered walk of links and switches between two hosts.
//!
//! A path records link ids rather than link references; the graph owns the
//! links and their allotments. Queue placement along a path for a bandwidth
//! reservation puts:
//!   - the reservation's named queue on the ingress side of the first link
//!     (data out from h1),
//!   - the `R`-named queue on the egress side of the last link (data back
//!     toward h1),
//!   - shared priority queues on every intermediate side in both directions,
//!   - `E0`/`E1` endpoint queues on the virtual switch-to-host links.
//!
//! A path of zero links is the co-resident case: both hosts hang off one
//! switch and only endpoint queues exist.

use std::collections::HashMap;

use serde::Serialize;

use crate::allotment::QueueDir;
use crate::link::{Link, Spq};
use crate::NetError;

/// One traversal step: a link id plus the orientation it is walked in.
/// `forward` means the walk runs sw1 → sw2 of the link.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Hop {
    pub link: String,
    pub forward: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Path {
    pub h1: String,
    pub h2: String,
    pub hops: Vec<Hop>,
    pub switches: Vec<String>,
    /// Endpoint virtual link ids, always in (h1, h2) order.
    pub endpoints: [Option<String>; 2],
    /// Set when the hop list was recorded from h2 toward h1.
    pub reverse: bool,
    pub ext_ip: Option<String>,
}

/// The switch/port/queue tuples one path contributes to a push, probed at a
/// fixed timestamp. The reservation manager turns this into flow-mod
/// requests; ip addresses are filled in by the graph from its host map.
#[derive(Debug, Clone, Serialize)]
pub struct PathPushPlan {
    pub ip1: String,
    pub ip2: String,
    pub ext_ip: Option<String>,
    /// Queue into h1 (set on the h1-side endpoint link).
    pub espq0: Option<Spq>,
    /// Queue into h2 (set on the h2-side endpoint link).
    pub espq1: Option<Spq>,
    /// Reservation queue on the first link out of h1; absent on degenerate
    /// single-switch paths.
    pub ingress: Option<Spq>,
    /// `R` queue on the last link back toward h1; absent when degenerate.
    pub egress: Option<Spq>,
    pub fwd_intermediates: Vec<Spq>,
    pub bwd_intermediates: Vec<Spq>,
}

impl Path {
    pub fn new(h1: impl Into<String>, h2: impl Into<String>) -> Self {
        Self {
            h1: h1.into(),
            h2: h2.into(),
            hops: Vec::new(),
            switches: Vec::new(),
            endpoints: [None, None],
            reverse: false,
            ext_ip: None,
        }
    }

    /// Human summary: the switch sequence.
    pub fn summary(&self) -> String {
        self.switches.join(" -> ")
    }

    /// Hop list normalized to h1 → h2 order regardless of how it was stored.
    fn ordered_hops(&self) -> Vec<Hop> {
        if self.reverse {
            self.hops
                .iter()
                .rev()
                .map(|h| Hop {
                    link: h.link.clone(),
                    forward: !h.forward,
                })
                .collect()
        } else {
            self.hops.clone()
        }
    }

    /// Direction selector: a queue facing path-forward on this hop.
    fn path_fwd(hop: &Hop) -> QueueDir {
        if hop.forward {
            QueueDir::Forward
        } else {
            QueueDir::Backward
        }
    }

    fn path_bwd(hop: &Hop) -> QueueDir {
        if hop.forward {
            QueueDir::Backward
        } else {
            QueueDir::Forward
        }
    }

    /// Walk the queue placements for this path, invoking `apply` with
    /// (link id, queue name, direction, amount). Shared by commit/release so
    /// the two cannot drift apart.
    fn each_queue<F>(&self, qbase: &str, amt_in: i64, amt_out: i64, mut apply: F)
    where
        F: FnMut(&str, String, QueueDir, i64),
    {
        let hops = self.ordered_hops();
        let n = hops.len();
        for (i, hop) in hops.iter().enumerate() {
            if i == 0 {
                apply(&hop.link, qbase.to_string(), Self::path_fwd(hop), amt_out);
                if n > 1 {
                    apply(&hop.link, "priority-in".into(), Self::path_bwd(hop), amt_in);
                }
            }
            if i > 0 && i < n - 1 {
                apply(&hop.link, "priority-out".into(), Self::path_fwd(hop), amt_out);
                apply(&hop.link, "priority-in".into(), Self::path_bwd(hop), amt_in);
            }
            if i == n - 1 {
                apply(&hop.link, format!("R{qbase}"), Self::path_bwd(hop), amt_in);
                if n > 1 {
                    apply(&hop.link, "priority-out".into(), Self::path_fwd(hop), amt_out);
                }
            }
        }

        if let Some(ep) = &self.endpoints[0] {
            apply(ep, format!("E0{qbase}"), QueueDir::Forward, amt_in);
        }
        if let Some(ep) = &self.endpoints[1] {
            apply(ep, format!("E1{qbase}"), QueueDir::Forward, amt_out);
        }
    }

    /// Commit the reservation's queues (and thus allotment) on every link.
    pub fn set_queues(
        &self,
        links: &mut HashMap<String, Link>,
        qbase: &str,
        commence: i64,
        expiry: i64,
        amt_in: i64,
        amt_out: i64,
    ) -> Result<(), NetError> {
        let mut missing = None;
        self.each_queue(qbase, amt_in, amt_out, |lid, name, dir, amount| {
            match links.get_mut(lid) {
                Some(l) => l.allotment.add_queue(&name, dir, commence, expiry, amount),
                None => missing = Some(lid.to_string()),
            }
        });
        match missing {
            Some(lid) => Err(NetError::MissingLink(lid)),
            None => Ok(()),
        }
    }

    /// Release the reservation's queues over `[from, to)`.
    pub fn release_queues(
        &self,
        links: &mut HashMap<String, Link>,
        qbase: &str,
        from: i64,
        to: i64,
        amt_in: i64,
        amt_out: i64,
    ) {
        self.each_queue(qbase, amt_in, amt_out, |lid, name, _dir, amount| {
            if let Some(l) = links.get_mut(lid) {
                l.allotment.reduce_queue(&name, from, to, amount);
            }
        });
    }

    /// Resolve the push-plan switch/port/queue tuples at timestamp `t`.
    pub fn push_plan(
        &self,
        links: &HashMap<String, Link>,
        qbase: &str,
        t: i64,
    ) -> PathPushPlan {
        let hops = self.ordered_hops();
        let n = hops.len();
        let spq = |hop: &Hop, name: &str, dir: QueueDir| -> Option<Spq> {
            links.get(&hop.link).map(|l| l.spq(name, dir, t))
        };

        let ingress = hops.first().and_then(|h| spq(h, qbase, Self::path_fwd(h)));
        let egress = hops
            .last()
            .and_then(|h| spq(h, &format!("R{qbase}"), Self::path_bwd(h)));

        let fwd_intermediates = hops
            .iter()
            .skip(1)
            .filter_map(|h| spq(h, "priority-out", Self::path_fwd(h)))
            .collect();
        let bwd_intermediates = hops
            .iter()
            .take(n.saturating_sub(1))
            .filter_map(|h| spq(h, "priority-in", Self::path_bwd(h)))
            .collect();

        let ep_spq = |idx: usize, name: String| -> Option<Spq> {
            self.endpoints[idx]
                .as_ref()
                .and_then(|lid| links.get(lid))
                .map(|l| l.spq(&name, QueueDir::Forward, t))
        };

        PathPushPlan {
            ip1: String::new(),
            ip2: String::new(),
            ext_ip: self.ext_ip.clone(),
            espq0: ep_spq(0, format!("E0{qbase}")),
            espq1: ep_spq(1, format!("E1{qbase}")),
            ingress,
            egress,
            fwd_intermediates,
            bwd_intermediates,
        }
    }
}
