//! The network graph and the reservation arithmetic on top of it.
//!
//! One `Network` owns every switch, link, host, and committed reservation.
//! Path selection is a shortest-path search that prunes links unable to
//! carry the requested rates over the requested window; ties break on the
//! lexicographic switch-id sequence so results are stable across runs.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allotment::PRIORITY_QUEUE_NUM;
use crate::host::Host;
use crate::link::{endpoint_id, Link};
use crate::path::{Hop, Path, PathPushPlan};
use crate::switch::Switch;
use crate::NetError;

/// Default link capacity when the topology does not name one: 10 Gbit/s in
/// bytes per second.
pub const DEFAULT_CAPACITY: i64 = 1_250_000_000;

/// One row of a materialized queue plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub switch: String,
    pub port: i32,
    pub queue: u32,
    pub min_rate: i64,
    pub max_rate: i64,
    pub priority: u8,
}

/// A link as the fabric oracle reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub sw1: String,
    pub port1: i32,
    pub sw2: String,
    pub port2: i32,
    #[serde(default)]
    pub capacity: Option<i64>,
}

/// Everything the oracle knows about the fabric at one moment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopoSnapshot {
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

/// A bandwidth reservation request as the network manager receives it.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub id: String,
    pub tenant: String,
    pub h1: String,
    pub h2: String,
    pub amt_out: i64,
    pub amt_in: i64,
    pub commence: i64,
    pub expiry: i64,
    pub ext_ip: Option<String>,
}

/// What a successful reserve reports back.
#[derive(Debug, Clone)]
pub struct ReserveOutcome {
    pub paths: Vec<String>,
}

struct Reservation {
    paths: Vec<Path>,
    commence: i64,
    expiry: i64,
    amt_in: i64,
    amt_out: i64,
    released: bool,
}

/// The graph plus reservation state.
pub struct Network {
    switches: BTreeMap<String, Switch>,
    links: HashMap<String, Link>,
    /// switch id -> sorted ids of links touching it
    adjacency: BTreeMap<String, Vec<String>>,
    hosts: BTreeMap<String, Host>,
    ip2mac: HashMap<String, String>,
    reservations: HashMap<String, Reservation>,
    ulcaps: BTreeMap<String, u32>,
    default_ulcap: u32,
    discount_pct: u32,
    default_capacity: i64,
}

impl Network {
    pub fn new(default_ulcap: u32) -> Self {
        Self {
            switches: BTreeMap::new(),
            links: HashMap::new(),
            adjacency: BTreeMap::new(),
            hosts: BTreeMap::new(),
            ip2mac: HashMap::new(),
            reservations: HashMap::new(),
            ulcaps: BTreeMap::new(),
            default_ulcap,
            discount_pct: 0,
            default_capacity: DEFAULT_CAPACITY,
        }
    }

    // ------------------------------------------------------------------
    // topology and host maintenance
    // ------------------------------------------------------------------

    /// Fold an oracle snapshot into the graph. Links already known keep
    /// their allotments; links that disappeared keep existing too, since
    /// committed reservations may still reference them.
    pub fn apply_topology(&mut self, topo: TopoSnapshot) {
        for spec in topo.links {
            let capacity = spec.capacity.unwrap_or(self.default_capacity);
            let id = format!(
                "{}/{}-{}/{}",
                spec.sw1, spec.port1, spec.sw2, spec.port2
            );
            self.note_switch_port(&spec.sw1, spec.port1);
            self.note_switch_port(&spec.sw2, spec.port2);
            match self.links.get_mut(&id) {
                Some(l) => l.capacity = capacity,
                None => {
                    let l = Link::between(&spec.sw1, spec.port1, &spec.sw2, spec.port2, capacity);
                    self.adjacency.entry(spec.sw1.clone()).or_default().push(id.clone());
                    self.adjacency.entry(spec.sw2.clone()).or_default().push(id.clone());
                    self.links.insert(id, l);
                }
            }
        }
        for adj in self.adjacency.values_mut() {
            adj.sort();
            adj.dedup();
        }
        for host in topo.hosts {
            self.add_host(host);
        }
    }

    fn note_switch_port(&mut self, sw: &str, port: i32) {
        self.switches
            .entry(sw.to_string())
            .or_insert_with(|| Switch::new(sw))
            .ports
            .insert(port);
    }

    /// Insert or replace a host record and refresh the ip->mac map.
    pub fn add_host(&mut self, host: Host) {
        for att in &host.attachments {
            self.note_switch_port(&att.switch, att.port);
        }
        if let (Some(ip), Some(mac)) = (&host.ip4, &host.mac) {
            self.ip2mac.insert(ip.clone(), mac.clone());
        }
        if let (Some(ip), Some(mac)) = (&host.ip6, &host.mac) {
            self.ip2mac.insert(ip.clone(), mac.clone());
        }
        self.hosts.insert(host.name.clone(), host);
    }

    /// Fold agent-reported (mac, physical host) pairs into the host map.
    pub fn mac_to_phost(&mut self, pairs: &[(String, String)]) {
        for (mac, phost) in pairs {
            let mut hit = false;
            for host in self.hosts.values_mut() {
                if host.mac.as_deref() == Some(mac.as_str()) {
                    if host.phost.as_deref() != Some(phost.as_str()) {
                        debug!(host = %host.name, phost = %phost, "mac2phost moved host");
                        host.phost = Some(phost.clone());
                    }
                    hit = true;
                }
            }
            if !hit {
                debug!(mac = %mac, "mac2phost report for unknown mac");
            }
        }
    }

    pub fn find_host(&self, name: &str) -> Option<&Host> {
        if let Some(h) = self.hosts.get(name) {
            return Some(h);
        }
        let bare = name.rsplit('/').next().unwrap_or(name);
        self.hosts
            .values()
            .find(|h| h.bare_name() == bare || h.ip4.as_deref() == Some(name))
    }

    pub fn get_ip(&self, name: &str) -> Option<String> {
        self.find_host(name).and_then(|h| h.ip4.clone())
    }

    pub fn mac_for_ip(&self, ip: &str) -> Option<&str> {
        self.ip2mac.get(ip).map(|s| s.as_str())
    }

    pub fn ip2mac_snapshot(&self) -> HashMap<String, String> {
        self.ip2mac.clone()
    }

    /// Distinct physical hosts, for agent broadcast operations.
    pub fn phost_list(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .hosts
            .values()
            .filter_map(|h| h.phost.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    // ------------------------------------------------------------------
    // caps and discount
    // ------------------------------------------------------------------

    pub fn set_user_link_cap(&mut self, tenant: &str, pct: u32) -> Result<(), NetError> {
        if pct > 100 {
            return Err(NetError::InvalidCap(pct));
        }
        info!(tenant = %tenant, pct, "user link cap set");
        self.ulcaps.insert(tenant.to_string(), pct);
        Ok(())
    }

    pub fn user_link_caps(&self) -> BTreeMap<String, u32> {
        self.ulcaps.clone()
    }

    pub fn set_discount(&mut self, pct: u32) -> Result<(), NetError> {
        if pct > 100 {
            return Err(NetError::InvalidCap(pct));
        }
        self.discount_pct = pct;
        Ok(())
    }

    fn ulcap(&self, tenant: &str) -> u32 {
        *self.ulcaps.get(tenant).unwrap_or(&self.default_ulcap)
    }

    fn discounted(&self, amount: i64) -> i64 {
        amount * (100 - self.discount_pct as i64) / 100
    }

    // ------------------------------------------------------------------
    // reservation lifecycle
    // ------------------------------------------------------------------

    /// Find and commit path(s) for a bandwidth request.
    pub fn reserve(&mut self, req: &ReserveRequest) -> Result<ReserveOutcome, NetError> {
        if let Some(r) = self.reservations.get(&req.id) {
            if !r.released {
                return Err(NetError::AlreadyReserved(req.id.clone()));
            }
            self.reservations.remove(&req.id);
        }

        let h1 = self
            .find_host(&req.h1)
            .ok_or_else(|| NetError::UnknownHost(req.h1.clone()))?
            .clone();
        let h2 = self
            .find_host(&req.h2)
            .ok_or_else(|| NetError::UnknownHost(req.h2.clone()))?
            .clone();

        let amt_out = self.discounted(req.amt_out);
        let amt_in = self.discounted(req.amt_in);
        let need = amt_out + amt_in;
        let cap_pct = self.ulcap(&req.tenant);

        let mut path = self
            .find_path(&h1, &h2, req.commence, req.expiry, need, cap_pct)
            .ok_or_else(|| NetError::NoPath {
                h1: req.h1.clone(),
                h2: req.h2.clone(),
            })?;
        path.ext_ip = req.ext_ip.clone();

        path.set_queues(
            &mut self.links,
            &req.id,
            req.commence,
            req.expiry,
            amt_in,
            amt_out,
        )?;

        let summaries = vec![path.summary()];
        info!(
            pledge_id = %req.id,
            path = %summaries[0],
            amt_out,
            amt_in,
            "reservation committed"
        );
        self.reservations.insert(
            req.id.clone(),
            Reservation {
                paths: vec![path],
                commence: req.commence,
                expiry: req.expiry,
                amt_in,
                amt_out,
                released: false,
            },
        );

        Ok(ReserveOutcome { paths: summaries })
    }

    /// Release a reservation's queues and allotments from `now` forward.
    ///
    /// Idempotent; the path skeleton is retained so withdrawal flow-mods can
    /// still resolve switch/port tuples. `forget` drops the skeleton.
    pub fn release(&mut self, id: &str, now: i64) {
        let Some(r) = self.reservations.get_mut(id) else {
            debug!(pledge_id = %id, "release for unknown reservation ignored");
            return;
        };
        if r.released {
            return;
        }
        r.released = true;
        let from = r.commence.max(now);
        if from < r.expiry {
            for path in &r.paths {
                path.release_queues(&mut self.links, id, from, r.expiry, r.amt_in, r.amt_out);
            }
        }
        info!(pledge_id = %id, "reservation released");
    }

    /// Drop the path skeleton of a released (or extinct) reservation.
    pub fn forget(&mut self, id: &str, now: i64) {
        self.release(id, now);
        self.reservations.remove(id);
    }

    /// Move a reservation's path record under a new id, freeing the old id
    /// for a fresh reserve. Call after `release`: queue shares are named by
    /// the original id, so a rekeyed record only resolves default queues,
    /// which is all a withdrawal push needs.
    pub fn rekey(&mut self, from: &str, to: &str) {
        if let Some(r) = self.reservations.remove(from) {
            debug!(from = %from, to = %to, "reservation rekeyed");
            self.reservations.insert(to.to_string(), r);
        }
    }

    /// Materialize the push plan for a reservation at probe time `t`.
    pub fn push_plan(&self, id: &str, t: i64) -> Result<Vec<PathPushPlan>, NetError> {
        let r = self
            .reservations
            .get(id)
            .ok_or_else(|| NetError::UnknownReservation(id.to_string()))?;

        let mut plans = Vec::with_capacity(r.paths.len());
        for path in &r.paths {
            let mut plan = path.push_plan(&self.links, id, t);
            plan.ip1 = self
                .get_ip(&path.h1)
                .ok_or_else(|| NetError::UnknownHost(path.h1.clone()))?;
            plan.ip2 = self
                .get_ip(&path.h2)
                .ok_or_else(|| NetError::UnknownHost(path.h2.clone()))?;
            plans.push(plan);
        }
        Ok(plans)
    }

    // ------------------------------------------------------------------
    // path search
    // ------------------------------------------------------------------

    /// Shortest admitting path between two hosts. Multi-homed hosts try
    /// every attachment pair; co-resident attachments yield a degenerate
    /// path with endpoint links only.
    fn find_path(
        &mut self,
        h1: &Host,
        h2: &Host,
        commence: i64,
        expiry: i64,
        need: i64,
        cap_pct: u32,
    ) -> Option<Path> {
        let mut best: Option<(usize, Vec<String>, Vec<Hop>, usize, usize)> = None;

        for (i1, a1) in h1.attachments.iter().enumerate() {
            for (i2, a2) in h2.attachments.iter().enumerate() {
                let found = if a1.switch == a2.switch {
                    Some((vec![a1.switch.clone()], Vec::new()))
                } else {
                    self.search(&a1.switch, &a2.switch, commence, expiry, need, cap_pct)
                };
                if let Some((switches, hops)) = found {
                    let cand = (hops.len(), switches, hops, i1, i2);
                    let better = match &best {
                        None => true,
                        Some(b) => (cand.0, &cand.1) < (b.0, &b.1),
                    };
                    if better {
                        best = Some(cand);
                    }
                }
            }
        }

        let (_, switches, hops, i1, i2) = best?;
        let a1 = &h1.attachments[i1];
        let a2 = &h2.attachments[i2];

        let mut path = Path::new(&h1.name, &h2.name);
        path.switches = switches;
        path.hops = hops;
        path.endpoints = [
            Some(self.ensure_endpoint(&a1.switch, a1.port, &h1.name)),
            Some(self.ensure_endpoint(&a2.switch, a2.port, &h2.name)),
        ];
        Some(path)
    }

    fn ensure_endpoint(&mut self, switch: &str, port: i32, host: &str) -> String {
        let id = endpoint_id(switch, port, host);
        if !self.links.contains_key(&id) {
            let l = Link::endpoint(switch, port, host, self.default_capacity);
            self.links.insert(id.clone(), l);
        }
        id
    }

    /// Uniform-cost search over (hop count, switch-id sequence); the cost
    /// ordering is preserved under extension, so the first settle of the
    /// destination is both shortest and lexicographically least.
    fn search(
        &self,
        src: &str,
        dst: &str,
        commence: i64,
        expiry: i64,
        need: i64,
        cap_pct: u32,
    ) -> Option<(Vec<String>, Vec<Hop>)> {
        let mut heap: BinaryHeap<Reverse<(usize, Vec<String>, Vec<Hop>)>> = BinaryHeap::new();
        let mut settled: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        heap.push(Reverse((0, vec![src.to_string()], Vec::new())));

        while let Some(Reverse((cost, switches, hops))) = heap.pop() {
            let here = switches.last().expect("non-empty switch seq").clone();
            if !settled.insert(here.clone()) {
                continue;
            }
            if here == dst {
                return Some((switches, hops));
            }

            for lid in self.adjacency.get(&here).into_iter().flatten() {
                let link = &self.links[lid];
                let (next, forward) = if link.sw1 == here {
                    (link.sw2.clone(), true)
                } else {
                    (link.sw1.clone(), false)
                };
                if settled.contains(&next) {
                    continue;
                }
                let limit = link.capacity * cap_pct as i64 / 100;
                if !link.allotment.can_increase(commence, expiry, need, limit) {
                    continue;
                }
                let mut nsw = switches.clone();
                nsw.push(next);
                let mut nhops = hops.clone();
                nhops.push(Hop {
                    link: lid.clone(),
                    forward,
                });
                heap.push(Reverse((cost + 1, nsw, nhops)));
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // queue plans and projections
    // ------------------------------------------------------------------

    /// Full queue plan at an instant, over every link (or endpoint links
    /// only when `endpoint_only`).
    pub fn queue_map(&self, t: i64, endpoint_only: bool) -> Vec<QueueEntry> {
        let mut ids: Vec<&String> = self.links.keys().collect();
        ids.sort();

        let mut entries = Vec::new();
        for id in ids {
            let link = &self.links[id];
            if endpoint_only && !link.is_endpoint {
                continue;
            }
            for (_, q) in link.allotment.queues_at(t) {
                let (switch, port) = link.port_for(q.dir);
                entries.push(QueueEntry {
                    switch: switch.to_string(),
                    port,
                    queue: q.num,
                    min_rate: q.amount,
                    max_rate: link.capacity,
                    priority: u8::from(q.num == PRIORITY_QUEUE_NUM),
                });
            }
        }
        entries
    }

    pub fn graph_json(&self) -> serde_json::Value {
        let mut ids: Vec<&String> = self.links.keys().collect();
        ids.sort();
        let links: Vec<_> = ids
            .iter()
            .map(|id| &self.links[*id])
            .filter(|l| !l.is_endpoint)
            .map(|l| {
                serde_json::json!({
                    "sw1": l.sw1, "port1": l.port1,
                    "sw2": l.sw2, "port2": l.port2,
                    "capacity": l.capacity,
                })
            })
            .collect();
        serde_json::json!({
            "switches": self.switches.values().collect::<Vec<_>>(),
            "links": links,
        })
    }

    pub fn list_hosts(&self) -> Vec<Host> {
        self.hosts.values().cloned().collect()
    }

    pub fn list_conns(&self, name: &str) -> Option<Vec<crate::host::Attachment>> {
        self.find_host(name).map(|h| h.attachments.clone())
    }

    /// Test/diagnostic access to one link's committed rate at an instant.
    pub fn committed_on(&self, link_id: &str, t: i64) -> Option<i64> {
        self.links.get(link_id).map(|l| l.allotment.committed_at(t))
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Attachment;

    const NOW: i64 = 1_700_000_000;
    const GBIT: i64 = 125_000_000; // 1 Gbit/s in bytes/sec

    fn host(name: &str, ip: &str, sw: &str, port: i32) -> Host {
        let mut h = Host::new(name);
        h.ip4 = Some(ip.to_string());
        h.mac = Some(format!("fa:16:3e:00:00:{port:02x}"));
        h.attachments = vec![Attachment {
            switch: sw.to_string(),
            port,
        }];
        h
    }

    /// swA --- swB --- swC, one host on each outer switch.
    fn line_topo() -> Network {
        let mut net = Network::new(100);
        net.apply_topology(TopoSnapshot {
            links: vec![
                LinkSpec {
                    sw1: "swA".into(),
                    port1: 1,
                    sw2: "swB".into(),
                    port2: 1,
                    capacity: Some(GBIT),
                },
                LinkSpec {
                    sw1: "swB".into(),
                    port1: 2,
                    sw2: "swC".into(),
                    port2: 1,
                    capacity: Some(GBIT),
                },
            ],
            hosts: vec![
                host("vm1", "10.0.0.1", "swA", 10),
                host("vm2", "10.0.0.2", "swC", 10),
            ],
        });
        net
    }

    fn req(id: &str, out: i64, inb: i64) -> ReserveRequest {
        ReserveRequest {
            id: id.into(),
            tenant: "".into(),
            h1: "vm1".into(),
            h2: "vm2".into(),
            amt_out: out,
            amt_in: inb,
            commence: NOW + 10,
            expiry: NOW + 70,
            ext_ip: None,
        }
    }

    #[test]
    fn happy_reserve_picks_the_line() {
        let mut net = line_topo();
        let out = net.reserve(&req("r1", 100_000_000, 50_000_000)).unwrap();
        assert_eq!(out.paths, vec!["swA -> swB -> swC".to_string()]);

        let plans = net.push_plan("r1", NOW + 26).unwrap();
        assert_eq!(plans.len(), 1);
        let p = &plans[0];
        assert_eq!(p.ip1, "10.0.0.1");
        assert_eq!(p.ip2, "10.0.0.2");
        assert!(p.ingress.is_some());
        assert!(p.egress.is_some());
        assert_eq!(p.fwd_intermediates.len(), 1);
        assert_eq!(p.bwd_intermediates.len(), 1);
    }

    #[test]
    fn capacity_rejection_on_overlap() {
        let mut net = line_topo();
        net.reserve(&req("r1", 700_000_000 / 8, 0)).unwrap();
        // second 700 Mbit/s pledge over the same 1 Gbit/s link must fail
        let err = net.reserve(&req("r2", 700_000_000 / 8, 0)).unwrap_err();
        assert!(matches!(err, NetError::NoPath { .. }));

        // a disjoint window fits
        let mut later = req("r3", 700_000_000 / 8, 0);
        later.commence = NOW + 100;
        later.expiry = NOW + 200;
        net.reserve(&later).unwrap();
    }

    #[test]
    fn duplicate_reservation_rejected() {
        let mut net = line_topo();
        net.reserve(&req("r1", 1000, 1000)).unwrap();
        assert!(matches!(
            net.reserve(&req("r1", 1000, 1000)),
            Err(NetError::AlreadyReserved(_))
        ));
    }

    #[test]
    fn release_restores_and_is_idempotent() {
        let mut net = line_topo();
        let link = "swA/1-swB/1";
        net.reserve(&req("r1", 100, 50)).unwrap();
        assert_eq!(net.committed_on(link, NOW + 30), Some(150));

        net.release("r1", NOW);
        assert_eq!(net.committed_on(link, NOW + 30), Some(0));
        net.release("r1", NOW); // second release is a no-op
        assert_eq!(net.committed_on(link, NOW + 30), Some(0));

        // skeleton survives for withdrawal pushes, queue degrades to 0
        let plans = net.push_plan("r1", NOW + 30).unwrap();
        assert_eq!(plans[0].ingress.as_ref().unwrap().queue, 0);

        net.forget("r1", NOW);
        assert!(net.push_plan("r1", NOW + 30).is_err());
    }

    #[test]
    fn rekey_moves_skeleton_and_frees_the_id() {
        let mut net = line_topo();
        net.reserve(&req("r1", 100, 50)).unwrap();
        net.release("r1", NOW);
        net.rekey("r1", "r1.yank");

        // the skeleton answers under the new id, default queue only
        let plans = net.push_plan("r1.yank", NOW + 30).unwrap();
        assert_eq!(plans[0].ingress.as_ref().unwrap().queue, 0);
        assert!(net.push_plan("r1", NOW + 30).is_err());

        // the old id is free for a fresh reserve
        net.reserve(&req("r1", 100, 50)).unwrap();
    }

    #[test]
    fn co_resident_hosts_use_no_link_capacity() {
        let mut net = line_topo();
        net.add_host(host("vm3", "10.0.0.3", "swA", 11));
        let mut r = req("r1", 100, 50);
        r.h2 = "vm3".into();
        let out = net.reserve(&r).unwrap();
        assert_eq!(out.paths, vec!["swA".to_string()]);
        assert_eq!(net.committed_on("swA/1-swB/1", NOW + 30), Some(0));

        let plans = net.push_plan("r1", NOW + 26).unwrap();
        assert!(plans[0].ingress.is_none());
        assert!(plans[0].espq0.is_some());
        assert!(plans[0].espq1.is_some());
    }

    #[test]
    fn shortest_path_wins_with_lexicographic_tiebreak() {
        let mut net = Network::new(100);
        // two equal-length routes swA->swB->swD and swA->swC->swD
        let mk = |sw1: &str, p1, sw2: &str, p2| LinkSpec {
            sw1: sw1.into(),
            port1: p1,
            sw2: sw2.into(),
            port2: p2,
            capacity: Some(GBIT),
        };
        net.apply_topology(TopoSnapshot {
            links: vec![
                mk("swA", 1, "swB", 1),
                mk("swB", 2, "swD", 1),
                mk("swA", 2, "swC", 1),
                mk("swC", 2, "swD", 2),
            ],
            hosts: vec![
                host("vm1", "10.0.0.1", "swA", 10),
                host("vm2", "10.0.0.2", "swD", 10),
            ],
        });
        let out = net.reserve(&req("r1", 1000, 0)).unwrap();
        assert_eq!(out.paths, vec!["swA -> swB -> swD".to_string()]);
    }

    #[test]
    fn search_routes_around_a_full_link() {
        let mut net = Network::new(100);
        let mk = |sw1: &str, p1, sw2: &str, p2, cap| LinkSpec {
            sw1: sw1.into(),
            port1: p1,
            sw2: sw2.into(),
            port2: p2,
            capacity: Some(cap),
        };
        // direct swA-swD link is tiny; detour via swB has room
        net.apply_topology(TopoSnapshot {
            links: vec![
                mk("swA", 1, "swD", 1, 10),
                mk("swA", 2, "swB", 1, GBIT),
                mk("swB", 2, "swD", 2, GBIT),
            ],
            hosts: vec![
                host("vm1", "10.0.0.1", "swA", 10),
                host("vm2", "10.0.0.2", "swD", 10),
            ],
        });
        let out = net.reserve(&req("r1", 1000, 0)).unwrap();
        assert_eq!(out.paths, vec!["swA -> swB -> swD".to_string()]);
    }

    #[test]
    fn user_link_cap_shrinks_admission() {
        let mut net = line_topo();
        net.set_user_link_cap("tight", 10).unwrap();
        let mut r = req("r1", GBIT / 5, 0); // 20% of capacity
        r.tenant = "tight".into();
        assert!(matches!(net.reserve(&r), Err(NetError::NoPath { .. })));

        r.tenant = "".into();
        net.reserve(&r).unwrap();
    }

    #[test]
    fn discount_scales_committed_amounts() {
        let mut net = line_topo();
        net.set_discount(50).unwrap();
        net.reserve(&req("r1", 1000, 500)).unwrap();
        assert_eq!(net.committed_on("swA/1-swB/1", NOW + 30), Some(750));
    }

    #[test]
    fn queue_map_reports_both_kinds() {
        let mut net = line_topo();
        net.reserve(&req("r1", 100, 50)).unwrap();

        let full = net.queue_map(NOW + 30, false);
        assert!(full.iter().any(|e| e.priority == 1 && e.queue == 1));
        assert!(full.iter().any(|e| e.priority == 0 && e.queue >= 2));

        let eps = net.queue_map(NOW + 30, true);
        assert_eq!(eps.len(), 2); // E0 + E1 queues only
        assert!(eps.iter().all(|e| e.min_rate > 0));

        // outside the window the plan is empty
        assert!(net.queue_map(NOW + 500, false).is_empty());
    }

    #[test]
    fn mac2phost_updates_host_records() {
        let mut net = line_topo();
        let mac = net.find_host("vm1").unwrap().mac.clone().unwrap();
        net.mac_to_phost(&[(mac, "phys7".to_string())]);
        assert_eq!(net.find_host("vm1").unwrap().phost.as_deref(), Some("phys7"));
        assert_eq!(net.phost_list(), vec!["phys7".to_string()]);
    }
}
