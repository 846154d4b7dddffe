//! Flow-queue manager.
//!
//! A stateless-ish translator: structured reservation requests in, wire
//! strings to the agent dispatcher out. It keeps only the maps it is fed
//! (ip -> mac, compute-host list) and the timestamp of the last
//! intermediate-queue refresh, which is floored at a configured interval to
//! avoid pile-up on the nodes.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tegu_netgraph::{QueueEntry, Spq};
use tegu_pledge::MirrorPledge;

use crate::agents::AgentRequest;
use crate::reservation::ResRequest;
use crate::unix_now;
use crate::wire::{ActionList, FlowMod, COOKIE_QUEUE, COOKIE_STEER, DEFAULT_BRIDGE};

/// Flow-mod priority for bandwidth reservations; above steering so
/// reservation queueing wins in shared tables.
const BANDWIDTH_FMOD_PRI: i32 = 300;

/// Default steering priority when the request does not set one.
const STEER_DEFAULT_PRI: i32 = 100;

/// Sentinel for a late-binding inbound port: the agent substitutes the port
/// carrying the given MAC at install time.
pub const LATE_BINDING_PORT: i32 = -128;

/// Which side an external (floating) IP is matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtDirection {
    Source,
    Dest,
}

impl ExtDirection {
    fn flag(self) -> &'static str {
        match self {
            ExtDirection::Source => "-S",
            ExtDirection::Dest => "-D",
        }
    }
}

/// One ingress/egress or intermediate flow-mod request.
#[derive(Debug, Clone)]
pub struct IeReserveSpec {
    pub id: String,
    pub spq: Spq,
    pub ip1: String,
    pub ip2: String,
    pub tp_sport: Option<u16>,
    pub tp_dport: Option<u16>,
    /// True for the flow-mod on the egress switch gating traffic into the
    /// destination host.
    pub dir_in: bool,
    pub ext_ip: Option<String>,
    pub ext_ty: ExtDirection,
    pub dscp: u8,
    pub expiry: i64,
}

/// One steering flow-mod request (one middlebox hop).
#[derive(Debug, Clone)]
pub struct SteerSpec {
    pub id: String,
    pub pri: i32,
    pub expiry: i64,
    pub ip1: Option<String>,
    pub ip2: Option<String>,
    pub smac: Option<String>,
    pub dmac: Option<String>,
    /// Next-hop middlebox MAC set as the action's destination.
    pub nxt_mac: Option<String>,
    /// Named switch; `None` fans the flow-mod out to every compute host.
    pub swid: Option<String>,
    /// Inbound port match; negative means unset, `LATE_BINDING_PORT` takes
    /// the port from `lbmac` at install time.
    pub swport: i32,
    pub lbmac: Option<String>,
    pub table: u8,
    /// Space-separated table numbers to resubmit to, rendered last.
    pub resub: Option<String>,
    pub meta_match: Option<String>,
    pub meta_action: Option<String>,
    pub protocol: Option<String>,
    pub tpsport: i32,
    pub tpdport: i32,
}

#[derive(Debug)]
pub enum FqRequest {
    /// A fresh queue plan from the network manager.
    SetQueues(Vec<QueueEntry>),
    IeReserve(Box<IeReserveSpec>),
    Steer(Box<SteerSpec>),
    /// Install or remove a mirror on its physical host.
    Mirror {
        pledge: Box<MirrorPledge>,
        remove: bool,
    },
    /// Compute-host list (forwarded on to the agent dispatcher).
    HostList(Vec<String>),
    /// Fresh ip -> mac map from the network manager.
    MacMap(HashMap<String, String>),
}

pub type FqHandle = mpsc::Sender<FqRequest>;

pub struct FlowQueueManager {
    rx: mpsc::Receiver<FqRequest>,
    agents: mpsc::Sender<AgentRequest>,
    res: mpsc::Sender<ResRequest>,
    /// Count of connected agents, for failing pushes fast.
    connected: watch::Receiver<usize>,
    shutdown: watch::Receiver<bool>,
    ip2mac: HashMap<String, String>,
    chosts: Vec<String>,
    intermed_floor: Duration,
    intermed_dscps: String,
    last_intermed: i64,
}

impl FlowQueueManager {
    pub fn new(
        rx: mpsc::Receiver<FqRequest>,
        agents: mpsc::Sender<AgentRequest>,
        res: mpsc::Sender<ResRequest>,
        connected: watch::Receiver<usize>,
        shutdown: watch::Receiver<bool>,
        intermed_floor: Duration,
        intermed_dscps: String,
    ) -> Self {
        Self {
            rx,
            agents,
            res,
            connected,
            shutdown,
            ip2mac: HashMap::new(),
            chosts: Vec::new(),
            intermed_floor,
            intermed_dscps,
            last_intermed: 0,
        }
    }

    pub async fn run(mut self) {
        info!("flow-queue manager running");
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("flow-queue manager shutting down");
                        break;
                    }
                }

                req = self.rx.recv() => {
                    match req {
                        Some(r) => self.handle(r).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle(&mut self, req: FqRequest) {
        match req {
            FqRequest::SetQueues(entries) => self.set_queues(entries).await,
            FqRequest::IeReserve(spec) => self.ie_reserve(*spec).await,
            FqRequest::Steer(spec) => self.steer(*spec).await,
            FqRequest::Mirror { pledge, remove } => self.mirror(*pledge, remove).await,
            FqRequest::HostList(hosts) => {
                self.chosts = hosts.clone();
                let _ = self.agents.send(AgentRequest::SetHosts(hosts)).await;
            }
            FqRequest::MacMap(map) => {
                debug!(entries = map.len(), "ip2mac map refreshed");
                self.ip2mac = map;
            }
        }
    }

    /// Consolidate a queue plan into one setqueues action for all hosts,
    /// plus an intermediate-queue refresh no more often than the floor.
    async fn set_queues(&mut self, entries: Vec<QueueEntry>) {
        let qdata: Vec<String> = entries
            .iter()
            .map(|e| {
                format!(
                    "{}/{},{},{},{},{}",
                    e.switch, e.port, e.queue, e.min_rate, e.max_rate, e.priority
                )
            })
            .collect();

        debug!(queues = qdata.len(), "pushing queue plan");
        let msg = ActionList::setqueues(&self.chosts, qdata).to_json();
        let _ = self.agents.send(AgentRequest::SendAll(msg)).await;

        let now = unix_now();
        if now - self.last_intermed >= self.intermed_floor.as_secs() as i64 {
            self.last_intermed = now;
            let msg =
                ActionList::intermed_queues(&self.chosts, &self.intermed_dscps).to_json();
            let _ = self.agents.send(AgentRequest::SendAll(msg)).await;
        }
    }

    async fn ie_reserve(&mut self, spec: IeReserveSpec) {
        if spec.spq.queue < 0 {
            warn!(pledge_id = %spec.id, switch = %spec.spq.switch, "no queue resolved for flow-mod");
            self.push_failed(&spec.id).await;
            return;
        }
        if *self.connected.borrow() == 0 {
            warn!(pledge_id = %spec.id, "no agents connected, reservation push failed");
            self.push_failed(&spec.id).await;
            return;
        }

        let mut match_opts = format!(" -s {} -d {}", spec.ip1, spec.ip2);
        if let Some(p) = spec.tp_sport {
            match_opts.push_str(&format!(" -p {p}"));
        }
        if let Some(p) = spec.tp_dport {
            match_opts.push_str(&format!(" -P {p}"));
        }
        if let Some(ext) = &spec.ext_ip {
            if !ext.is_empty() {
                match_opts.push_str(&format!(" {} {}", spec.ext_ty.flag(), ext));
            }
        }

        let mut action_opts = format!(" -q {}", spec.spq.queue);
        if !spec.dir_in && spec.dscp > 0 {
            action_opts.push_str(&format!(" -T {}", spec.dscp));
        }
        action_opts.push_str(" -N");

        let fmod = FlowMod {
            host: spec.spq.switch.clone(),
            table: None,
            timeout: spec.expiry - unix_now(),
            priority: BANDWIDTH_FMOD_PRI,
            match_opts,
            action_opts,
            verb: "add",
            cookie: COOKIE_QUEUE,
            bridge: DEFAULT_BRIDGE.into(),
        };

        let msg = ActionList::flowmod(vec![fmod.render()]).to_json();
        let _ = self.agents.send(AgentRequest::SendShort(msg)).await;
    }

    /// Build one steering flow-mod and dispatch it; fans out to every
    /// compute host when no switch is named.
    async fn steer(&mut self, spec: SteerSpec) {
        let pri = if spec.pri <= 0 { STEER_DEFAULT_PRI } else { spec.pri };

        let mut match_opts = String::new();
        if let Some(m) = &spec.meta_match {
            if !m.is_empty() {
                match_opts.push_str(&format!(" -m {m}"));
            }
        }

        if spec.swport >= 0 {
            match_opts.push_str(&format!(" -i {}", spec.swport));
        } else if spec.swport == LATE_BINDING_PORT {
            match spec.lbmac.as_deref() {
                Some(mac) => match_opts.push_str(&format!(" -i {mac}")),
                None => {
                    warn!(pledge_id = %spec.id, "late binding port without a late binding mac");
                    self.push_failed(&spec.id).await;
                    return;
                }
            }
        }

        let smac = match self.resolve_mac(spec.smac.as_deref(), spec.ip1.as_deref()) {
            Ok(m) => m,
            Err(ip) => {
                warn!(pledge_id = %spec.id, ip = %ip, "src IP did not translate to a MAC");
                self.push_failed(&spec.id).await;
                return;
            }
        };
        if let Some(m) = &smac {
            match_opts.push_str(&format!(" -s {m}"));
        }

        let dmac = match self.resolve_mac(spec.dmac.as_deref(), spec.ip2.as_deref()) {
            Ok(m) => m,
            Err(ip) => {
                warn!(pledge_id = %spec.id, ip = %ip, "dst IP did not translate to a MAC");
                self.push_failed(&spec.id).await;
                return;
            }
        };
        if let Some(m) = &dmac {
            match_opts.push_str(&format!(" -d {m}"));
        }

        if let Some(proto) = &spec.protocol {
            if spec.tpsport >= 0 {
                match_opts.push_str(&format!(" -p {proto}:{}", spec.tpsport));
            }
            if spec.tpdport >= 0 {
                match_opts.push_str(&format!(" -P {proto}:{}", spec.tpdport));
            }
        }

        let mut action_opts = String::new();
        if let Some(mac) = &spec.nxt_mac {
            action_opts.push_str(&format!(" -d {mac}"));
        }
        // ovs rejects the command unless write-metadata precedes only the
        // resubmit chain; keep -m then -R then the output verb in order
        if let Some(m) = &spec.meta_action {
            if !m.is_empty() {
                action_opts.push_str(&format!(" -m {m}"));
            }
        }
        if let Some(resub) = &spec.resub {
            for t in resub.split_whitespace() {
                action_opts.push_str(&format!(" -R ,{t}"));
            }
        }
        action_opts.push_str(" -N");

        let timeout = spec.expiry - unix_now();
        let table = if spec.table > 0 { Some(spec.table) } else { None };

        let targets: Vec<String> = match &spec.swid {
            Some(sw) => vec![sw.clone()],
            None => self.chosts.clone(),
        };
        if targets.is_empty() {
            warn!(pledge_id = %spec.id, "no targets for steering flow-mod");
            self.push_failed(&spec.id).await;
            return;
        }

        for host in targets {
            let fmod = FlowMod {
                host,
                table,
                timeout,
                priority: pri,
                match_opts: match_opts.clone(),
                action_opts: action_opts.clone(),
                verb: "add",
                cookie: COOKIE_STEER,
                bridge: DEFAULT_BRIDGE.into(),
            };
            let msg = ActionList::flowmod(vec![fmod.render()]).to_json();
            let _ = self.agents.send(AgentRequest::SendShort(msg)).await;
        }
    }

    /// Mirror setup runs the wizard on the owning host; it is long-running
    /// work and rides the reserved agent slot.
    async fn mirror(&mut self, pledge: MirrorPledge, remove: bool) {
        let command = if remove {
            format!("del {}", pledge.id)
        } else {
            let mut cmd = format!(
                "add {} {} {}",
                pledge.id,
                pledge.ports.join(","),
                pledge.output.to_wire()
            );
            if !pledge.vlans.is_empty() {
                let vlans: Vec<String> = pledge.vlans.iter().map(|v| v.to_string()).collect();
                cmd.push_str(&format!(" vlan:{}", vlans.join(",")));
            }
            if let Some(opts) = &pledge.options {
                cmd.push_str(&format!(" {opts}"));
            }
            cmd
        };

        debug!(pledge_id = %pledge.id, phost = %pledge.phost, remove, "mirror command");
        let msg = ActionList::mirrorwiz(&pledge.phost, &pledge.id, command).to_json();
        let _ = self.agents.send(AgentRequest::SendLong(msg)).await;
    }

    /// Explicit MAC wins; otherwise the IP must translate.
    fn resolve_mac(
        &self,
        mac: Option<&str>,
        ip: Option<&str>,
    ) -> Result<Option<String>, String> {
        if let Some(m) = mac {
            return Ok(Some(m.to_string()));
        }
        match ip {
            Some(ip) => match self.ip2mac.get(ip) {
                Some(m) => Ok(Some(m.clone())),
                None => Err(ip.to_string()),
            },
            None => Ok(None),
        }
    }

    async fn push_failed(&self, id: &str) {
        let _ = self
            .res
            .send(ResRequest::PushFailed { id: id.to_string() })
            .await;
    }
}
