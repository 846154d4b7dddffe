//! Reservation manager.
//!
//! Owns the pledge inventory and its lifecycle: admission, authorization,
//! deletion-by-expiry-rewrite, pause/resume, checkpointing and reload, and
//! the scheduler ticks that turn pledges into flow-mod requests just before
//! they go live.
//!
//! Ordering matters in exactly one place: deletion releases the network
//! manager's queues and allotments *before* the expiry rewrite. Rewriting
//! first would split timeslices on the new boundary and strand queues.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use tegu_netgraph::{NetError, PathPushPlan, ReserveRequest};
use tegu_pledge::{Pledge, DELETE_LINGER_SECS, EXTINCT_AFTER_SECS};

use crate::checkpoint::{read_lines, CheckpointStore};
use crate::flowqueue::{ExtDirection, FqRequest, IeReserveSpec, SteerSpec, LATE_BINDING_PORT};
use crate::network::NetRequest;
use crate::unix_now;

/// Pledges commencing within this many seconds are pushed early so their
/// flow-mods are in place when the window opens.
const PUSH_LEAD_SECS: i64 = 15;

/// Probe offset for queue-number lookups: lands inside the first
/// post-activation timeslice.
const PUSH_PROBE_SECS: i64 = 16;

#[derive(Debug, Error)]
pub enum ResError {
    #[error("not authorised")]
    Unauthorized,

    #[error("cannot find reservation: {0}")]
    NotFound(String),

    #[error("reservation already exists: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cannot reserve: {0}")]
    CannotReserve(String),

    #[error("network manager unavailable")]
    NetDown,
}

impl From<NetError> for ResError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::NoPath { .. } => ResError::CannotReserve(e.to_string()),
            NetError::AlreadyReserved(id) => ResError::Conflict(id),
            other => ResError::InvalidRequest(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum ResRequest {
    Add {
        pledge: Box<Pledge>,
        reply: oneshot::Sender<Result<(), ResError>>,
    },
    Get {
        name: String,
        cookie: String,
        reply: oneshot::Sender<Result<Pledge, ResError>>,
    },
    Del {
        name: String,
        cookie: String,
        reply: oneshot::Sender<Result<(), ResError>>,
    },
    DelAll {
        cookie: String,
        reply: oneshot::Sender<usize>,
    },
    List {
        reply: oneshot::Sender<String>,
    },
    PledgeList {
        vmname: String,
        reply: oneshot::Sender<Vec<Pledge>>,
    },
    Pause,
    Resume,
    Checkpoint,
    Load {
        path: PathBuf,
        reply: oneshot::Sender<Result<usize, ResError>>,
    },
    Yank {
        name: String,
        reply: oneshot::Sender<Result<Pledge, ResError>>,
    },
    /// Re-path every bandwidth pledge touching a migrated VM.
    Refresh {
        vmname: String,
        reply: oneshot::Sender<usize>,
    },
    PushTick,
    QueueTick,
    PushFailed {
        id: String,
    },
    MirrorResult {
        id: String,
        output: Option<String>,
        error: Option<String>,
    },
}

pub type ResHandle = mpsc::Sender<ResRequest>;

enum PushAction {
    Skip,
    Bandwidth,
    Steer,
    MirrorAdd(Box<tegu_pledge::MirrorPledge>),
    MirrorDel(Box<tegu_pledge::MirrorPledge>),
}

pub struct ReservationManager {
    rx: mpsc::Receiver<ResRequest>,
    net: mpsc::Sender<NetRequest>,
    fq: mpsc::Sender<FqRequest>,
    ckpt: CheckpointStore,
    super_cookie: String,
    endpoint_queues_only: bool,
    shutdown: watch::Receiver<bool>,
    inventory: HashMap<String, Pledge>,
    last_qcheck: i64,
}

impl ReservationManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: mpsc::Receiver<ResRequest>,
        net: mpsc::Sender<NetRequest>,
        fq: mpsc::Sender<FqRequest>,
        ckpt: CheckpointStore,
        super_cookie: String,
        endpoint_queues_only: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rx,
            net,
            fq,
            ckpt,
            super_cookie,
            endpoint_queues_only,
            shutdown,
            inventory: HashMap::new(),
            last_qcheck: unix_now(),
        }
    }

    pub async fn run(mut self) {
        info!("reservation manager running");
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // park the inventory before going down
                        self.write_checkpoint().await;
                        info!("reservation manager shutting down");
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

    async fn handle(&mut self, req: ResRequest) {
        match req {
            ResRequest::Add { pledge, reply } => {
                let _ = reply.send(self.add_pledge(*pledge).await);
            }
            ResRequest::Get {
                name,
                cookie,
                reply,
            } => {
                let _ = reply.send(self.get_pledge(&name, &cookie).map(|p| p.clone()));
            }
            ResRequest::Del {
                name,
                cookie,
                reply,
            } => {
                let _ = reply.send(self.del_pledge(&name, &cookie).await);
            }
            ResRequest::DelAll { cookie, reply } => {
                let _ = reply.send(self.del_all(&cookie).await);
            }
            ResRequest::List { reply } => {
                let _ = reply.send(self.list_json());
            }
            ResRequest::PledgeList { vmname, reply } => {
                let list = self
                    .inventory
                    .values()
                    .filter(|p| p.references_host(&vmname))
                    .cloned()
                    .collect();
                let _ = reply.send(list);
            }
            ResRequest::Pause => {
                info!("pausing all reservations");
                for p in self.inventory.values_mut() {
                    p.set_paused(true);
                }
            }
            ResRequest::Resume => {
                info!("resuming all reservations");
                for p in self.inventory.values_mut() {
                    p.set_paused(false);
                }
            }
            ResRequest::Checkpoint => {
                self.write_checkpoint().await;
            }
            ResRequest::Load { path, reply } => {
                let _ = reply.send(self.load_checkpoint(&path).await);
            }
            ResRequest::Yank { name, reply } => {
                let _ = reply.send(self.yank(&name).await);
            }
            ResRequest::Refresh { vmname, reply } => {
                let _ = reply.send(self.refresh(&vmname).await);
            }
            ResRequest::PushTick => {
                self.push_reservations().await;
            }
            ResRequest::QueueTick => {
                self.check_queues().await;
            }
            ResRequest::PushFailed { id } => {
                warn!(pledge_id = %id, "proactive reservation push failed, will retry");
                if let Some(p) = self.inventory.get_mut(&id) {
                    p.set_pushed(false);
                }
            }
            ResRequest::MirrorResult { id, output, error } => {
                if let Some(Pledge::Mirror(m)) = self.inventory.get_mut(&id) {
                    m.last_output = output;
                    m.last_error = error;
                } else {
                    debug!(pledge_id = %id, "mirror result for unknown pledge");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // inventory operations
    // ------------------------------------------------------------------

    fn authorized(&self, pledge: &Pledge, cookie: &str) -> bool {
        pledge.is_valid_cookie(cookie) || cookie == self.super_cookie
    }

    async fn add_pledge(&mut self, mut pledge: Pledge) -> Result<(), ResError> {
        let id = pledge.id().to_string();
        if self.inventory.contains_key(&id) {
            return Err(ResError::Conflict(id));
        }

        if let Pledge::Bandwidth(b) = &mut pledge {
            let req = ReserveRequest {
                id: b.id.clone(),
                tenant: b.tenant().to_string(),
                h1: b.h1.clone(),
                h2: b.h2.clone(),
                amt_out: b.amt_out,
                amt_in: b.amt_in,
                commence: b.window.commence,
                expiry: b.window.expiry,
                ext_ip: b.ext_ip.clone(),
            };
            let (tx, rx) = oneshot::channel();
            self.net
                .send(NetRequest::Reserve { req, reply: tx })
                .await
                .map_err(|_| ResError::NetDown)?;
            let outcome = rx.await.map_err(|_| ResError::NetDown)??;
            b.paths = outcome.paths;
        }

        info!(pledge_id = %id, kind = pledge.kind(), "reservation added");
        self.inventory.insert(id, pledge);
        Ok(())
    }

    fn get_pledge(&self, name: &str, cookie: &str) -> Result<&Pledge, ResError> {
        let p = self
            .inventory
            .get(name)
            .ok_or_else(|| ResError::NotFound(name.to_string()))?;
        if !self.authorized(p, cookie) {
            debug!(pledge_id = %name, "cookie mismatch on fetch");
            return Err(ResError::Unauthorized);
        }
        Ok(p)
    }

    /// Delete by rewriting expiry to the near future: the next push emits
    /// flow-mods with a tiny timeout that take the reservation out of the
    /// fabric without explicit deletes. The network release MUST come first.
    async fn del_pledge(&mut self, name: &str, cookie: &str) -> Result<(), ResError> {
        self.get_pledge(name, cookie)?;
        let now = unix_now();

        let is_bandwidth = matches!(self.inventory.get(name), Some(Pledge::Bandwidth(_)));
        if is_bandwidth {
            let (tx, rx) = oneshot::channel();
            self.net
                .send(NetRequest::Release {
                    id: name.to_string(),
                    reply: tx,
                })
                .await
                .map_err(|_| ResError::NetDown)?;
            rx.await.map_err(|_| ResError::NetDown)?;
        }

        let p = self.inventory.get_mut(name).expect("checked above");
        if let Pledge::Mirror(m) = p {
            // mirrors need an explicit teardown command; send it right away
            m.removed = true;
            let _ = self
                .fq
                .send(FqRequest::Mirror {
                    pledge: Box::new(m.clone()),
                    remove: true,
                })
                .await;
        }
        p.window_mut().set_expiry(now + DELETE_LINGER_SECS);
        p.set_pushed(false);
        info!(pledge_id = %name, "reservation deleted");
        Ok(())
    }

    async fn del_all(&mut self, cookie: &str) -> usize {
        let names: Vec<String> = self.inventory.keys().cloned().collect();
        let mut ndel = 0;
        for name in names {
            if self.del_pledge(&name, cookie).await.is_ok() {
                ndel += 1;
            }
        }
        info!(deleted = ndel, "delete-all complete");
        ndel
    }

    fn list_json(&self) -> String {
        let now = unix_now();
        let mut out = Vec::new();
        for p in self.inventory.values() {
            if p.window().is_expired(now) {
                continue;
            }
            if let Ok(mut v) = serde_json::to_value(p) {
                v["state"] = serde_json::Value::from(p.window().state(now));
                out.push(v);
            }
        }
        serde_json::Value::Array(out).to_string()
    }

    /// Pull a reservation for re-pathing: the clone stays behind with an
    /// imminent expiry so the next tick pushes withdrawal flow-mods, and the
    /// released paths move under the clone's id so that push can resolve
    /// them. The network release happens before any expiry is touched.
    async fn yank(&mut self, name: &str) -> Result<Pledge, ResError> {
        let original = self
            .inventory
            .remove(name)
            .ok_or_else(|| ResError::NotFound(name.to_string()))?;

        let clone_id = format!("{name}.yank");
        let clone = original.clone_as(&clone_id);
        self.inventory.insert(clone_id.clone(), clone);

        if matches!(original, Pledge::Bandwidth(_)) {
            let (tx, rx) = oneshot::channel();
            self.net
                .send(NetRequest::Release {
                    id: name.to_string(),
                    reply: tx,
                })
                .await
                .map_err(|_| ResError::NetDown)?;
            rx.await.map_err(|_| ResError::NetDown)?;
            // release first (queue shares are named by the original id),
            // then hand the skeleton to the clone
            let _ = self
                .net
                .send(NetRequest::Rekey {
                    from: name.to_string(),
                    to: clone_id.clone(),
                })
                .await;
        }

        let now = unix_now();
        if let Some(cp) = self.inventory.get_mut(&clone_id) {
            cp.window_mut().set_expiry(now + DELETE_LINGER_SECS);
            cp.set_pushed(false);
        }

        info!(pledge_id = %name, "reservation yanked");
        Ok(original)
    }

    /// After a VM migration: yank affected bandwidth pledges and re-add
    /// them under the same id/cookie so new paths and flow-mods are built.
    async fn refresh(&mut self, vmname: &str) -> usize {
        let now = unix_now();
        let ids: Vec<String> = self
            .inventory
            .iter()
            .filter(|(_, p)| matches!(p, Pledge::Bandwidth(_)) && p.references_host(vmname))
            .map(|(id, _)| id.clone())
            .collect();

        let mut refreshed = 0;
        for id in ids {
            let Ok(Pledge::Bandwidth(old)) = self.yank(&id).await else {
                continue;
            };
            if old.window.is_expired(now) {
                continue;
            }
            let rebuilt = tegu_pledge::BandwidthPledge {
                paths: Vec::new(),
                pushed: false,
                ..old
            };
            match self.add_pledge(Pledge::Bandwidth(rebuilt)).await {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    warn!(pledge_id = %id, error = %e, "refresh could not re-reserve");
                }
            }
        }
        info!(vm = %vmname, refreshed, "refresh complete");
        refreshed
    }

    // ------------------------------------------------------------------
    // scheduler ticks
    // ------------------------------------------------------------------

    fn any_concluded(&self, now: i64, gap: i64) -> bool {
        self.inventory
            .values()
            .any(|p| p.window().concluded_recently(now, gap))
    }

    fn any_commencing(&self, now: i64, gap: i64) -> bool {
        self.inventory
            .values()
            .any(|p| p.window().commenced_recently(now, gap) || p.window().is_active_soon(now, 0))
    }

    /// Reservation state changed since the last check: ask for a fresh
    /// queue plan and hand it to the flow-queue manager.
    async fn check_queues(&mut self) {
        let now = unix_now();
        let gap = now - self.last_qcheck;
        if gap <= 0 {
            return;
        }
        self.last_qcheck = now;
        if !(self.any_concluded(now, gap) || self.any_commencing(now, gap)) {
            return;
        }

        debug!("reservation state change detected, regenerating queue plan");
        let (tx, rx) = oneshot::channel();
        if self
            .net
            .send(NetRequest::QueueMap {
                timestamp: now,
                endpoint_only: self.endpoint_queues_only,
                reply: tx,
            })
            .await
            .is_err()
        {
            return;
        }
        if let Ok(entries) = rx.await {
            let _ = self.fq.send(FqRequest::SetQueues(entries)).await;
        }
    }

    /// Walk the inventory and emit flow-mod requests for anything unpushed
    /// that is live now or goes live within the lead window.
    async fn push_reservations(&mut self) {
        let now = unix_now();
        let ids: Vec<String> = self.inventory.keys().cloned().collect();
        let mut pushed = 0usize;

        for id in ids {
            let action = {
                let Some(p) = self.inventory.get(&id) else { continue };
                let w = p.window();
                let eligible = !p.is_pushed()
                    && (w.is_active(now) || w.is_active_soon(now, PUSH_LEAD_SECS));
                match p {
                    Pledge::Bandwidth(_) if eligible => PushAction::Bandwidth,
                    Pledge::Steer(_) if eligible => PushAction::Steer,
                    Pledge::Mirror(m) => {
                        if m.window.is_expired(now) {
                            if m.pushed && !m.removed {
                                PushAction::MirrorDel(Box::new(m.clone()))
                            } else {
                                PushAction::Skip
                            }
                        } else if !m.pushed
                            && !m.paused
                            && (m.window.is_active(now)
                                || m.window.is_active_soon(now, PUSH_LEAD_SECS))
                        {
                            PushAction::MirrorAdd(Box::new(m.clone()))
                        } else {
                            PushAction::Skip
                        }
                    }
                    _ => PushAction::Skip,
                }
            };

            match action {
                PushAction::Skip => {}
                PushAction::Bandwidth => {
                    if self.push_bandwidth(&id, now).await {
                        if let Some(p) = self.inventory.get_mut(&id) {
                            p.set_pushed(true);
                        }
                        pushed += 1;
                    }
                }
                PushAction::Steer => {
                    if self.push_steer(&id, now).await {
                        if let Some(p) = self.inventory.get_mut(&id) {
                            p.set_pushed(true);
                        }
                        pushed += 1;
                    }
                }
                PushAction::MirrorAdd(m) => {
                    let _ = self
                        .fq
                        .send(FqRequest::Mirror {
                            pledge: m,
                            remove: false,
                        })
                        .await;
                    if let Some(p) = self.inventory.get_mut(&id) {
                        p.set_pushed(true);
                    }
                    pushed += 1;
                }
                PushAction::MirrorDel(m) => {
                    let _ = self
                        .fq
                        .send(FqRequest::Mirror {
                            pledge: m,
                            remove: true,
                        })
                        .await;
                    if let Some(Pledge::Mirror(mm)) = self.inventory.get_mut(&id) {
                        mm.removed = true;
                    }
                }
            }
        }

        if pushed > 0 {
            info!(pushed, "proactive reservations pushed");
        }
    }

    /// The push algorithm for one bandwidth pledge: per path, the forward
    /// direction (into-h2 endpoint, ingress switch, forward intermediates)
    /// and then the reverse with transport ports swapped.
    async fn push_bandwidth(&self, id: &str, now: i64) -> bool {
        let Some(Pledge::Bandwidth(b)) = self.inventory.get(id) else {
            return false;
        };
        let b = b.clone();

        let expiry = if b.paused {
            now + DELETE_LINGER_SECS
        } else {
            b.window.expiry
        };

        let (tx, rx) = oneshot::channel();
        if self
            .net
            .send(NetRequest::PushPlan {
                id: id.to_string(),
                probe: now + PUSH_PROBE_SECS,
                reply: tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        let plans = match rx.await {
            Ok(Ok(plans)) => plans,
            Ok(Err(e)) => {
                warn!(pledge_id = %id, error = %e, "no push plan, pledge stays unpushed");
                return false;
            }
            Err(_) => return false,
        };

        for plan in &plans {
            debug!(
                pledge_id = %id,
                ip1 = %plan.ip1,
                ip2 = %plan.ip2,
                "sending i/e flow-mods for path"
            );
            let mut specs = Vec::new();

            // h1 -> h2
            self.collect_direction(
                &mut specs, id, &b, plan, expiry, false, // forward
            );
            // h2 -> h1
            self.collect_direction(
                &mut specs, id, &b, plan, expiry, true, // reverse
            );

            for spec in specs {
                let _ = self.fq.send(FqRequest::IeReserve(Box::new(spec))).await;
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_direction(
        &self,
        specs: &mut Vec<IeReserveSpec>,
        id: &str,
        b: &tegu_pledge::BandwidthPledge,
        plan: &PathPushPlan,
        expiry: i64,
        reverse: bool,
    ) {
        let (ip1, ip2) = if reverse {
            (plan.ip2.clone(), plan.ip1.clone())
        } else {
            (plan.ip1.clone(), plan.ip2.clone())
        };
        let (sport, dport) = if reverse { (b.p2, b.p1) } else { (b.p1, b.p2) };
        let ext_ty = if reverse {
            ExtDirection::Source
        } else {
            ExtDirection::Dest
        };

        let base = |spq: tegu_netgraph::Spq, dir_in: bool| IeReserveSpec {
            id: id.to_string(),
            spq,
            ip1: ip1.clone(),
            ip2: ip2.clone(),
            tp_sport: sport,
            tp_dport: dport,
            dir_in,
            ext_ip: plan.ext_ip.clone(),
            ext_ty,
            dscp: b.dscp,
            expiry,
        };

        if reverse {
            // data flowing into h1 over its endpoint link
            if let Some(spq) = &plan.espq0 {
                specs.push(base(spq.clone(), true));
            }
            if let Some(spq) = &plan.egress {
                specs.push(base(spq.clone(), false));
            }
            for spq in &plan.bwd_intermediates {
                specs.push(base(spq.clone(), false));
            }
        } else {
            // data flowing into h2 over its endpoint link
            if let Some(spq) = &plan.espq1 {
                specs.push(base(spq.clone(), true));
            }
            if let Some(spq) = &plan.ingress {
                specs.push(base(spq.clone(), false));
            }
            for spq in &plan.fwd_intermediates {
                specs.push(base(spq.clone(), false));
            }
        }
    }

    /// The steering chain: one flow-mod per hop, each rewriting the
    /// destination MAC to the next middlebox; later hops late-bind their
    /// inbound port to the previous middlebox's MAC.
    async fn push_steer(&self, id: &str, now: i64) -> bool {
        let Some(Pledge::Steer(s)) = self.inventory.get(id) else {
            return false;
        };
        let s = s.clone();

        let Some(src_ip) = self.lookup_ip(&s.src).await else {
            warn!(pledge_id = %id, host = %s.src, "steering source did not resolve");
            return false;
        };
        let Some(dst_ip) = self.lookup_ip(&s.dest).await else {
            warn!(pledge_id = %id, host = %s.dest, "steering destination did not resolve");
            return false;
        };

        let mut mbox_hosts = Vec::with_capacity(s.mboxes.len());
        for name in &s.mboxes {
            match self.lookup_host(name).await {
                Some(h) if h.mac.is_some() => mbox_hosts.push(h),
                _ => {
                    warn!(pledge_id = %id, mbox = %name, "middlebox did not resolve");
                    return false;
                }
            }
        }

        let src_host = self.lookup_host(&s.src).await;
        let expiry = if s.paused {
            now + DELETE_LINGER_SECS
        } else {
            s.window.expiry
        };

        let (protocol, tpdport) = parse_protocol(s.protocol.as_deref());

        let n = mbox_hosts.len();
        for i in 0..=n {
            let (swport, lbmac, swid) = if i == 0 {
                (
                    -1,
                    None,
                    src_host.as_ref().and_then(|h| h.phost.clone()),
                )
            } else {
                let prev = &mbox_hosts[i - 1];
                (LATE_BINDING_PORT, prev.mac.clone(), prev.phost.clone())
            };
            let nxt_mac = if i < n { mbox_hosts[i].mac.clone() } else { None };

            let spec = SteerSpec {
                id: id.to_string(),
                pri: 0,
                expiry,
                ip1: Some(src_ip.clone()),
                ip2: Some(dst_ip.clone()),
                smac: None,
                dmac: None,
                nxt_mac,
                swid,
                swport,
                lbmac,
                table: 0,
                resub: None,
                meta_match: None,
                meta_action: None,
                protocol: protocol.clone(),
                tpsport: -1,
                tpdport,
            };
            let _ = self.fq.send(FqRequest::Steer(Box::new(spec))).await;
        }
        true
    }

    async fn lookup_ip(&self, name: &str) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        self.net
            .send(NetRequest::GetIp {
                name: name.to_string(),
                reply: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    async fn lookup_host(&self, name: &str) -> Option<tegu_netgraph::Host> {
        let (tx, rx) = oneshot::channel();
        self.net
            .send(NetRequest::GetHost {
                name: name.to_string(),
                reply: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    // ------------------------------------------------------------------
    // checkpointing
    // ------------------------------------------------------------------

    /// Serialize the live inventory; purge anything extinct while we walk.
    async fn write_checkpoint(&mut self) {
        let now = unix_now();

        // only pledges whose withdrawal flow-mods went out are safe to drop
        let extinct: Vec<String> = self
            .inventory
            .iter()
            .filter(|(_, p)| p.window().is_extinct(now, EXTINCT_AFTER_SECS) && p.is_pushed())
            .map(|(id, _)| id.clone())
            .collect();
        for id in extinct {
            info!(pledge_id = %id, "extinct reservation purged");
            self.inventory.remove(&id);
            let _ = self.net.send(NetRequest::Forget { id }).await;
        }

        let mut lines = Vec::new();
        for p in self.inventory.values() {
            if p.window().is_expired(now) {
                continue;
            }
            match p.to_checkpoint_line() {
                Ok(l) => lines.push(l),
                Err(e) => warn!(pledge_id = %p.id(), error = %e, "pledge not checkpointable"),
            }
        }

        if let Err(e) = self.ckpt.write(lines) {
            // inventory is still in memory; losing one checkpoint is survivable
            tracing::error!(error = %e, "checkpoint write failed");
        }
    }

    /// Reload a checkpoint: records re-reserve their paths against the
    /// current topology; those that no longer fit are dropped with a warning.
    async fn load_checkpoint(&mut self, path: &std::path::Path) -> Result<usize, ResError> {
        let lines = read_lines(path)
            .map_err(|e| ResError::InvalidRequest(format!("checkpoint read: {e}")))?;
        let now = unix_now();
        let mut loaded = 0usize;

        for line in &lines {
            match Pledge::from_checkpoint_line(line) {
                Ok(Some(p)) => {
                    if p.window().is_expired(now) {
                        debug!(pledge_id = %p.id(), "expired pledge in checkpoint ignored");
                        continue;
                    }
                    let id = p.id().to_string();
                    match self.add_pledge(p).await {
                        Ok(()) => loaded += 1,
                        Err(e) => {
                            warn!(pledge_id = %id, error = %e, "checkpointed pledge rejected on reload");
                        }
                    }
                }
                Ok(None) => debug!("unknown record type in checkpoint skipped"),
                Err(e) => warn!(error = %e, "bad checkpoint record skipped"),
            }
        }

        info!(records = lines.len(), loaded, path = %path.display(), "checkpoint loaded");
        Ok(loaded)
    }
}

fn parse_protocol(spec: Option<&str>) -> (Option<String>, i32) {
    match spec {
        None => (None, -1),
        Some(s) => match s.split_once(':') {
            Some((proto, port)) => (
                Some(proto.to_string()),
                port.parse().unwrap_or(-1),
            ),
            None => (Some(s.to_string()), -1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parsing() {
        assert_eq!(parse_protocol(None), (None, -1));
        assert_eq!(parse_protocol(Some("tcp")), (Some("tcp".into()), -1));
        assert_eq!(parse_protocol(Some("udp:53")), (Some("udp".into()), 53));
        assert_eq!(parse_protocol(Some("tcp:junk")), (Some("tcp".into()), -1));
    }
}
