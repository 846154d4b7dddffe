//! Network manager.
//!
//! Owns the graph: switches, links, hosts, allotments, and the committed
//! reservations. Everything mutates through this actor's mailbox; other
//! actors read through requests with reply channels. The topology refreshes
//! from the fabric oracle on a ticker-driven cadence, and host-map changes
//! propagate snapshots to the flow-queue manager (ip -> mac, compute hosts).

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use tegu_netgraph::{
    Host, NetError, Network, PathPushPlan, QueueEntry, ReserveOutcome, ReserveRequest,
};

use crate::flowqueue::FqRequest;
use crate::oracle::FabricOracle;
use crate::unix_now;

#[derive(Debug)]
pub enum NetRequest {
    Reserve {
        req: ReserveRequest,
        reply: oneshot::Sender<Result<ReserveOutcome, NetError>>,
    },
    /// Release a reservation's queues and allotments. Replies once the
    /// release has been applied; the caller's expiry rewrite must wait on it.
    Release {
        id: String,
        reply: oneshot::Sender<()>,
    },
    /// Forget a released reservation entirely (extinct pledge purge).
    Forget {
        id: String,
    },
    /// Move a released reservation's paths under a new id so a yank clone
    /// can push withdrawal flow-mods while the old id is re-reserved.
    Rekey {
        from: String,
        to: String,
    },
    GetIp {
        name: String,
        reply: oneshot::Sender<Option<String>>,
    },
    GetHost {
        name: String,
        reply: oneshot::Sender<Option<Host>>,
    },
    PushPlan {
        id: String,
        probe: i64,
        reply: oneshot::Sender<Result<Vec<PathPushPlan>, NetError>>,
    },
    QueueMap {
        timestamp: i64,
        endpoint_only: bool,
        reply: oneshot::Sender<Vec<QueueEntry>>,
    },
    MacToPhost(Vec<(String, String)>),
    AddHost(Box<Host>),
    SetUlcap {
        tenant: String,
        pct: u32,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    ListUlcaps {
        reply: oneshot::Sender<std::collections::BTreeMap<String, u32>>,
    },
    SetDiscount {
        pct: u32,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    RefreshTopo,
    Graph {
        reply: oneshot::Sender<serde_json::Value>,
    },
    ListHosts {
        reply: oneshot::Sender<Vec<Host>>,
    },
    ListConns {
        name: String,
        reply: oneshot::Sender<Option<Vec<tegu_netgraph::Attachment>>>,
    },
}

pub type NetHandle = mpsc::Sender<NetRequest>;

pub struct NetworkManager {
    rx: mpsc::Receiver<NetRequest>,
    net: Network,
    oracle: Box<dyn FabricOracle>,
    fq: mpsc::Sender<FqRequest>,
    shutdown: watch::Receiver<bool>,
}

impl NetworkManager {
    pub fn new(
        rx: mpsc::Receiver<NetRequest>,
        default_ulcap: u32,
        oracle: Box<dyn FabricOracle>,
        fq: mpsc::Sender<FqRequest>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rx,
            net: Network::new(default_ulcap),
            oracle,
            fq,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("network manager running");
        self.refresh_topology().await;

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("network manager shutting down");
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

    async fn handle(&mut self, req: NetRequest) {
        match req {
            NetRequest::Reserve { req, reply } => {
                let _ = reply.send(self.net.reserve(&req));
            }
            NetRequest::Release { id, reply } => {
                self.net.release(&id, unix_now());
                let _ = reply.send(());
            }
            NetRequest::Forget { id } => {
                self.net.forget(&id, unix_now());
            }
            NetRequest::Rekey { from, to } => {
                self.net.rekey(&from, &to);
            }
            NetRequest::GetIp { name, reply } => {
                let _ = reply.send(self.net.get_ip(&name));
            }
            NetRequest::GetHost { name, reply } => {
                let _ = reply.send(self.net.find_host(&name).cloned());
            }
            NetRequest::PushPlan { id, probe, reply } => {
                let _ = reply.send(self.net.push_plan(&id, probe));
            }
            NetRequest::QueueMap {
                timestamp,
                endpoint_only,
                reply,
            } => {
                let _ = reply.send(self.net.queue_map(timestamp, endpoint_only));
            }
            NetRequest::MacToPhost(pairs) => {
                self.net.mac_to_phost(&pairs);
                self.propagate_host_maps().await;
            }
            NetRequest::AddHost(host) => {
                self.net.add_host(*host);
                self.propagate_host_maps().await;
            }
            NetRequest::SetUlcap { tenant, pct, reply } => {
                let _ = reply.send(self.net.set_user_link_cap(&tenant, pct));
            }
            NetRequest::ListUlcaps { reply } => {
                let _ = reply.send(self.net.user_link_caps());
            }
            NetRequest::SetDiscount { pct, reply } => {
                let _ = reply.send(self.net.set_discount(pct));
            }
            NetRequest::RefreshTopo => {
                self.refresh_topology().await;
            }
            NetRequest::Graph { reply } => {
                let _ = reply.send(self.net.graph_json());
            }
            NetRequest::ListHosts { reply } => {
                let _ = reply.send(self.net.list_hosts());
            }
            NetRequest::ListConns { name, reply } => {
                let _ = reply.send(self.net.list_conns(&name));
            }
        }
    }

    async fn refresh_topology(&mut self) {
        match self.oracle.snapshot().await {
            Ok(topo) => {
                self.net.apply_topology(topo);
                self.propagate_host_maps().await;
            }
            Err(e) => {
                warn!(error = %e, "topology refresh failed, keeping current graph");
            }
        }
    }

    /// Feed the flow-queue manager the maps it translates with.
    async fn propagate_host_maps(&self) {
        let _ = self
            .fq
            .send(FqRequest::MacMap(self.net.ip2mac_snapshot()))
            .await;
        let _ = self
            .fq
            .send(FqRequest::HostList(self.net.phost_list()))
            .await;
    }
}
