//! Shared harness for controller integration tests.
//!
//! Spins up the reservation, network, and flow-queue actors against a static
//! topology, with the agent dispatcher replaced by a channel sink so tests
//! can assert on exactly what would have gone to the wire.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use tegu_controller::agents::AgentRequest;
use tegu_controller::checkpoint::CheckpointStore;
use tegu_controller::flowqueue::{FlowQueueManager, FqRequest};
use tegu_controller::network::{NetRequest, NetworkManager};
use tegu_controller::oracle::StaticOracle;
use tegu_controller::reservation::{ResError, ResRequest, ReservationManager};
use tegu_controller::unix_now;
use tegu_netgraph::{Attachment, Host, LinkSpec, TopoSnapshot};
use tegu_pledge::{BandwidthPledge, Pledge};

pub const GBIT: i64 = 125_000_000; // 1 Gbit/s in bytes/sec

pub fn host(name: &str, ip: &str, sw: &str, port: i32, phost: &str) -> Host {
    let mut h = Host::new(name);
    h.ip4 = Some(ip.to_string());
    h.mac = Some(format!("fa:16:3e:00:00:{port:02x}"));
    h.phost = Some(phost.to_string());
    h.attachments = vec![Attachment {
        switch: sw.to_string(),
        port,
    }];
    h
}

/// swA --- swB --- swC with a host hanging off each outer switch.
pub fn line_topo() -> TopoSnapshot {
    let link = |sw1: &str, p1, sw2: &str, p2| LinkSpec {
        sw1: sw1.into(),
        port1: p1,
        sw2: sw2.into(),
        port2: p2,
        capacity: Some(GBIT),
    };
    TopoSnapshot {
        links: vec![link("swA", 1, "swB", 1), link("swB", 2, "swC", 1)],
        hosts: vec![
            host("vm1", "10.0.0.1", "swA", 10, "phys1"),
            host("vm2", "10.0.0.2", "swC", 10, "phys2"),
        ],
    }
}

pub struct TestBed {
    pub res: mpsc::Sender<ResRequest>,
    pub net: mpsc::Sender<NetRequest>,
    pub agent_rx: mpsc::Receiver<AgentRequest>,
    pub ckpt_dir: PathBuf,
    _tmp: tempfile::TempDir,
    _shutdown_tx: watch::Sender<bool>,
    _connected_tx: watch::Sender<usize>,
}

pub async fn spawn_bed(topo: TopoSnapshot) -> TestBed {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (connected_tx, connected_rx) = watch::channel(1usize);

    let (res_tx, res_rx) = mpsc::channel::<ResRequest>(256);
    let (net_tx, net_rx) = mpsc::channel::<NetRequest>(256);
    let (fq_tx, fq_rx) = mpsc::channel::<FqRequest>(256);
    let (agent_tx, agent_rx) = mpsc::channel::<AgentRequest>(256);

    let fq = FlowQueueManager::new(
        fq_rx,
        agent_tx,
        res_tx.clone(),
        connected_rx,
        shutdown_rx.clone(),
        Duration::from_secs(1800),
        "40 41 42".to_string(),
    );
    tokio::spawn(fq.run());

    let net = NetworkManager::new(
        net_rx,
        100,
        Box::new(StaticOracle(topo)),
        fq_tx.clone(),
        shutdown_rx.clone(),
    );
    tokio::spawn(net.run());

    let tmp = tempfile::tempdir().expect("tempdir");
    let ckpt_dir = tmp.path().to_path_buf();
    let ckpt = CheckpointStore::open(&ckpt_dir, 10, 90).expect("checkpoint store");
    let res = ReservationManager::new(
        res_rx,
        net_tx.clone(),
        fq_tx,
        ckpt,
        "admin".to_string(),
        false,
        shutdown_rx,
    );
    tokio::spawn(res.run());

    // wait for the network manager's initial topology refresh
    let (tx, rx) = oneshot::channel();
    net_tx
        .send(NetRequest::ListHosts { reply: tx })
        .await
        .unwrap();
    rx.await.unwrap();

    TestBed {
        res: res_tx,
        net: net_tx,
        agent_rx,
        ckpt_dir,
        _tmp: tmp,
        _shutdown_tx: shutdown_tx,
        _connected_tx: connected_tx,
    }
}

impl TestBed {
    pub fn bandwidth(
        id: &str,
        cookie: &str,
        out: i64,
        inb: i64,
        commence: i64,
        expiry: i64,
    ) -> Pledge {
        Pledge::Bandwidth(
            BandwidthPledge::new(id, cookie, "vm1", "vm2", out, inb, commence, expiry, unix_now())
                .expect("valid pledge"),
        )
    }

    pub async fn add(&self, pledge: Pledge) -> Result<(), ResError> {
        let (tx, rx) = oneshot::channel();
        self.res
            .send(ResRequest::Add {
                pledge: Box::new(pledge),
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn del(&self, name: &str, cookie: &str) -> Result<(), ResError> {
        let (tx, rx) = oneshot::channel();
        self.res
            .send(ResRequest::Del {
                name: name.into(),
                cookie: cookie.into(),
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn get(&self, name: &str, cookie: &str) -> Result<Pledge, ResError> {
        let (tx, rx) = oneshot::channel();
        self.res
            .send(ResRequest::Get {
                name: name.into(),
                cookie: cookie.into(),
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn list(&self) -> String {
        let (tx, rx) = oneshot::channel();
        self.res.send(ResRequest::List { reply: tx }).await.unwrap();
        rx.await.unwrap()
    }

    pub async fn push_tick(&self) {
        self.res.send(ResRequest::PushTick).await.unwrap();
    }

    /// Collect everything headed for the agents until the line goes quiet.
    pub async fn drain_agent(&mut self) -> Vec<AgentRequest> {
        let mut out = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_millis(300), self.agent_rx.recv()).await {
                Ok(Some(req)) => out.push(req),
                _ => break,
            }
        }
        out
    }
}

/// Pull the flow-mod command strings out of captured agent requests.
pub fn flowmod_strings(reqs: &[AgentRequest]) -> Vec<String> {
    let mut out = Vec::new();
    for r in reqs {
        let msg = match r {
            AgentRequest::SendAll(m) | AgentRequest::SendShort(m) | AgentRequest::SendLong(m) => m,
            _ => continue,
        };
        let v: serde_json::Value = serde_json::from_str(msg).expect("wire json");
        if let Some(actions) = v["actions"].as_array() {
            for a in actions {
                if a["atype"] == "flowmod" {
                    for f in a["fdata"].as_array().into_iter().flatten() {
                        out.push(f.as_str().unwrap().to_string());
                    }
                }
            }
        }
    }
    out
}

/// The relative timeout (`-t N`) of a rendered flow-mod.
pub fn fmod_timeout(fmod: &str) -> i64 {
    let mut toks = fmod.split_whitespace();
    while let Some(t) = toks.next() {
        if t == "-t" {
            return toks.next().unwrap().parse().unwrap();
        }
    }
    panic!("no timeout in flow-mod: {fmod}");
}
