//! Agent dispatcher.
//!
//! Agents on the compute nodes dial in over TCP and stay connected. This
//! actor owns the listening socket, an ordered list of live connections,
//! and the fan-out policy:
//!   - `SendAll` goes to every agent,
//!   - `SendShort` round-robins, skipping index 0 whenever more than one
//!     agent is connected (slot 0 is reserved for long-running work),
//!   - `SendLong` always goes to index 0.
//!
//! Inbound bytes are framed into complete JSON objects per connection and
//! dispatched by `ctype`/`rtype`/`state`.

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::network::NetRequest;
use crate::reservation::ResRequest;
use crate::wire::{ActionList, AgentResponse, JsonFrameCache};

/// Requests other actors send the dispatcher.
#[derive(Debug)]
pub enum AgentRequest {
    SendAll(String),
    SendShort(String),
    SendLong(String),
    /// Compute-host list used for broadcast operations.
    SetHosts(Vec<String>),
    /// Periodic request for a fresh mac-to-physical-host map.
    Mac2PhostTick,
}

pub type AgentHandle = mpsc::Sender<AgentRequest>;

enum ConnEvent {
    New {
        id: String,
        writer: mpsc::Sender<String>,
    },
    Data {
        id: String,
        bytes: Vec<u8>,
    },
    Closed {
        id: String,
    },
}

struct AgentConn {
    id: String,
    writer: mpsc::Sender<String>,
    cache: JsonFrameCache,
}

pub struct AgentManager {
    listener: Option<TcpListener>,
    req_rx: mpsc::Receiver<AgentRequest>,
    net: mpsc::Sender<NetRequest>,
    res: mpsc::Sender<ResRequest>,
    connected_tx: watch::Sender<usize>,
    shutdown: watch::Receiver<bool>,
    dscps: String,
    host_list: Vec<String>,
    agents: Vec<AgentConn>,
    rr_next: usize,
}

impl AgentManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: TcpListener,
        req_rx: mpsc::Receiver<AgentRequest>,
        net: mpsc::Sender<NetRequest>,
        res: mpsc::Sender<ResRequest>,
        connected_tx: watch::Sender<usize>,
        shutdown: watch::Receiver<bool>,
        dscps: String,
    ) -> Self {
        Self {
            listener: Some(listener),
            req_rx,
            net,
            res,
            connected_tx,
            shutdown,
            dscps,
            host_list: Vec::new(),
            agents: Vec::new(),
            rr_next: 0,
        }
    }

    pub async fn run(mut self) {
        let listener = self.listener.take().expect("listener set at construction");
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!(addr = %local, "agent manager listening");

        let (event_tx, mut event_rx) = mpsc::channel::<ConnEvent>(1024);
        let accept_shutdown = self.shutdown.clone();
        tokio::spawn(accept_loop(listener, event_tx, accept_shutdown));

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("agent manager shutting down");
                        break;
                    }
                }

                req = self.req_rx.recv() => {
                    match req {
                        Some(r) => self.handle_request(r),
                        None => break,
                    }
                }

                ev = event_rx.recv() => {
                    match ev {
                        Some(e) => self.handle_event(e).await,
                        None => break,
                    }
                }
            }
        }
    }

    fn handle_request(&mut self, req: AgentRequest) {
        match req {
            AgentRequest::SendAll(msg) => {
                debug!(bytes = msg.len(), agents = self.agents.len(), "send to all agents");
                for a in &self.agents {
                    deliver(a, &msg);
                }
            }
            AgentRequest::SendShort(msg) | AgentRequest::SendLong(msg)
                if self.agents.is_empty() =>
            {
                warn!("no agents connected, dropping message; push retry will cover it");
                let _ = msg;
            }
            AgentRequest::SendShort(msg) => {
                let idx = self.pick_short();
                deliver(&self.agents[idx], &msg);
            }
            AgentRequest::SendLong(msg) => {
                deliver(&self.agents[0], &msg);
            }
            AgentRequest::SetHosts(hosts) => {
                debug!(count = hosts.len(), "compute host list updated");
                self.host_list = hosts;
            }
            AgentRequest::Mac2PhostTick => {
                if !self.host_list.is_empty() && !self.agents.is_empty() {
                    let idx = self.pick_short();
                    let req = ActionList::map_mac2phost(&self.host_list).to_json();
                    deliver(&self.agents[idx], &req);
                }
            }
        }
    }

    /// Round-robin target index, reserving slot 0 when possible.
    fn pick_short(&mut self) -> usize {
        if self.agents.len() == 1 {
            return 0;
        }
        let n = self.agents.len() - 1;
        let idx = 1 + self.rr_next % n;
        self.rr_next = self.rr_next.wrapping_add(1);
        idx
    }

    async fn handle_event(&mut self, ev: ConnEvent) {
        match ev {
            ConnEvent::New { id, writer } => {
                info!(agent = %id, "new agent connection");
                let conn = AgentConn {
                    id,
                    writer,
                    cache: JsonFrameCache::new(),
                };
                self.prime(&conn);
                self.agents.push(conn);
                let _ = self.connected_tx.send(self.agents.len());
            }
            ConnEvent::Closed { id } => {
                info!(agent = %id, "agent dropped");
                self.agents.retain(|a| a.id != id);
                let _ = self.connected_tx.send(self.agents.len());
                // re-prime so the fabric maps stay fresh despite the loss
                if let Some(first) = self.agents.first() {
                    self.prime(first);
                }
            }
            ConnEvent::Data { id, bytes } => {
                let Some(agent) = self.agents.iter_mut().find(|a| a.id == id) else {
                    warn!(agent = %id, "data from unknown agent ignored");
                    return;
                };
                agent.cache.add_bytes(&bytes);
                let mut blobs = Vec::new();
                while let Some(blob) = agent.cache.next_object() {
                    blobs.push(blob);
                }
                for blob in blobs {
                    self.dispatch_blob(&id, &blob).await;
                }
            }
        }
    }

    /// Fresh-agent priming: ask for the mac map and a queue scaffold.
    fn prime(&self, conn: &AgentConn) {
        if self.host_list.is_empty() {
            return;
        }
        deliver(conn, &ActionList::map_mac2phost(&self.host_list).to_json());
        deliver(
            conn,
            &ActionList::intermed_queues(&self.host_list, &self.dscps).to_json(),
        );
    }

    async fn dispatch_blob(&self, agent_id: &str, blob: &[u8]) {
        let msg: AgentResponse = match serde_json::from_slice(blob) {
            Ok(m) => m,
            Err(e) => {
                warn!(agent = %agent_id, error = %e, "unparseable agent message");
                return;
            }
        };
        debug!(agent = %agent_id, ctype = %msg.ctype, rtype = %msg.rtype, state = msg.state, "agent message");

        if msg.ctype != "response" {
            warn!(agent = %agent_id, ctype = %msg.ctype, "unrecognized agent command type");
            return;
        }

        if msg.state == 0 {
            match msg.rtype.as_str() {
                "map_mac2phost" => {
                    let pairs = parse_mac2phost(&msg.rdata);
                    if !pairs.is_empty() {
                        let _ = self.net.send(NetRequest::MacToPhost(pairs)).await;
                    }
                }
                "mirrorwiz" => {
                    let _ = self
                        .res
                        .send(ResRequest::MirrorResult {
                            id: msg.rid.clone(),
                            output: Some(msg.rdata.join("\n")),
                            error: None,
                        })
                        .await;
                }
                other => {
                    debug!(agent = %agent_id, rtype = %other, "unhandled ok-response");
                }
            }
        } else {
            match msg.rtype.as_str() {
                "bwow_fmod" => {
                    error!(agent = %agent_id, rtype = %msg.rtype, state = msg.state,
                        edata = %msg.edata.join("; "), "fatal agent failure");
                }
                "mirrorwiz" => {
                    warn!(agent = %agent_id, rid = %msg.rid, state = msg.state, "mirror command failed");
                    let _ = self
                        .res
                        .send(ResRequest::MirrorResult {
                            id: msg.rid.clone(),
                            output: None,
                            error: Some(msg.edata.join("\n")),
                        })
                        .await;
                }
                other => {
                    warn!(agent = %agent_id, rtype = %other, state = msg.state, "failed agent command");
                }
            }
        }
    }
}

fn deliver(conn: &AgentConn, msg: &str) {
    if conn.writer.try_send(msg.to_string()).is_err() {
        warn!(agent = %conn.id, "agent write buffer full or closed, message dropped");
    }
}

/// `map_mac2phost` payload lines carry a mac and a physical host per line;
/// the token with colons is the mac.
fn parse_mac2phost(rdata: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in rdata {
        let toks: Vec<&str> = line.split_whitespace().collect();
        if toks.len() != 2 {
            continue;
        }
        if toks[0].contains(':') {
            out.push((toks[0].to_string(), toks[1].to_string()));
        } else {
            out.push((toks[1].to_string(), toks[0].to_string()));
        }
    }
    out
}

async fn accept_loop(
    listener: TcpListener,
    event_tx: mpsc::Sender<ConnEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut seq = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        seq += 1;
                        let id = format!("{addr}#{seq}");
                        spawn_connection(stream, id, event_tx.clone());
                    }
                    Err(e) => {
                        warn!(error = %e, "agent accept failed");
                    }
                }
            }
        }
    }
}

fn spawn_connection(stream: tokio::net::TcpStream, id: String, event_tx: mpsc::Sender<ConnEvent>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (mut rd, mut wr) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::channel::<String>(256);

    // writer side: drain the per-connection buffer onto the socket
    let wid = id.clone();
    tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            if wr.write_all(msg.as_bytes()).await.is_err()
                || wr.write_all(b"\n").await.is_err()
            {
                debug!(agent = %wid, "agent write failed, closing writer");
                return;
            }
        }
    });

    // reader side: bytes in, events out
    tokio::spawn(async move {
        let _ = event_tx
            .send(ConnEvent::New {
                id: id.clone(),
                writer: writer_tx,
            })
            .await;

        let mut buf = [0u8; 4096];
        loop {
            match rd.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if event_tx
                        .send(ConnEvent::Data {
                            id: id.clone(),
                            bytes: buf[..n].to_vec(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
        let _ = event_tx.send(ConnEvent::Closed { id }).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac2phost_parsing_tolerates_order() {
        let pairs = parse_mac2phost(&[
            "fa:16:3e:00:00:01 phys1".to_string(),
            "phys2 fa:16:3e:00:00:02".to_string(),
            "garbage".to_string(),
        ]);
        assert_eq!(
            pairs,
            vec![
                ("fa:16:3e:00:00:01".to_string(), "phys1".to_string()),
                ("fa:16:3e:00:00:02".to_string(), "phys2".to_string()),
            ]
        );
    }
}
