//! Agent wire protocol.
//!
//! Both directions are line-oriented JSON objects framed by valid-JSON
//! boundaries. Outbound commands are `action_list` envelopes; inbound
//! messages are agent responses keyed by `ctype`/`rtype`/`state`.
//!
//! Flow-mod invocations travel inside `fdata` as single command strings the
//! agent hands to its local tooling:
//!
//! ```text
//! -h <host> [-T <table>] -t <timeout> -p <priority> --match <opts> --action <opts> <verb> <cookie> <bridge>
//! ```

use serde::{Deserialize, Serialize};

/// Flow-mod cookies, 16-bit hex by subsystem.
pub const COOKIE_MIRROR: &str = "0xfaad";
pub const COOKIE_QUEUE: &str = "0xbeef";
pub const COOKIE_STEER: &str = "0xe5d";
pub const COOKIE_INGRESS_RL: &str = "0xdeaf";

/// The integration bridge flow-mods land on.
pub const DEFAULT_BRIDGE: &str = "br-int";

/// One action inside an outbound `action_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub atype: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dscps: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fdata: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qdata: Vec<String>,
    /// Request id echoed back in responses (mirror commands use the pledge id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
}

/// Outbound command envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionList {
    pub ctype: String,
    pub actions: Vec<Action>,
}

impl ActionList {
    pub fn one(action: Action) -> Self {
        Self {
            ctype: "action_list".to_string(),
            actions: vec![action],
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("action list serializes")
    }

    pub fn map_mac2phost(hosts: &[String]) -> Self {
        Self::one(Action {
            atype: "map_mac2phost".into(),
            hosts: hosts.to_vec(),
            dscps: None,
            fdata: vec![],
            qdata: vec![],
            rid: None,
        })
    }

    pub fn intermed_queues(hosts: &[String], dscps: &str) -> Self {
        Self::one(Action {
            atype: "intermed_queues".into(),
            hosts: hosts.to_vec(),
            dscps: Some(dscps.to_string()),
            fdata: vec![],
            qdata: vec![],
            rid: None,
        })
    }

    pub fn flowmod(fdata: Vec<String>) -> Self {
        Self::one(Action {
            atype: "flowmod".into(),
            hosts: vec![],
            dscps: None,
            fdata,
            qdata: vec![],
            rid: None,
        })
    }

    pub fn setqueues(hosts: &[String], qdata: Vec<String>) -> Self {
        Self::one(Action {
            atype: "setqueues".into(),
            hosts: hosts.to_vec(),
            dscps: None,
            fdata: vec![],
            qdata,
            rid: None,
        })
    }

    pub fn mirrorwiz(host: &str, rid: &str, command: String) -> Self {
        Self::one(Action {
            atype: "mirrorwiz".into(),
            hosts: vec![host.to_string()],
            dscps: None,
            fdata: vec![command],
            qdata: vec![],
            rid: Some(rid.to_string()),
        })
    }
}

/// Inbound agent message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub ctype: String,
    #[serde(default)]
    pub rtype: String,
    #[serde(default)]
    pub rdata: Vec<String>,
    #[serde(default)]
    pub edata: Vec<String>,
    #[serde(default)]
    pub state: i32,
    #[serde(default)]
    pub vinfo: String,
    #[serde(default)]
    pub rid: String,
}

/// A single flow-mod invocation string.
#[derive(Debug, Clone)]
pub struct FlowMod {
    pub host: String,
    pub table: Option<u8>,
    /// Relative hard timeout in seconds.
    pub timeout: i64,
    pub priority: i32,
    /// Match options, each starting with a leading space (` -s ...`).
    pub match_opts: String,
    /// Action options, same convention.
    pub action_opts: String,
    pub verb: &'static str,
    pub cookie: &'static str,
    pub bridge: String,
}

impl FlowMod {
    pub fn render(&self) -> String {
        let table = match self.table {
            Some(t) => format!("-T {t} "),
            None => String::new(),
        };
        format!(
            "-h {} {}-t {} -p {} --match{} --action{} {} {} {}",
            self.host,
            table,
            self.timeout.max(0),
            self.priority,
            self.match_opts,
            self.action_opts,
            self.verb,
            self.cookie,
            self.bridge,
        )
    }
}

/// Incremental extractor of complete top-level JSON objects from a byte
/// stream. Framing is by valid-JSON boundaries: bytes accumulate until the
/// brace depth returns to zero outside a string.
#[derive(Debug, Default)]
pub struct JsonFrameCache {
    buf: Vec<u8>,
}

impl JsonFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull the next complete JSON object out of the buffer, if one has
    /// fully arrived. Leading non-`{` noise (newlines, partial garbage) is
    /// discarded.
    pub fn next_object(&mut self) -> Option<Vec<u8>> {
        let start = match self.buf.iter().position(|&b| b == b'{') {
            Some(s) => s,
            None => {
                self.buf.clear();
                return None;
            }
        };
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in self.buf[start..].iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        let end = start + i + 1;
                        let blob = self.buf[start..end].to_vec();
                        self.buf.drain(..end);
                        return Some(blob);
                    }
                }
                _ => {}
            }
        }
        // keep only from the object start; everything before is noise
        self.buf.drain(..start);
        None
    }
}
