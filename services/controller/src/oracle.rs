//! Fabric discovery seam.
//!
//! OpenStack and controller discovery are external collaborators; the
//! network manager only needs something that can produce a topology
//! snapshot on demand. Production wires a file-backed oracle (maintained by
//! the deployment tooling); tests inject a static one.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tegu_netgraph::TopoSnapshot;

#[async_trait]
pub trait FabricOracle: Send + Sync {
    async fn snapshot(&mut self) -> Result<TopoSnapshot>;
}

/// Reads a `TopoSnapshot` JSON document from disk on every refresh.
pub struct FileOracle {
    path: PathBuf,
}

impl FileOracle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FabricOracle for FileOracle {
    async fn snapshot(&mut self) -> Result<TopoSnapshot> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading topology file {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing topology file {}", self.path.display()))
    }
}

/// A fixed snapshot, for tests and for running without discovery.
pub struct StaticOracle(pub TopoSnapshot);

#[async_trait]
impl FabricOracle for StaticOracle {
    async fn snapshot(&mut self) -> Result<TopoSnapshot> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn file_oracle_parses_snapshot() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"links":[{{"sw1":"swA","port1":1,"sw2":"swB","port2":2}}],
                "hosts":[{{"name":"vm1","ip4":"10.0.0.1"}}]}}"#
        )
        .unwrap();

        let mut oracle = FileOracle::new(f.path());
        let snap = oracle.snapshot().await.unwrap();
        assert_eq!(snap.links.len(), 1);
        assert_eq!(snap.hosts[0].name, "vm1");
    }

    #[tokio::test]
    async fn file_oracle_surfaces_missing_file() {
        let mut oracle = FileOracle::new("/nonexistent/topo.json");
        assert!(oracle.snapshot().await.is_err());
    }
}
