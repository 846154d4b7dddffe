//! Checkpoint files for the reservation inventory.
//!
//! Each checkpoint is a line-delimited file of self-describing pledge
//! records, written atomically (temp + rename) under a monotonically
//! increasing suffix. The newest `keep` files are retained; anything older
//! than `max_age_days` is dropped regardless.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

const FILE_STEM: &str = "resmgr.ckpt";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct CheckpointStore {
    dir: PathBuf,
    keep: usize,
    max_age_days: i64,
    next_seq: u64,
}

impl CheckpointStore {
    pub fn open(dir: impl Into<PathBuf>, keep: usize, max_age_days: i64) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let next_seq = existing_seqs(&dir).last().map(|(s, _)| s + 1).unwrap_or(1);
        Ok(Self {
            dir,
            keep,
            max_age_days,
            next_seq,
        })
    }

    /// Write one checkpoint file from the given record lines.
    pub fn write<I>(&mut self, lines: I) -> Result<PathBuf, StoreError>
    where
        I: IntoIterator<Item = String>,
    {
        let seq = self.next_seq;
        let final_path = self.dir.join(format!("{FILE_STEM}.{seq}"));
        let tmp_path = self.dir.join(format!("{FILE_STEM}.{seq}.tmp"));

        let mut count = 0usize;
        {
            let mut f = fs::File::create(&tmp_path)?;
            for line in lines {
                writeln!(f, "{line}")?;
                count += 1;
            }
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        self.next_seq += 1;

        info!(path = %final_path.display(), records = count, "checkpoint written");
        self.prune();
        Ok(final_path)
    }

    /// The most recent checkpoint on disk, if any.
    pub fn latest(&self) -> Option<PathBuf> {
        existing_seqs(&self.dir).last().map(|(_, p)| p.clone())
    }

    fn prune(&self) {
        let seqs = existing_seqs(&self.dir);
        let excess = seqs.len().saturating_sub(self.keep);
        for (_, path) in seqs.iter().take(excess) {
            debug!(path = %path.display(), "pruning old checkpoint");
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "unable to prune checkpoint");
            }
        }

        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(self.max_age_days as u64 * 86_400);
        for (_, path) in existing_seqs(&self.dir) {
            let too_old = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(|t| t < cutoff)
                .unwrap_or(false);
            if too_old {
                debug!(path = %path.display(), "dropping aged checkpoint");
                let _ = fs::remove_file(&path);
            }
        }
    }
}

/// Read the record lines of a checkpoint file.
pub fn read_lines(path: &Path) -> Result<Vec<String>, StoreError> {
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect())
}

fn existing_seqs(dir: &Path) -> Vec<(u64, PathBuf)> {
    let mut out = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(&format!("{FILE_STEM}.")) else {
            continue;
        };
        if let Ok(seq) = suffix.parse::<u64>() {
            out.push((seq, entry.path()));
        }
    }
    out.sort();
    out
}
