use crate::TopologyError;
use ring::Token;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The persisted per-node system record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRecord {
    pub cluster_name: String,
    pub bootstrap_token: Option<Token>,
    pub bootstrapped: bool,
    pub generation: u64,
}

impl SystemRecord {
    /// Load the record (or start a fresh one), bump the gossip generation,
    /// and persist. A cluster-name mismatch means this data directory
    /// belongs to some other cluster, which is not survivable.
    pub fn initialize(path: &Path, cluster_name: &str) -> Result<SystemRecord, TopologyError> {
        let mut record = if path.exists() {
            let raw = std::fs::read(path)?;
            let record: SystemRecord = serde_json::from_slice(&raw)?;
            if record.cluster_name != cluster_name {
                return Err(TopologyError::Fatal(format!(
                    "data directory belongs to cluster {:?}, configured cluster is {:?}",
                    record.cluster_name, cluster_name
                )));
            }
            record
        } else {
            SystemRecord {
                cluster_name: cluster_name.to_string(),
                bootstrap_token: None,
                bootstrapped: false,
                generation: 0,
            }
        };
        record.generation += 1;
        record.save(path)?;
        Ok(record)
    }

    pub fn save(&self, path: &Path) -> Result<(), TopologyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_increments_per_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.json");

        let first = SystemRecord::initialize(&path, "meridian-test").unwrap();
        assert_eq!(first.generation, 1);
        assert!(!first.bootstrapped);

        let second = SystemRecord::initialize(&path, "meridian-test").unwrap();
        assert_eq!(second.generation, 2);
    }

    #[test]
    fn bootstrap_state_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.json");

        let mut record = SystemRecord::initialize(&path, "meridian-test").unwrap();
        record.bootstrap_token = Some(Token::from("a3t1"));
        record.bootstrapped = true;
        record.save(&path).unwrap();

        let reloaded = SystemRecord::initialize(&path, "meridian-test").unwrap();
        assert_eq!(reloaded.bootstrap_token, Some(Token::from("a3t1")));
        assert!(reloaded.bootstrapped);
    }

    #[test]
    fn cluster_name_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.json");
        SystemRecord::initialize(&path, "meridian-test").unwrap();

        assert!(matches!(
            SystemRecord::initialize(&path, "some-other-cluster"),
            Err(TopologyError::Fatal(_))
        ));
    }
}
