use std::collections::{BTreeMap, HashSet};

use crate::protos::kvrwset::{KvRwSet, Version};

#[derive(Clone, Debug)]
struct VersionedValue {
    value: Vec<u8>,
    version: Version,
}

/// Committed world state of the development network.
#[derive(Debug, Default)]
pub struct WorldState {
    entries: BTreeMap<String, VersionedValue>,
    height: u64,
    tx_ids: HashSet<String>,
}

impl WorldState {
    pub fn new() -> WorldState {
        WorldState::default()
    }

    pub fn get(&self, key: &str) -> Option<(&[u8], Version)> {
        self.entries
            .get(key)
            .map(|entry| (entry.value.as_slice(), entry.version))
    }

    // keys in [start, end), sorted
    pub fn range(&self, start: &str, end: &str) -> Vec<(String, Vec<u8>, Version)> {
        if start >= end {
            return vec![];
        }
        self.entries
            .range(start.to_string()..end.to_string())
            .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.version))
            .collect()
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn has_tx(&self, tx_id: &str) -> bool {
        self.tx_ids.contains(tx_id)
    }

    /// A read is stale when the key changed after it was simulated.
    pub fn is_stale(&self, rwset: &KvRwSet) -> bool {
        rwset.reads.iter().any(|read| {
            let current = self.entries.get(&read.key).map(|entry| entry.version);
            current != read.version
        })
    }

    /// Appends a block holding one transaction. Writes are applied only for
    /// valid transactions, the id is recorded either way.
    pub fn commit(&mut self, tx_id: &str, writes: Option<&[KvRwSet]>) -> u64 {
        let block_num = self.height;
        if let Some(rwsets) = writes {
            let version = Version {
                block_num,
                tx_num: 0,
            };
            for rwset in rwsets {
                for write in &rwset.writes {
                    if write.is_delete {
                        self.entries.remove(&write.key);
                    } else {
                        self.entries.insert(
                            write.key.clone(),
                            VersionedValue {
                                value: write.value.clone(),
                                version,
                            },
                        );
                    }
                }
            }
        }
        if !tx_id.is_empty() {
            self.tx_ids.insert(tx_id.to_string());
        }
        self.height += 1;
        block_num
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protos::kvrwset::{KvRead, KvWrite};

    fn write(key: &str, value: &str) -> KvWrite {
        KvWrite {
            key: key.to_string(),
            is_delete: false,
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn commit_bumps_versions() {
        let mut state = WorldState::new();
        let rwset = KvRwSet {
            reads: vec![],
            writes: vec![write("CAR0", "a"), write("CAR1", "b")],
        };
        assert_eq!(state.commit("tx0", Some(&[rwset][..])), 0);
        assert_eq!(state.height(), 1);
        assert!(state.has_tx("tx0"));

        let (value, version) = state.get("CAR0").unwrap();
        assert_eq!(value, b"a");
        assert_eq!(version.block_num, 0);

        let stale = KvRwSet {
            reads: vec![KvRead {
                key: "CAR0".to_string(),
                version: None,
            }],
            writes: vec![],
        };
        assert!(state.is_stale(&stale));

        let fresh = KvRwSet {
            reads: vec![KvRead {
                key: "CAR0".to_string(),
                version: Some(version),
            }],
            writes: vec![],
        };
        assert!(!state.is_stale(&fresh));
    }

    #[test]
    fn invalid_tx_leaves_state_untouched() {
        let mut state = WorldState::new();
        state.commit("tx0", None);
        assert!(state.get("CAR0").is_none());
        assert!(state.has_tx("tx0"));
        assert_eq!(state.height(), 1);
    }

    #[test]
    fn range_is_half_open() {
        let mut state = WorldState::new();
        let rwset = KvRwSet {
            reads: vec![],
            writes: vec![write("CAR0", "a"), write("CAR10", "b"), write("CAR999", "c")],
        };
        state.commit("tx0", Some(&[rwset][..]));

        let keys: Vec<String> = state
            .range("CAR0", "CAR999")
            .into_iter()
            .map(|(key, _, _)| key)
            .collect();
        assert_eq!(keys, vec!["CAR0".to_string(), "CAR10".to_string()]);
        assert!(state.range("CAR9", "CAR0").is_empty());
    }
}
