use std::collections::BTreeMap;

use crate::protos::kvrwset::{KvRead, KvRwSet, KvWrite, Version};
use crate::protos::peer::Response;

use super::ledger::WorldState;

pub trait Chaincode: Send + Sync {
    fn init(&self, _stub: &mut ChaincodeStub) -> Response {
        Response::success(vec![])
    }

    fn invoke(&self, stub: &mut ChaincodeStub) -> Response;
}

/// Simulation context handed to a chaincode.
///
/// Reads go to the committed state and are recorded with their version;
/// writes are buffered into the read/write set and not visible to later reads
/// of the same simulation.
pub struct ChaincodeStub<'a> {
    state: &'a WorldState,
    tx_id: String,
    args: Vec<Vec<u8>>,
    transient: BTreeMap<String, Vec<u8>>,
    reads: BTreeMap<String, Option<Version>>,
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl<'a> ChaincodeStub<'a> {
    pub fn new(
        state: &'a WorldState,
        tx_id: &str,
        args: Vec<Vec<u8>>,
        transient: BTreeMap<String, Vec<u8>>,
    ) -> ChaincodeStub<'a> {
        ChaincodeStub {
            state,
            tx_id: tx_id.to_string(),
            args,
            transient,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    // first argument is the function name
    pub fn function_and_parameters(&self) -> (String, Vec<String>) {
        let mut args = self
            .args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned());
        let function = args.next().unwrap_or_default();
        (function, args.collect())
    }

    pub fn transient(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.transient
    }

    pub fn get_state(&mut self, key: &str) -> Option<Vec<u8>> {
        let current = self.state.get(key);
        self.reads
            .insert(key.to_string(), current.map(|(_, version)| version));
        current.map(|(value, _)| value.to_vec())
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), String> {
        if key.is_empty() {
            return Err("key must not be an empty string".to_string());
        }
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    pub fn del_state(&mut self, key: &str) -> Result<(), String> {
        if key.is_empty() {
            return Err("key must not be an empty string".to_string());
        }
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    pub fn get_state_by_range(&mut self, start: &str, end: &str) -> Vec<(String, Vec<u8>)> {
        self.state
            .range(start, end)
            .into_iter()
            .map(|(key, value, version)| {
                self.reads.insert(key.clone(), Some(version));
                (key, value)
            })
            .collect()
    }

    pub fn into_rwset(self) -> KvRwSet {
        KvRwSet {
            reads: self
                .reads
                .into_iter()
                .map(|(key, version)| KvRead { key, version })
                .collect(),
            writes: self
                .writes
                .into_iter()
                .map(|(key, value)| KvWrite {
                    key,
                    is_delete: value.is_none(),
                    value: value.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rwset_records_reads_and_writes() {
        let mut state = WorldState::new();
        let genesis = KvRwSet {
            reads: vec![],
            writes: vec![KvWrite {
                key: "CAR0".to_string(),
                is_delete: false,
                value: b"old".to_vec(),
            }],
        };
        state.commit("genesis", Some(&[genesis][..]));

        let mut stub = ChaincodeStub::new(
            &state,
            "tx1",
            vec![b"changeCarOwner".to_vec(), b"CAR0".to_vec()],
            BTreeMap::new(),
        );
        assert_eq!(
            stub.function_and_parameters(),
            ("changeCarOwner".to_string(), vec!["CAR0".to_string()])
        );

        assert_eq!(stub.get_state("CAR0"), Some(b"old".to_vec()));
        assert_eq!(stub.get_state("CAR1"), None);
        stub.put_state("CAR0", b"new".to_vec()).unwrap();
        // own writes are not visible
        assert_eq!(stub.get_state("CAR0"), Some(b"old".to_vec()));
        assert!(stub.put_state("", vec![]).is_err());

        let rwset = stub.into_rwset();
        assert_eq!(rwset.reads.len(), 2);
        assert_eq!(rwset.reads[0].version.unwrap().block_num, 0);
        assert!(rwset.reads[1].version.is_none());
        assert_eq!(rwset.writes.len(), 1);
        assert_eq!(rwset.writes[0].value, b"new".to_vec());
    }

    #[test]
    fn delete_is_a_write() {
        let state = WorldState::new();
        let mut transient = BTreeMap::new();
        transient.insert("result".to_string(), b"private".to_vec());
        let mut stub = ChaincodeStub::new(&state, "tx1", vec![], transient);

        assert_eq!(stub.function_and_parameters(), (String::new(), vec![]));
        assert_eq!(stub.transient()["result"], b"private".to_vec());
        stub.del_state("CAR0").unwrap();

        let rwset = stub.into_rwset();
        assert!(rwset.reads.is_empty());
        assert!(rwset.writes[0].is_delete);
    }
}
