// Subset of the Fabric wire format used by the client.
// Field numbers follow hyperledger/fabric-protos so the bytes stay compatible.

pub mod common;
pub mod kvrwset;
pub mod msp;
pub mod orderer;
pub mod peer;

use prost::Message;

use crate::error::Result;

pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    Ok(M::decode(bytes)?)
}

pub fn now() -> prost_types::Timestamp {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    prost_types::Timestamp {
        seconds: elapsed.as_secs() as i64,
        nanos: elapsed.subsec_nanos() as i32,
    }
}
