pub mod channel;
pub mod client;
pub mod config;
pub mod cryptosuite;
pub mod devnet;
pub mod error;
pub mod events;
pub mod fabcar;
pub mod identity;
pub mod protos;
pub mod txn;

pub use error::{Error, Result};
