use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CaConfig, OrdererConfig, PeerConfig, TlsConfig};
use crate::error::{Error, Result};
use crate::events::BlockEventSource;
use crate::identity::CertificateAuthority;
use crate::protos::common::Envelope;
use crate::protos::orderer::BroadcastResponse;
use crate::protos::peer::{ProposalResponse, SignedProposal};

/// An endorsing peer: simulates a signed proposal and returns its endorsement.
#[async_trait]
pub trait Peer: Send + Sync {
    fn url(&self) -> &str;

    fn name(&self) -> &str {
        self.url()
    }

    async fn process_proposal(&self, proposal: SignedProposal) -> Result<ProposalResponse>;
}

/// An ordering service node accepting endorsed transactions.
#[async_trait]
pub trait Orderer: Send + Sync {
    fn url(&self) -> &str;

    async fn send_broadcast(&self, envelope: Envelope) -> Result<BroadcastResponse>;
}

/// Builds network nodes out of configuration entries.
///
/// This is where a transport plugs in; the client only talks to the
/// returned trait objects.
pub trait Connector: Send + Sync {
    fn peer(&self, config: &PeerConfig) -> Result<Arc<dyn Peer>>;

    fn orderer(&self, config: &OrdererConfig) -> Result<Arc<dyn Orderer>>;

    fn event_source(&self, address: &str, tls: &TlsConfig) -> Result<Box<dyn BlockEventSource>>;

    fn certificate_authority(&self, config: &CaConfig) -> Result<Arc<dyn CertificateAuthority>> {
        Err(Error::IdentityError(format!(
            "no certificate authority reachable at {}",
            config.url
        )))
    }
}
