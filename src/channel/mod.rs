use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::protos::common::{Envelope, Status};
use crate::protos::orderer::BroadcastResponse;
use crate::protos::peer::{ProposalResponse, SignedProposal};

mod node;

pub use node::{Connector, Orderer, Peer};

/// Outcome of sending a proposal to one endorser.
#[derive(Debug)]
pub struct TransactionProposalResponse {
    pub endorser: String,
    pub result: Result<ProposalResponse>,
}

pub struct Channel {
    name: String,
    peers: Vec<Arc<dyn Peer>>,
    primary_peer: Option<Arc<dyn Peer>>,
    orderers: Vec<Arc<dyn Orderer>>,
}

impl Channel {
    pub fn new(name: &str) -> Result<Channel> {
        if name.is_empty() {
            return Err(Error::ChannelError(
                "channel name is required".to_string(),
            ));
        }
        Ok(Channel {
            name: name.to_string(),
            peers: vec![],
            primary_peer: None,
            orderers: vec![],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_peer(&mut self, peer: Arc<dyn Peer>) -> Result<()> {
        if self.peers.iter().any(|p| p.url() == peer.url()) {
            return Err(Error::ChannelError(format!(
                "peer with URL {} already exists",
                peer.url()
            )));
        }
        debug!("Channel {}: adding peer {}", self.name, peer.url());
        self.peers.push(peer);
        Ok(())
    }

    pub fn remove_peer(&mut self, url: &str) {
        self.peers.retain(|p| p.url() != url);
        if matches!(&self.primary_peer, Some(primary) if primary.url() == url) {
            self.primary_peer = None;
        }
    }

    pub fn peers(&self) -> &[Arc<dyn Peer>] {
        &self.peers
    }

    pub fn set_primary_peer(&mut self, peer: Arc<dyn Peer>) -> Result<()> {
        if !self.peers.iter().any(|p| p.url() == peer.url()) {
            return Err(Error::ChannelError(format!(
                "primary peer {} must be on this channel peer list",
                peer.url()
            )));
        }
        self.primary_peer = Some(peer);
        Ok(())
    }

    // first peer of the channel unless set explicitly
    pub fn primary_peer(&self) -> Option<Arc<dyn Peer>> {
        self.primary_peer
            .clone()
            .or_else(|| self.peers.first().cloned())
    }

    pub fn add_orderer(&mut self, orderer: Arc<dyn Orderer>) -> Result<()> {
        if self.orderers.iter().any(|o| o.url() == orderer.url()) {
            return Err(Error::ChannelError(format!(
                "orderer with URL {} already exists",
                orderer.url()
            )));
        }
        debug!("Channel {}: adding orderer {}", self.name, orderer.url());
        self.orderers.push(orderer);
        Ok(())
    }

    pub fn orderers(&self) -> &[Arc<dyn Orderer>] {
        &self.orderers
    }

    /// Sends the proposal to every target concurrently.
    ///
    /// There is one entry per target, in target order. A response with a
    /// non-success status is reported as an endorser error.
    pub async fn send_transaction_proposal(
        &self,
        proposal: &SignedProposal,
        targets: &[Arc<dyn Peer>],
    ) -> Result<Vec<TransactionProposalResponse>> {
        if targets.is_empty() {
            return Err(Error::ChannelError(
                "missing peer objects for sending transaction proposal".to_string(),
            ));
        }

        let requests = targets.iter().map(|peer| {
            let peer = peer.clone();
            let proposal = proposal.clone();
            async move {
                let result = peer
                    .process_proposal(proposal)
                    .await
                    .and_then(|response| check_proposal_response(peer.name(), response));
                TransactionProposalResponse {
                    endorser: peer.url().to_string(),
                    result,
                }
            }
        });

        Ok(join_all(requests).await)
    }

    /// Broadcasts to all orderers; the first successful answer wins.
    pub async fn send_transaction(&self, envelope: &Envelope) -> Result<BroadcastResponse> {
        if self.orderers.is_empty() {
            return Err(Error::ChannelError("orderers not set".to_string()));
        }

        let requests = self.orderers.iter().map(|orderer| {
            let envelope = envelope.clone();
            async move { (orderer.url(), orderer.send_broadcast(envelope).await) }
        });

        let mut first_error = None;
        for (url, result) in join_all(requests).await {
            match result {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    let status = Status::try_from(response.status).unwrap_or(Status::Unknown);
                    warn!("Orderer {} rejected transaction: {} {}", url, status, response.info);
                    first_error.get_or_insert(Error::BroadcastError(format!(
                        "orderer {} returned {}: {}",
                        url, status, response.info
                    )));
                }
                Err(err) => {
                    warn!("Failed to broadcast to orderer {}: {}", url, err);
                    first_error.get_or_insert(err);
                }
            }
        }

        Err(first_error
            .unwrap_or_else(|| Error::BroadcastError("no orderer answered".to_string())))
    }
}

fn check_proposal_response(peer: &str, response: ProposalResponse) -> Result<ProposalResponse> {
    let (status, message) = match &response.response {
        Some(r) if r.is_success() => return Ok(response),
        Some(r) => (r.status, r.message.clone()),
        None => (0, "empty response".to_string()),
    };
    Err(Error::EndorserError {
        peer: peer.to_string(),
        status,
        message,
    })
}
