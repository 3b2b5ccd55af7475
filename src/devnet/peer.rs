use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use prost::Message;

use crate::channel::Peer;
use crate::error::{Error, Result};
use crate::identity::User;
use crate::protos;
use crate::protos::common::{ChannelHeader, Header, HeaderType, SignatureHeader};
use crate::protos::kvrwset::{DataModel, NsReadWriteSet, TxReadWriteSet};
use crate::protos::peer::{
    ChaincodeAction, ChaincodeInvocationSpec, ChaincodeProposalPayload, Endorsement, Proposal,
    ProposalResponse, ProposalResponsePayload, Response, SignedProposal, ERROR_THRESHOLD,
};

use super::chaincode::ChaincodeStub;
use super::Network;

/// Endorsing peer of the development network.
pub struct DevPeer {
    url: String,
    identity: User,
    network: Arc<Network>,
}

impl DevPeer {
    pub(crate) fn new(url: String, identity: User, network: Arc<Network>) -> DevPeer {
        DevPeer {
            url,
            identity,
            network,
        }
    }

    fn endorse(&self, signed: &SignedProposal) -> Result<ProposalResponse> {
        let proposal: Proposal = protos::decode(&signed.proposal_bytes)?;
        let header: Header = protos::decode(&proposal.header)?;
        let channel_header: ChannelHeader = protos::decode(&header.channel_header)?;
        let signature_header: SignatureHeader = protos::decode(&header.signature_header)?;

        self.network.check_creator(
            &signature_header.creator,
            &signed.signature,
            &signed.proposal_bytes,
        )?;
        if channel_header.channel_id != self.network.channel {
            return Err(Error::ChannelError(format!(
                "channel {} not found",
                channel_header.channel_id
            )));
        }
        if channel_header.r#type != HeaderType::EndorserTransaction as i32 {
            return Err(Error::ProposalError(format!(
                "invalid header type {}",
                channel_header.r#type
            )));
        }
        let mut expected = signature_header.nonce.clone();
        expected.extend_from_slice(&signature_header.creator);
        if hex::encode(self.network.suite.hash(&expected)) != channel_header.tx_id {
            return Err(Error::ProposalError(format!(
                "invalid txid {}",
                channel_header.tx_id
            )));
        }

        let payload: ChaincodeProposalPayload = protos::decode(&proposal.payload)?;
        let invocation: ChaincodeInvocationSpec = protos::decode(&payload.input)?;
        let spec = invocation
            .chaincode_spec
            .ok_or_else(|| Error::ProposalError("missing chaincode spec".to_string()))?;
        let chaincode_id = spec
            .chaincode_id
            .ok_or_else(|| Error::ProposalError("missing chaincode id".to_string()))?;
        let chaincode = self.network.chaincode(&chaincode_id.name)?;
        let args = spec.input.map(|input| input.args).unwrap_or_default();

        let (response, rwset) = {
            let state = self.network.lock_state()?;
            let mut stub =
                ChaincodeStub::new(&state, &channel_header.tx_id, args, payload.transient_map);
            let response = chaincode.invoke(&mut stub);
            (response, stub.into_rwset())
        };

        if response.status >= ERROR_THRESHOLD {
            debug!(
                "Chaincode {} failed for tx {}: {}",
                chaincode_id.name, channel_header.tx_id, response.message
            );
            return Ok(ProposalResponse {
                version: 1,
                timestamp: Some(protos::now()),
                response: Some(response),
                ..Default::default()
            });
        }

        let results = TxReadWriteSet {
            data_model: DataModel::Kv as i32,
            ns_rwset: vec![NsReadWriteSet {
                namespace: chaincode_id.name.clone(),
                rwset: rwset.encode_to_vec(),
            }],
        };
        let action = ChaincodeAction {
            results: results.encode_to_vec(),
            events: vec![],
            response: Some(response.clone()),
            chaincode_id: Some(chaincode_id),
        };

        let mut proposal_hash_input = proposal.header.clone();
        proposal_hash_input.extend_from_slice(&proposal.payload);
        let prp = ProposalResponsePayload {
            proposal_hash: self.network.suite.hash(&proposal_hash_input),
            extension: action.encode_to_vec(),
        }
        .encode_to_vec();

        let endorser = self.identity.identity();
        let mut signed_bytes = prp.clone();
        signed_bytes.extend_from_slice(&endorser);
        let signature = self.identity.sign(self.network.suite.as_ref(), &signed_bytes)?;

        debug!(
            "Peer {} endorsed tx {}",
            self.url, channel_header.tx_id
        );
        Ok(ProposalResponse {
            version: 1,
            timestamp: Some(protos::now()),
            response: Some(response),
            payload: prp,
            endorsement: Some(Endorsement {
                endorser,
                signature,
            }),
        })
    }
}

#[async_trait]
impl Peer for DevPeer {
    fn url(&self) -> &str {
        &self.url
    }

    // rejected proposals come back as error responses, like a real endorser
    async fn process_proposal(&self, proposal: SignedProposal) -> Result<ProposalResponse> {
        match self.endorse(&proposal) {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!("Peer {} rejected proposal: {}", self.url, err);
                Ok(ProposalResponse {
                    version: 1,
                    timestamp: Some(protos::now()),
                    response: Some(Response::error(err.to_string())),
                    ..Default::default()
                })
            }
        }
    }
}
