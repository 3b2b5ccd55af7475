use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::channel::Orderer;
use crate::error::Result;
use crate::protos;
use crate::protos::common::{ChannelHeader, Envelope, HeaderType, Payload, SignatureHeader, Status};
use crate::protos::kvrwset::{KvRwSet, TxReadWriteSet};
use crate::protos::orderer::BroadcastResponse;
use crate::protos::peer::{
    ChaincodeAction, ChaincodeActionPayload, ProposalResponsePayload, Transaction,
    TxValidationCode,
};

use super::Network;

/// Solo orderer of the development network: one block per envelope,
/// validated and committed right away.
pub struct DevOrderer {
    url: String,
    network: Arc<Network>,
}

impl DevOrderer {
    pub(crate) fn new(url: String, network: Arc<Network>) -> DevOrderer {
        DevOrderer { url, network }
    }

    fn order(&self, envelope: &Envelope) -> Result<BroadcastResponse> {
        let payload: Payload = match protos::decode(&envelope.payload) {
            Ok(payload) => payload,
            Err(err) => return Ok(reject(Status::BadRequest, err.to_string())),
        };
        let header = match &payload.header {
            Some(header) => header,
            None => return Ok(reject(Status::BadRequest, "missing header".to_string())),
        };
        let channel_header: ChannelHeader = match protos::decode(&header.channel_header) {
            Ok(channel_header) => channel_header,
            Err(err) => return Ok(reject(Status::BadRequest, err.to_string())),
        };
        if channel_header.channel_id != self.network.channel {
            return Ok(reject(
                Status::NotFound,
                format!("channel {} not found", channel_header.channel_id),
            ));
        }

        let tx_id = channel_header.tx_id.clone();
        let checked = self.check_transaction(envelope, &payload, &channel_header);

        let mut state = self.network.lock_state()?;
        let outcome = checked.and_then(|rwsets| {
            if state.has_tx(&tx_id) {
                Err(TxValidationCode::DuplicateTxid)
            } else if rwsets.iter().any(|rwset| state.is_stale(rwset)) {
                Err(TxValidationCode::MvccReadConflict)
            } else {
                Ok(rwsets)
            }
        });

        let (code, block_num) = match outcome {
            Ok(rwsets) => (
                TxValidationCode::Valid,
                state.commit(&tx_id, Some(rwsets.as_slice())),
            ),
            Err(code) => (code, state.commit(&tx_id, None)),
        };
        info!("Committed block {} with tx {} ({})", block_num, tx_id, code);
        self.network.publish(block_num, &tx_id, channel_header.r#type, code);

        Ok(BroadcastResponse {
            status: Status::Success as i32,
            info: String::new(),
        })
    }

    // the read/write sets of a transaction that passes every check but MVCC
    fn check_transaction(
        &self,
        envelope: &Envelope,
        payload: &Payload,
        channel_header: &ChannelHeader,
    ) -> std::result::Result<Vec<KvRwSet>, TxValidationCode> {
        let header = payload
            .header
            .as_ref()
            .ok_or(TxValidationCode::BadCommonHeader)?;
        let signature_header: SignatureHeader = protos::decode(&header.signature_header)
            .map_err(|_| TxValidationCode::BadCommonHeader)?;
        if self
            .network
            .check_creator(
                &signature_header.creator,
                &envelope.signature,
                &envelope.payload,
            )
            .is_err()
        {
            return Err(TxValidationCode::BadCreatorSignature);
        }
        if channel_header.tx_id.is_empty() {
            return Err(TxValidationCode::BadProposalTxid);
        }
        if channel_header.r#type != HeaderType::EndorserTransaction as i32 {
            return Err(TxValidationCode::UnknownTxType);
        }

        let transaction: Transaction =
            protos::decode(&payload.data).map_err(|_| TxValidationCode::BadPayload)?;
        if transaction.actions.is_empty() {
            return Err(TxValidationCode::NilTxaction);
        }

        let mut rwsets: Vec<KvRwSet> = vec![];
        for action in &transaction.actions {
            let action_payload: ChaincodeActionPayload =
                protos::decode(&action.payload).map_err(|_| TxValidationCode::BadPayload)?;
            let endorsed = action_payload
                .action
                .ok_or(TxValidationCode::NilTxaction)?;
            if endorsed.endorsements.is_empty() {
                return Err(TxValidationCode::EndorsementPolicyFailure);
            }
            for endorsement in &endorsed.endorsements {
                let mut signed = endorsed.proposal_response_payload.clone();
                signed.extend_from_slice(&endorsement.endorser);
                if self
                    .network
                    .check_creator(&endorsement.endorser, &endorsement.signature, &signed)
                    .is_err()
                {
                    debug!("Endorsement signature check failed for tx {}", channel_header.tx_id);
                    return Err(TxValidationCode::EndorsementPolicyFailure);
                }
            }

            let prp: ProposalResponsePayload = protos::decode(&endorsed.proposal_response_payload)
                .map_err(|_| TxValidationCode::BadResponsePayload)?;
            let chaincode_action: ChaincodeAction =
                protos::decode(&prp.extension).map_err(|_| TxValidationCode::BadResponsePayload)?;
            let results: TxReadWriteSet =
                protos::decode(&chaincode_action.results).map_err(|_| TxValidationCode::BadRwset)?;
            for ns in &results.ns_rwset {
                rwsets.push(protos::decode(&ns.rwset).map_err(|_| TxValidationCode::BadRwset)?);
            }
        }
        Ok(rwsets)
    }
}

fn reject(status: Status, info: String) -> BroadcastResponse {
    debug!("Orderer rejected envelope: {} {}", status, info);
    BroadcastResponse {
        status: status as i32,
        info,
    }
}

#[async_trait]
impl Orderer for DevOrderer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn send_broadcast(&self, envelope: Envelope) -> Result<BroadcastResponse> {
        self.order(&envelope)
    }
}
