// Chaincode query and invoke flows on top of a channel.
//
// invoke: proposal -> endorsements -> register tx event -> broadcast ->
// wait for the commit event, a failure event or the timeout, whichever
// comes first.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use log::{debug, info, warn};
use prost::Message;
use rand::distributions::{Distribution, Uniform};
use rand::RngCore;

use crate::channel::{Channel, Peer, TransactionProposalResponse};
use crate::client::FabricClient;
use crate::cryptosuite::CryptoSuite;
use crate::error::{Error, Result};
use crate::events::{EventHub, TxCallback};
use crate::protos;
use crate::protos::common::{
    ChannelHeader, Envelope, Header, HeaderType, Payload, SignatureHeader,
};
use crate::protos::orderer::BroadcastResponse;
use crate::protos::peer::{
    ChaincodeActionPayload, ChaincodeEndorsedAction, ChaincodeHeaderExtension, ChaincodeId,
    ChaincodeInput, ChaincodeInvocationSpec, ChaincodeProposalPayload, ChaincodeSpec,
    ChaincodeType, Proposal, ProposalResponse, SignedProposal, Transaction, TransactionAction,
};

const NONCE_SIZE: usize = 24;
const RANDOM_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RANDOM_ID_LEN: usize = 10;

pub type TransientMap = BTreeMap<String, Vec<u8>>;

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionId {
    pub id: String,
    pub nonce: Vec<u8>,
}

impl TransactionId {
    // id = hex(hash(nonce || creator))
    pub fn new(creator: &[u8], suite: &dyn CryptoSuite) -> TransactionId {
        let mut nonce = vec![0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mut data = nonce.clone();
        data.extend_from_slice(creator);
        TransactionId {
            id: hex::encode(suite.hash(&data)),
            nonce,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransactionProposal {
    pub tx_id: TransactionId,
    pub proposal: Proposal,
    pub signed_proposal: SignedProposal,
}

pub fn create_transaction_proposal(
    client: &FabricClient,
    channel_name: &str,
    chaincode_id: &str,
    fcn: &str,
    args: &[&str],
    transient: TransientMap,
) -> Result<TransactionProposal> {
    if chaincode_id.is_empty() {
        return Err(Error::ProposalError("chaincode ID is required".to_string()));
    }
    if fcn.is_empty() {
        return Err(Error::ProposalError("function name is required".to_string()));
    }

    let user = client.user_context()?;
    let suite = client.crypto_suite();
    let creator = user.identity();
    let tx_id = TransactionId::new(&creator, suite);

    let chaincode = ChaincodeId {
        name: chaincode_id.to_string(),
        ..Default::default()
    };

    let mut input_args = vec![fcn.as_bytes().to_vec()];
    input_args.extend(args.iter().map(|arg| arg.as_bytes().to_vec()));
    let invocation = ChaincodeInvocationSpec {
        chaincode_spec: Some(ChaincodeSpec {
            r#type: ChaincodeType::Golang as i32,
            chaincode_id: Some(chaincode.clone()),
            input: Some(ChaincodeInput {
                args: input_args,
                ..Default::default()
            }),
            timeout: 0,
        }),
    };

    let channel_header = ChannelHeader {
        r#type: HeaderType::EndorserTransaction as i32,
        version: 1,
        timestamp: Some(protos::now()),
        channel_id: channel_name.to_string(),
        tx_id: tx_id.id.clone(),
        epoch: 0,
        extension: ChaincodeHeaderExtension {
            chaincode_id: Some(chaincode),
        }
        .encode_to_vec(),
        tls_cert_hash: vec![],
    };
    let signature_header = SignatureHeader {
        creator,
        nonce: tx_id.nonce.clone(),
    };
    let header = Header {
        channel_header: channel_header.encode_to_vec(),
        signature_header: signature_header.encode_to_vec(),
    };

    let proposal = Proposal {
        header: header.encode_to_vec(),
        payload: ChaincodeProposalPayload {
            input: invocation.encode_to_vec(),
            transient_map: transient,
        }
        .encode_to_vec(),
        extension: vec![],
    };

    let proposal_bytes = proposal.encode_to_vec();
    let signature = user.sign(suite, &proposal_bytes)?;

    debug!(
        "Created proposal {} for {}:{} on channel {}",
        tx_id.id, chaincode_id, fcn, channel_name
    );
    Ok(TransactionProposal {
        tx_id,
        proposal,
        signed_proposal: SignedProposal {
            proposal_bytes,
            signature,
        },
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn create_and_send_transaction_proposal(
    client: &FabricClient,
    channel: &Channel,
    chaincode_id: &str,
    fcn: &str,
    args: &[&str],
    targets: &[Arc<dyn Peer>],
    transient: TransientMap,
) -> Result<(TransactionProposal, Vec<TransactionProposalResponse>)> {
    let proposal =
        create_transaction_proposal(client, channel.name(), chaincode_id, fcn, args, transient)?;
    let responses = channel
        .send_transaction_proposal(&proposal.signed_proposal, targets)
        .await?;
    Ok((proposal, responses))
}

// fails with the first endorser error
fn collect_endorsements(
    responses: Vec<TransactionProposalResponse>,
) -> Result<Vec<ProposalResponse>> {
    let mut endorsed = Vec::with_capacity(responses.len());
    for response in responses {
        match response.result {
            Ok(proposal_response) => endorsed.push(proposal_response),
            Err(err) => {
                warn!("Endorser {} returned error: {}", response.endorser, err);
                return Err(err);
            }
        }
    }
    Ok(endorsed)
}

/// Assembles the signed transaction envelope out of matching endorsements.
pub fn create_transaction(
    client: &FabricClient,
    proposal: &TransactionProposal,
    responses: &[ProposalResponse],
) -> Result<Envelope> {
    let first = responses.first().ok_or_else(|| {
        Error::ProposalError("at least one proposal response is required".to_string())
    })?;

    let mut endorsements = Vec::with_capacity(responses.len());
    for response in responses {
        if !response.response.as_ref().map_or(false, |r| r.is_success()) {
            return Err(Error::ProposalError(
                "proposal response was not successful".to_string(),
            ));
        }
        if response.payload != first.payload {
            return Err(Error::EndorsementMismatch(format!(
                "proposal response payloads of tx {} differ",
                proposal.tx_id.id
            )));
        }
        let endorsement = response.endorsement.clone().ok_or_else(|| {
            Error::ProposalError("proposal response has no endorsement".to_string())
        })?;
        endorsements.push(endorsement);
    }

    let header: Header = protos::decode(&proposal.proposal.header)?;

    // transient data must not reach the ledger
    let mut proposal_payload: ChaincodeProposalPayload =
        protos::decode(&proposal.proposal.payload)?;
    proposal_payload.transient_map.clear();

    let action_payload = ChaincodeActionPayload {
        chaincode_proposal_payload: proposal_payload.encode_to_vec(),
        action: Some(ChaincodeEndorsedAction {
            proposal_response_payload: first.payload.clone(),
            endorsements,
        }),
    };
    let transaction = Transaction {
        actions: vec![TransactionAction {
            header: header.signature_header.clone(),
            payload: action_payload.encode_to_vec(),
        }],
    };

    let payload = Payload {
        header: Some(header),
        data: transaction.encode_to_vec(),
    }
    .encode_to_vec();

    let user = client.user_context()?;
    let signature = user.sign(client.crypto_suite(), &payload)?;
    Ok(Envelope { payload, signature })
}

pub async fn send_transaction(channel: &Channel, envelope: &Envelope) -> Result<BroadcastResponse> {
    channel.send_transaction(envelope).await
}

/// Queries the chaincode on the primary peer and returns the response payload.
pub async fn query_chaincode(
    client: &FabricClient,
    channel: &Channel,
    chaincode_id: &str,
    fcn: &str,
    args: &[&str],
) -> Result<String> {
    let primary = channel
        .primary_peer()
        .ok_or_else(|| Error::ChannelError("primary peer is not set".to_string()))?;

    let (_, responses) = create_and_send_transaction_proposal(
        client,
        channel,
        chaincode_id,
        fcn,
        args,
        &[primary],
        TransientMap::new(),
    )
    .await?;

    query_result(collect_endorsements(responses)?)
}

// payload of the first response as text
fn query_result(endorsed: Vec<ProposalResponse>) -> Result<String> {
    let payload = endorsed
        .into_iter()
        .next()
        .and_then(|response| response.response)
        .map(|response| response.payload)
        .ok_or_else(|| Error::ProposalError("query returned no response".to_string()))?;

    String::from_utf8(payload)
        .map_err(|err| Error::DecodeError(format!("query result is not UTF-8: {}", err)))
}

/// Invokes the chaincode and waits until the transaction is committed.
///
/// Returns the transaction id. Fails if any endorser fails, if the
/// transaction is committed as invalid, or if no commit event arrives within
/// the configured event timeout.
#[allow(clippy::too_many_arguments)]
pub async fn invoke_chaincode(
    client: &FabricClient,
    channel: &Channel,
    targets: &[Arc<dyn Peer>],
    event_hub: &EventHub,
    chaincode_id: &str,
    fcn: &str,
    args: &[&str],
    transient: TransientMap,
) -> Result<String> {
    if !event_hub.is_connected() {
        event_hub.connect()?;
    }

    let (proposal, responses) = create_and_send_transaction_proposal(
        client,
        channel,
        chaincode_id,
        fcn,
        args,
        targets,
        transient,
    )
    .await?;
    let endorsed = collect_endorsements(responses)?;

    let tx_id = proposal.tx_id.id.clone();
    let (done, fail) = register_tx_event(&tx_id, event_hub)?;

    let outcome = async {
        let envelope = create_transaction(client, &proposal, &endorsed)?;
        send_transaction(channel, &envelope).await?;
        debug!("Transaction {} sent, waiting for commit", tx_id);
        wait_for_commit(&tx_id, done, fail, client.config().event_timeout()).await
    }
    .await;

    // registration goes away on every exit path
    let unregistered = event_hub.unregister_tx_event(&tx_id);
    outcome?;
    unregistered?;

    info!("Transaction {} committed", tx_id);
    Ok(tx_id)
}

fn register_tx_event(
    tx_id: &str,
    event_hub: &EventHub,
) -> Result<(Receiver<()>, Receiver<Error>)> {
    let (callback, done, fail) = commit_listener();
    event_hub.register_tx_event(tx_id, callback)?;
    Ok((done, fail))
}

fn commit_listener() -> (TxCallback, Receiver<()>, Receiver<Error>) {
    let (done_tx, done_rx) = bounded(1);
    let (fail_tx, fail_rx) = bounded(1);

    let callback: TxCallback = Box::new(move |tx_id, code, err| match err {
        Some(err) => {
            debug!("Received error event for txid({}): {}", tx_id, code);
            let _ = fail_tx.send(err);
        }
        None => {
            debug!("Received success event for txid({})", tx_id);
            let _ = done_tx.send(());
        }
    });

    (callback, done_rx, fail_rx)
}

async fn wait_for_commit(
    tx_id: &str,
    done: Receiver<()>,
    fail: Receiver<Error>,
    timeout: Duration,
) -> Result<()> {
    let tx_id = tx_id.to_string();
    tokio::task::spawn_blocking(move || {
        // the hub drops both senders right after the callback ran, so a
        // disconnect on one side may still leave a message on the other
        let settled = || {
            if done.try_recv().is_ok() {
                return Ok(());
            }
            match fail.try_recv() {
                Ok(err) => Err(err),
                Err(_) => Err(Error::EventHubError(format!(
                    "tx event registration for {} was dropped",
                    tx_id
                ))),
            }
        };
        crossbeam_channel::select! {
            recv(done) -> msg => match msg {
                Ok(()) => Ok(()),
                Err(_) => settled(),
            },
            recv(fail) -> msg => match msg {
                Ok(err) => Err(err),
                Err(_) => settled(),
            },
            recv(crossbeam_channel::after(timeout)) -> _ => Err(Error::Timeout {
                tx_id: tx_id.clone(),
                timeout,
            }),
        }
    })
    .await
    .map_err(|err| Error::EventHubError(format!("event wait aborted: {}", err)))?
}

/// Random 10 character id out of `[a-z0-9]`.
pub fn generate_random_id() -> String {
    let between = Uniform::from(0..RANDOM_ID_CHARS.len());
    let mut rng = rand::thread_rng();
    (0..RANDOM_ID_LEN)
        .map(|_| RANDOM_ID_CHARS[between.sample(&mut rng)] as char)
        .collect()
}
