// In-process development network: peers, a solo orderer, an event service
// and one certificate authority per organization. The nodes share one world
// state and are reachable through the same Connector seam a transport would
// implement.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};

use crate::channel::{Connector, Orderer, Peer};
use crate::config::{CaConfig, NetworkConfig, OrdererConfig, PeerConfig, TlsConfig};
use crate::cryptosuite::CryptoSuite;
use crate::error::{Error, Result};
use crate::events::BlockEventSource;
use crate::identity::{self, CertificateAuthority, OrgSpec};
use crate::protos;
use crate::protos::msp::SerializedIdentity;
use crate::protos::peer::{FilteredBlock, FilteredTransaction, TxValidationCode};

mod ca;
mod chaincode;
mod fabcar;
mod ledger;
mod orderer;
mod peer;

pub use chaincode::{Chaincode, ChaincodeStub};
pub use fabcar::FabCar;

use ca::DevCa;
use ledger::WorldState;
use orderer::DevOrderer;
use peer::DevPeer;

const FABCAR: &str = "fabcar";

pub(crate) struct Network {
    channel: String,
    suite: Arc<dyn CryptoSuite>,
    msp_ids: HashSet<String>,
    chaincodes: HashMap<String, Arc<dyn Chaincode>>,
    state: Mutex<WorldState>,
    subscribers: Mutex<Vec<Sender<FilteredBlock>>>,
    events_paused: AtomicBool,
}

impl Network {
    fn lock_state(&self) -> Result<MutexGuard<'_, WorldState>> {
        self.state
            .lock()
            .map_err(|_| Error::ChaincodeError("world state lock poisoned".to_string()))
    }

    fn chaincode(&self, name: &str) -> Result<Arc<dyn Chaincode>> {
        self.chaincodes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ChaincodeError(format!("chaincode {} not found", name)))
    }

    // creator must belong to a known MSP and have signed the message
    fn check_creator(&self, creator: &[u8], signature: &[u8], message: &[u8]) -> Result<()> {
        let identity: SerializedIdentity = protos::decode(creator)?;
        if !self.msp_ids.contains(&identity.mspid) {
            return Err(Error::IdentityError(format!(
                "unknown MSP {}",
                identity.mspid
            )));
        }
        if !self.suite.verify(&identity.id_bytes, signature, message)? {
            return Err(Error::IdentityError(
                "signature verification failed".to_string(),
            ));
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<Receiver<FilteredBlock>> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .lock()
            .map_err(|_| Error::EventHubError("subscriber lock poisoned".to_string()))?
            .push(sender);
        Ok(receiver)
    }

    fn publish(&self, number: u64, tx_id: &str, header_type: i32, code: TxValidationCode) {
        if self.events_paused.load(Ordering::SeqCst) {
            debug!("Events paused, dropping block {}", number);
            return;
        }
        let block = FilteredBlock {
            channel_id: self.channel.clone(),
            number,
            filtered_transactions: vec![FilteredTransaction {
                txid: tx_id.to_string(),
                r#type: header_type,
                tx_validation_code: code as i32,
            }],
        };
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|subscriber| subscriber.send(block.clone()).is_ok());
        }
    }
}

struct DevEventSource(Receiver<FilteredBlock>);

impl BlockEventSource for DevEventSource {
    fn next_block(&mut self, timeout: Duration) -> Result<Option<FilteredBlock>> {
        match self.0.recv_timeout(timeout) {
            Ok(block) => Ok(Some(block)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::EventHubError("event stream closed".to_string()))
            }
        }
    }
}

/// A running development network built from a `NetworkConfig`.
///
/// Every configured peer endorses with its own MSP identity, loaded from the
/// crypto config directory, so the material must exist before starting
/// (see [`org_specs`] and `identity::generate_crypto_material`).
pub struct Devnet {
    network: Arc<Network>,
    peers: HashMap<String, Arc<DevPeer>>,
    event_urls: HashSet<String>,
    orderers: HashMap<String, Arc<DevOrderer>>,
    cas: HashMap<String, Arc<DevCa>>,
}

impl Devnet {
    pub fn start(config: &NetworkConfig, suite: Arc<dyn CryptoSuite>) -> Result<Arc<Devnet>> {
        let mut chaincodes: HashMap<String, Arc<dyn Chaincode>> = HashMap::new();
        chaincodes.insert(FABCAR.to_string(), Arc::new(FabCar));

        let network = Arc::new(Network {
            channel: config.channel.name.clone(),
            suite,
            msp_ids: config
                .organizations
                .values()
                .map(|org| org.msp_id.clone())
                .collect(),
            chaincodes,
            state: Mutex::new(WorldState::new()),
            subscribers: Mutex::new(vec![]),
            events_paused: AtomicBool::new(false),
        });
        init_ledger(&network)?;

        let mut peers = HashMap::new();
        let mut event_urls = HashSet::new();
        let mut cas = HashMap::new();
        let organizations: BTreeMap<_, _> = config.organizations.iter().collect();
        for (name, org) in organizations {
            if let Some(ca_config) = &org.ca {
                let ca = DevCa::new(ca_config.url.clone(), network.suite.clone());
                ca.register(
                    &ca_config.registrar.enroll_id,
                    &ca_config.registrar.enroll_secret,
                )?;
                debug!("Starting CA {} of {}", ca_config.url, name);
                cas.insert(ca_config.url.clone(), Arc::new(ca));
            }

            let org_path = config.org_path(name)?;
            for (i, peer_config) in org.peers.iter().enumerate() {
                let msp_dir = identity::peer_msp_dir(&org_path, i);
                let user = identity::pre_enrolled_user(
                    config,
                    &msp_dir.join("keystore"),
                    &msp_dir.join("signcerts"),
                    &peer_config.host,
                    name,
                )?;
                let url = peer_config.url();
                debug!("Starting peer {} of {}", url, name);
                peers.insert(
                    url.clone(),
                    Arc::new(DevPeer::new(url, user, network.clone())),
                );
                event_urls.insert(peer_config.event_url());
            }
        }

        let orderers = config
            .orderers
            .iter()
            .map(|orderer| {
                let url = orderer.url();
                (url.clone(), Arc::new(DevOrderer::new(url, network.clone())))
            })
            .collect();

        info!(
            "Devnet started on channel {} with {} peers",
            config.channel.name,
            peers.len()
        );
        Ok(Arc::new(Devnet {
            network,
            peers,
            event_urls,
            orderers,
            cas,
        }))
    }

    pub fn height(&self) -> u64 {
        self.network
            .lock_state()
            .map(|state| state.height())
            .unwrap_or_default()
    }

    /// While paused, blocks are still committed but no events are delivered.
    pub fn pause_events(&self, paused: bool) {
        self.network.events_paused.store(paused, Ordering::SeqCst);
    }
}

// genesis block: instantiation (Init) followed by initLedger
fn init_ledger(network: &Network) -> Result<()> {
    let chaincode = network.chaincode(FABCAR)?;
    let mut state = network.lock_state()?;
    let rwset = {
        let mut stub = ChaincodeStub::new(
            &state,
            "",
            vec![b"initLedger".to_vec()],
            BTreeMap::new(),
        );
        let init = chaincode.init(&mut stub);
        if !init.is_success() {
            return Err(Error::ChaincodeError(init.message));
        }
        let response = chaincode.invoke(&mut stub);
        if !response.is_success() {
            return Err(Error::ChaincodeError(response.message));
        }
        stub.into_rwset()
    };
    state.commit("", Some(&[rwset][..]));
    Ok(())
}

impl Connector for Devnet {
    fn peer(&self, config: &PeerConfig) -> Result<Arc<dyn Peer>> {
        let url = config.url();
        match self.peers.get(&url) {
            Some(peer) => Ok(peer.clone()),
            None => Err(Error::ChannelError(format!("no peer listening on {}", url))),
        }
    }

    fn orderer(&self, config: &OrdererConfig) -> Result<Arc<dyn Orderer>> {
        let url = config.url();
        match self.orderers.get(&url) {
            Some(orderer) => Ok(orderer.clone()),
            None => Err(Error::ChannelError(format!(
                "no orderer listening on {}",
                url
            ))),
        }
    }

    fn event_source(&self, address: &str, _tls: &TlsConfig) -> Result<Box<dyn BlockEventSource>> {
        if !self.event_urls.contains(address) {
            return Err(Error::EventHubError(format!(
                "no event service on {}",
                address
            )));
        }
        Ok(Box::new(DevEventSource(self.network.subscribe()?)))
    }

    fn certificate_authority(&self, config: &CaConfig) -> Result<Arc<dyn CertificateAuthority>> {
        match self.cas.get(&config.url) {
            Some(ca) => Ok(ca.clone()),
            None => Err(Error::IdentityError(format!(
                "no certificate authority listening on {}",
                config.url
            ))),
        }
    }
}

/// Organizations to generate crypto material for, one per configured org.
pub fn org_specs(config: &NetworkConfig) -> Result<Vec<OrgSpec>> {
    let mut specs = config
        .organizations
        .iter()
        .map(|(name, org)| Ok(OrgSpec::new(&config.org_path(name)?, org.peers.len())))
        .collect::<Result<Vec<_>>>()?;
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(specs)
}
