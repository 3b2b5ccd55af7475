// Event hub: listens for filtered blocks of one peer and hands transaction
// outcomes to whoever registered for them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::channel::Connector;
use crate::config::TlsConfig;
use crate::error::{Error, Result};
use crate::protos::peer::{FilteredBlock, TxValidationCode};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Stream of committed blocks delivered by a peer.
pub trait BlockEventSource: Send {
    /// Waits up to `timeout` for the next block, `Ok(None)` if none arrived.
    fn next_block(&mut self, timeout: Duration) -> Result<Option<FilteredBlock>>;
}

// called once with the tx id, its validation code and an error for invalid txs
pub type TxCallback = Box<dyn FnOnce(String, TxValidationCode, Option<Error>) + Send>;
pub type BlockCallback = Arc<dyn Fn(&FilteredBlock) + Send + Sync>;

#[derive(Default)]
struct Registrants {
    tx: Mutex<HashMap<String, TxCallback>>,
    blocks: Mutex<Vec<BlockCallback>>,
}

struct Listener {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct EventHub {
    connector: Arc<dyn Connector>,
    peer_addr: Option<String>,
    tls: TlsConfig,
    workers: usize,
    registrants: Arc<Registrants>,
    connected: Arc<AtomicBool>,
    listener: Mutex<Option<Listener>>,
}

impl EventHub {
    pub fn new(connector: Arc<dyn Connector>, workers: usize) -> EventHub {
        EventHub {
            connector,
            peer_addr: None,
            tls: TlsConfig::default(),
            workers: workers.max(1),
            registrants: Arc::new(Registrants::default()),
            connected: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        }
    }

    pub fn set_peer_addr(
        &mut self,
        peer_addr: &str,
        certificate: Option<std::path::PathBuf>,
        server_host_override: Option<String>,
    ) {
        self.peer_addr = Some(peer_addr.to_string());
        self.tls = TlsConfig {
            certificate,
            server_host_override,
        };
    }

    pub fn peer_addr(&self) -> Option<&str> {
        self.peer_addr.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect(&self) -> Result<()> {
        let peer_addr = self.peer_addr.as_deref().ok_or_else(|| {
            Error::EventHubError("peer address must be set before connecting".to_string())
        })?;

        let mut listener = self.lock_listener()?;
        if self.is_connected() {
            return Ok(());
        }
        // a previous listener may have died on a source error
        if let Some(old) = listener.take() {
            old.stop.store(true, Ordering::SeqCst);
            let _ = old.handle.join();
        }

        let source = self.connector.event_source(peer_addr, &self.tls)?;
        let stop = Arc::new(AtomicBool::new(false));
        self.connected.store(true, Ordering::SeqCst);

        let handle = {
            let stop = stop.clone();
            let registrants = self.registrants.clone();
            let connected = self.connected.clone();
            let pool = threadpool::ThreadPool::new(self.workers);
            let peer_addr = peer_addr.to_string();
            std::thread::Builder::new()
                .name(format!("event-hub-{}", peer_addr))
                .spawn(move || {
                    listen_loop(source, &registrants, &pool, &stop);
                    connected.store(false, Ordering::SeqCst);
                    pool.join();
                    log::debug!("Event hub listener for {} stopped", peer_addr);
                })
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };

        log::info!("Event hub connected to {}", peer_addr);
        *listener = Some(Listener { stop, handle });
        Ok(())
    }

    pub fn disconnect(&self) {
        let listener = match self.lock_listener() {
            Ok(mut listener) => listener.take(),
            Err(_) => None,
        };
        if let Some(listener) = listener {
            listener.stop.store(true, Ordering::SeqCst);
            if listener.handle.join().is_err() {
                log::error!("Event hub listener panicked");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Registers a one-shot callback for the commit of `tx_id`; a later
    /// registration for the same id replaces the earlier one.
    pub fn register_tx_event(&self, tx_id: &str, callback: TxCallback) -> Result<()> {
        log::debug!("Registering for tx event {}", tx_id);
        self.lock_tx()?.insert(tx_id.to_string(), callback);
        Ok(())
    }

    pub fn unregister_tx_event(&self, tx_id: &str) -> Result<()> {
        if self.lock_tx()?.remove(tx_id).is_some() {
            log::debug!("Unregistered tx event {}", tx_id);
        }
        Ok(())
    }

    pub fn register_block_event(&self, callback: BlockCallback) -> Result<()> {
        self.registrants
            .blocks
            .lock()
            .map_err(|_| Error::EventHubError("block registrations lock poisoned".to_string()))?
            .push(callback);
        Ok(())
    }

    /// Number of transactions still waiting for their commit event.
    pub fn pending_tx_events(&self) -> Result<usize> {
        Ok(self.lock_tx()?.len())
    }

    fn lock_tx(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, TxCallback>>> {
        self.registrants
            .tx
            .lock()
            .map_err(|_| Error::EventHubError("tx registrations lock poisoned".to_string()))
    }

    fn lock_listener(&self) -> Result<std::sync::MutexGuard<'_, Option<Listener>>> {
        self.listener
            .lock()
            .map_err(|_| Error::EventHubError("listener lock poisoned".to_string()))
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn listen_loop(
    mut source: Box<dyn BlockEventSource>,
    registrants: &Registrants,
    pool: &threadpool::ThreadPool,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::SeqCst) {
        match source.next_block(POLL_INTERVAL) {
            Ok(Some(block)) => dispatch_block(registrants, pool, block),
            Ok(None) => (),
            Err(err) => {
                log::error!("Failed to receive, stopping the loop: {}", err);
                break;
            }
        }
    }
}

fn dispatch_block(registrants: &Registrants, pool: &threadpool::ThreadPool, block: FilteredBlock) {
    log::debug!(
        "Received block {} of channel {} with {} transactions",
        block.number,
        block.channel_id,
        block.filtered_transactions.len()
    );

    if let Ok(blocks) = registrants.blocks.lock() {
        let block = Arc::new(block.clone());
        for handler in blocks.iter() {
            let handler = handler.clone();
            let block = block.clone();
            pool.execute(move || handler(&block));
        }
    }

    for filtered_tx in &block.filtered_transactions {
        let callback = match registrants.tx.lock() {
            Ok(mut tx) => tx.remove(&filtered_tx.txid),
            Err(_) => None,
        };
        let callback = match callback {
            Some(callback) => callback,
            None => continue,
        };

        let tx_id = filtered_tx.txid.clone();
        let code = filtered_tx.validation_code();
        let err = if code == TxValidationCode::Valid {
            None
        } else {
            Some(Error::TransactionInvalid {
                tx_id: tx_id.clone(),
                code,
            })
        };
        pool.execute(move || callback(tx_id, code, err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Orderer, Peer};
    use crate::config::{OrdererConfig, PeerConfig};
    use crate::protos::peer::FilteredTransaction;
    use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

    struct ChannelSource(Receiver<FilteredBlock>);

    impl BlockEventSource for ChannelSource {
        fn next_block(&mut self, timeout: Duration) -> Result<Option<FilteredBlock>> {
            match self.0.recv_timeout(timeout) {
                Ok(block) => Ok(Some(block)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(Error::EventHubError("stream closed".to_string()))
                }
            }
        }
    }

    struct SourceConnector {
        source: Mutex<Option<Receiver<FilteredBlock>>>,
    }

    impl Connector for SourceConnector {
        fn peer(&self, _: &PeerConfig) -> Result<Arc<dyn Peer>> {
            Err(Error::ConfigError("no peers".to_string()))
        }

        fn orderer(&self, _: &OrdererConfig) -> Result<Arc<dyn Orderer>> {
            Err(Error::ConfigError("no orderers".to_string()))
        }

        fn event_source(&self, _: &str, _: &TlsConfig) -> Result<Box<dyn BlockEventSource>> {
            let receiver = self
                .source
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::EventHubError("already taken".to_string()))?;
            Ok(Box::new(ChannelSource(receiver)))
        }
    }

    fn connected_hub() -> (EventHub, Sender<FilteredBlock>) {
        let (sender, receiver) = unbounded();
        let connector = Arc::new(SourceConnector {
            source: Mutex::new(Some(receiver)),
        });
        let mut hub = EventHub::new(connector, 2);
        hub.set_peer_addr("peer0.org1.example.com:7053", None, None);
        hub.connect().expect("Failed to connect event hub");
        (hub, sender)
    }

    fn block(number: u64, txs: &[(&str, TxValidationCode)]) -> FilteredBlock {
        FilteredBlock {
            channel_id: "mychannel".to_string(),
            number,
            filtered_transactions: txs
                .iter()
                .map(|(txid, code)| FilteredTransaction {
                    txid: txid.to_string(),
                    r#type: 3,
                    tx_validation_code: *code as i32,
                })
                .collect(),
        }
    }

    #[test]
    fn connect_needs_peer_addr() {
        let (_, receiver) = unbounded();
        let connector = Arc::new(SourceConnector {
            source: Mutex::new(Some(receiver)),
        });
        let hub = EventHub::new(connector, 1);
        assert!(hub.connect().is_err());
        assert!(!hub.is_connected());
    }

    #[test]
    fn tx_callbacks_get_validation_code() {
        let (hub, sender) = connected_hub();
        assert!(hub.is_connected());
        // connecting again is a no-op
        hub.connect().unwrap();

        let (done_tx, done_rx) = unbounded();
        let done_valid = done_tx.clone();
        hub.register_tx_event(
            "tx1",
            Box::new(move |tx_id, code, err| {
                done_valid.send((tx_id, code, err.is_some())).unwrap();
            }),
        )
        .unwrap();
        hub.register_tx_event(
            "tx2",
            Box::new(move |tx_id, code, err| {
                done_tx.send((tx_id, code, err.is_some())).unwrap();
            }),
        )
        .unwrap();
        assert_eq!(hub.pending_tx_events().unwrap(), 2);

        sender
            .send(block(
                1,
                &[
                    ("tx1", TxValidationCode::Valid),
                    ("other", TxValidationCode::Valid),
                    ("tx2", TxValidationCode::MvccReadConflict),
                ],
            ))
            .unwrap();

        let mut results = vec![
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        results.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            results,
            vec![
                ("tx1".to_string(), TxValidationCode::Valid, false),
                ("tx2".to_string(), TxValidationCode::MvccReadConflict, true),
            ]
        );
        // one-shot registrations are consumed by the dispatch
        assert_eq!(hub.pending_tx_events().unwrap(), 0);
    }

    #[test]
    fn unregistered_tx_is_not_notified() {
        let (hub, sender) = connected_hub();
        let (done_tx, done_rx) = unbounded::<String>();
        hub.register_tx_event(
            "tx1",
            Box::new(move |tx_id, _, _| {
                let _ = done_tx.send(tx_id);
            }),
        )
        .unwrap();
        hub.unregister_tx_event("tx1").unwrap();
        assert_eq!(hub.pending_tx_events().unwrap(), 0);

        sender
            .send(block(1, &[("tx1", TxValidationCode::Valid)]))
            .unwrap();
        assert!(done_rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn block_callbacks_see_every_block() {
        let (hub, sender) = connected_hub();
        let (seen_tx, seen_rx) = unbounded();
        hub.register_block_event(Arc::new(move |block: &FilteredBlock| {
            seen_tx.send(block.number).unwrap();
        }))
        .unwrap();

        sender.send(block(1, &[])).unwrap();
        sender.send(block(2, &[])).unwrap();

        let mut numbers = vec![
            seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        numbers.sort();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn closed_source_disconnects() {
        let (hub, sender) = connected_hub();
        drop(sender);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while hub.is_connected() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!hub.is_connected());
    }

    #[test]
    fn poisoned_registrations_are_reported() {
        let (hub, _sender) = connected_hub();
        let registrants = hub.registrants.clone();
        let _ = std::thread::spawn(move || {
            let _tx = registrants.tx.lock().unwrap();
            panic!("holding the registrations");
        })
        .join();

        let err = hub
            .register_tx_event("tx1", Box::new(|_, _, _| ()))
            .unwrap_err();
        assert!(matches!(err, Error::EventHubError(_)));
        assert!(hub.unregister_tx_event("tx1").is_err());
        assert!(hub.pending_tx_events().is_err());
    }
}
