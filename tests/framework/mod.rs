use std::path::Path;
use std::sync::Arc;

use fabcar_client::config::NetworkConfig;
use fabcar_client::cryptosuite::{CryptoSuite, Secp256k1Suite};
use fabcar_client::devnet::{self, Devnet};
use fabcar_client::fabcar::FabcarSession;
use fabcar_client::identity;
use tempfile::TempDir;

pub const CONFIG_FILE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config_test.yaml");

pub struct TestNetwork {
    // crypto material lives as long as the network
    _crypto_dir: TempDir,
    pub devnet: Arc<Devnet>,
    pub session: FabcarSession,
}

pub fn load_config(crypto_config_path: &Path) -> NetworkConfig {
    let mut config = NetworkConfig::from_file(CONFIG_FILE).expect("Failed to read config file");
    config.crypto_config_path = crypto_config_path.to_path_buf();
    config.client.credential_store_path = crypto_config_path.join("enroll_user");
    config
}

pub fn setup() -> TestNetwork {
    setup_with(|_| ())
}

pub fn setup_with<F: FnOnce(&mut NetworkConfig)>(customize: F) -> TestNetwork {
    let _ = env_logger::builder().is_test(true).try_init();

    let crypto_dir = tempfile::tempdir().expect("Failed to create crypto dir");
    let mut config = load_config(crypto_dir.path());
    customize(&mut config);

    let suite: Arc<dyn CryptoSuite> = Arc::new(Secp256k1Suite::new());
    let orgs = devnet::org_specs(&config).expect("Failed to read organizations");
    identity::generate_crypto_material(crypto_dir.path(), suite.as_ref(), &orgs)
        .expect("Failed to generate crypto material");

    let devnet = Devnet::start(&config, suite.clone()).expect("Failed to start devnet");
    let session =
        FabcarSession::setup(config, devnet.clone(), suite).expect("Failed to set up session");

    TestNetwork {
        _crypto_dir: crypto_dir,
        devnet,
        session,
    }
}
