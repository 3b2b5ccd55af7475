use std::sync::Arc;

use crate::channel::Channel;
use crate::config::NetworkConfig;
use crate::cryptosuite::CryptoSuite;
use crate::error::{Error, Result};
use crate::identity::{User, UserStore};

pub struct FabricClient {
    config: NetworkConfig,
    crypto_suite: Arc<dyn CryptoSuite>,
    user_context: Option<User>,
    state_store: UserStore,
}

impl FabricClient {
    pub fn new(config: NetworkConfig, crypto_suite: Arc<dyn CryptoSuite>) -> FabricClient {
        let state_store =
            UserStore::new(&config.client.credential_store_path, crypto_suite.clone());
        FabricClient {
            config,
            crypto_suite,
            user_context: None,
            state_store,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn crypto_suite(&self) -> &dyn CryptoSuite {
        self.crypto_suite.as_ref()
    }

    // the identity proposals and transactions are signed with
    pub fn set_user_context(&mut self, user: User) {
        log::debug!("Client user context set to {}", user.name());
        self.user_context = Some(user);
    }

    pub fn user_context(&self) -> Result<&User> {
        self.user_context
            .as_ref()
            .ok_or_else(|| Error::IdentityError("user context is not set".to_string()))
    }

    pub fn new_channel(&self, name: &str) -> Result<Channel> {
        Channel::new(name)
    }

    pub fn save_user_to_state_store(&self, user: &User) -> Result<()> {
        self.state_store.save(user)
    }

    pub fn load_user_from_state_store(&self, name: &str) -> Result<Option<User>> {
        self.state_store.load(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptosuite::{CryptoSuite, Secp256k1Suite};

    #[test]
    fn user_context_must_be_set() {
        let mut client =
            FabricClient::new(NetworkConfig::get_default(), Arc::new(Secp256k1Suite::new()));
        assert!(client.user_context().is_err());

        client.set_user_context(User::new(
            "peerorg1Admin".to_string(),
            "Org1MSP".to_string(),
            b"cert".to_vec(),
            b"key".to_vec(),
        ));
        assert_eq!(client.user_context().unwrap().name(), "peerorg1Admin");
    }

    #[test]
    fn state_store_lives_under_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let suite = Secp256k1Suite::new();
        let (private_key, certificate) = suite.new_key_pair().unwrap();
        let mut config = NetworkConfig::get_default();
        config.client.credential_store_path = dir.path().join("enroll_user");
        let client = FabricClient::new(config, Arc::new(suite));

        assert!(client.load_user_from_state_store("admin").unwrap().is_none());
        let admin = User::new(
            "admin".to_string(),
            "Org1MSP".to_string(),
            certificate,
            private_key,
        );
        client.save_user_to_state_store(&admin).unwrap();

        assert!(dir.path().join("enroll_user").join("admin.json").is_file());
        let loaded = client.load_user_from_state_store("admin").unwrap().unwrap();
        assert_eq!(loaded.enrollment_certificate(), admin.enrollment_certificate());
    }

    #[test]
    fn new_channel_needs_name() {
        let client =
            FabricClient::new(NetworkConfig::get_default(), Arc::new(Secp256k1Suite::new()));
        assert!(client.new_channel("").is_err());
        assert_eq!(client.new_channel("mychannel").unwrap().name(), "mychannel");
    }
}
