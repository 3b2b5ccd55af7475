use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, Connector};
use crate::client::FabricClient;
use crate::config::NetworkConfig;
use crate::cryptosuite::CryptoSuite;
use crate::error::{Error, Result};
use crate::events::EventHub;
use crate::identity::{self, User};
use crate::txn::{self, TransientMap};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub make: String,
    pub model: String,
    pub colour: String,
    pub owner: String,
}

impl Car {
    pub fn new(make: &str, model: &str, colour: &str, owner: &str) -> Car {
        Car {
            make: make.to_string(),
            model: model.to_string(),
            colour: colour.to_string(),
            owner: owner.to_string(),
        }
    }
}

/// One entry of the `queryAllCars` result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarRecord {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Record")]
    pub record: Car,
}

pub fn parse_cars(result: &str) -> Result<Vec<CarRecord>> {
    Ok(serde_json::from_str(result)?)
}

/// Client side of the fabcar application: users, channel and event hub of
/// one organization, wired up against the network behind `connector`.
pub struct FabcarSession {
    org: String,
    chaincode_id: String,
    client: FabricClient,
    channel: Channel,
    event_hub: EventHub,
    enrolled_user: User,
    admin_user: User,
    orderer_admin_user: User,
    user: User,
}

impl FabcarSession {
    pub fn setup(
        config: NetworkConfig,
        connector: Arc<dyn Connector>,
        suite: Arc<dyn CryptoSuite>,
    ) -> Result<FabcarSession> {
        let org = config.client.organization.clone();
        let chaincode_id = config.channel.chaincode_id.clone();
        let mut client = FabricClient::new(config, suite);

        // the registrar is enrolled with the organization's CA and kept in
        // the state store, the session itself signs as the pre-enrolled admin
        let ca_config = client.config().ca_config(&org)?;
        let ca = connector.certificate_authority(&ca_config)?;
        let enrolled_user = identity::enroll_user(
            client.config(),
            ca.as_ref(),
            &ca_config.registrar.enroll_id,
            &ca_config.registrar.enroll_secret,
            &org,
        )?;
        client.save_user_to_state_store(&enrolled_user)?;

        let org_path = client.config().org_path(&org)?;
        let admin_user = identity::get_admin(client.config(), &org_path, &org)?;
        client.set_user_context(admin_user.clone());
        let orderer_admin_user = identity::get_orderer_admin(client.config(), &org)?;
        let user = identity::get_user(client.config(), &org_path, &org)?;

        let orderer_config = client.config().random_orderer_config()?;
        let mut channel = client.new_channel(&client.config().channel.name)?;
        channel.add_orderer(connector.orderer(&orderer_config)?)?;

        // a single peer per organization is used
        let peers = client.config().peers_config(&org)?;
        let peer_config = peers.first().ok_or_else(|| {
            Error::ConfigError(format!("organization {} has no peers", org))
        })?;
        let peer = connector.peer(peer_config)?;
        channel.add_peer(peer.clone())?;
        channel.set_primary_peer(peer)?;

        let mut event_hub = EventHub::new(connector, client.config().client.event_workers);
        event_hub.set_peer_addr(
            &peer_config.event_url(),
            peer_config.tls.certificate.clone(),
            peer_config.tls.server_host_override.clone(),
        );

        info!(
            "Session for {} ready on channel {}",
            org,
            channel.name()
        );
        Ok(FabcarSession {
            org,
            chaincode_id,
            client,
            channel,
            event_hub,
            enrolled_user,
            admin_user,
            orderer_admin_user,
            user,
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn client(&self) -> &FabricClient {
        &self.client
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn event_hub(&self) -> &EventHub {
        &self.event_hub
    }

    pub fn enrolled_user(&self) -> &User {
        &self.enrolled_user
    }

    pub fn admin_user(&self) -> &User {
        &self.admin_user
    }

    pub fn orderer_admin_user(&self) -> &User {
        &self.orderer_admin_user
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub async fn query_all_cars(&self) -> Result<String> {
        self.query("queryAllCars", &[]).await
    }

    pub async fn query_car(&self, key: &str) -> Result<String> {
        self.query("queryCar", &[key]).await
    }

    /// Returns the id of the committed transaction.
    pub async fn create_car(&self, key: &str, car: &Car, transient: TransientMap) -> Result<String> {
        self.invoke(
            "createCar",
            &[
                key,
                car.make.as_str(),
                car.model.as_str(),
                car.colour.as_str(),
                car.owner.as_str(),
            ],
            transient,
        )
        .await
    }

    pub async fn change_car_owner(
        &self,
        key: &str,
        owner: &str,
        transient: TransientMap,
    ) -> Result<String> {
        self.invoke("changeCarOwner", &[key, owner], transient)
            .await
    }

    async fn query(&self, fcn: &str, args: &[&str]) -> Result<String> {
        txn::query_chaincode(&self.client, &self.channel, &self.chaincode_id, fcn, args).await
    }

    async fn invoke(&self, fcn: &str, args: &[&str], transient: TransientMap) -> Result<String> {
        let primary = self
            .channel
            .primary_peer()
            .ok_or_else(|| Error::ChannelError("primary peer is not set".to_string()))?;
        txn::invoke_chaincode(
            &self.client,
            &self.channel,
            &[primary],
            &self.event_hub,
            &self.chaincode_id,
            fcn,
            args,
            transient,
        )
        .await
    }
}
