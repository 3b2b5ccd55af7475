use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config_test.yaml";
const DEFAULT_CRYPTO_CONFIG_PATH: &str = "fixtures/channel/crypto-config";
const DEFAULT_CHANNEL: &str = "mychannel";
const DEFAULT_CHAINCODE_ID: &str = "fabcar";
const DEFAULT_ORG: &str = "peerorg1";
const DEFAULT_EVENT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_WORKERS: usize = 4;
const DEFAULT_CREDENTIAL_STORE_PATH: &str = "/tmp/enroll_user";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    pub crypto_config_path: PathBuf,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub orderers: Vec<OrdererConfig>,
    #[serde(default)]
    pub organizations: HashMap<String, OrganizationConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,
    pub chaincode_id: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            name: DEFAULT_CHANNEL.to_string(),
            chaincode_id: DEFAULT_CHAINCODE_ID.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    // organization the client acts for
    pub organization: String,
    pub event_timeout_secs: u64,
    pub event_workers: usize,
    // where enrolled users are saved
    pub credential_store_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            organization: DEFAULT_ORG.to_string(),
            event_timeout_secs: DEFAULT_EVENT_TIMEOUT_SECS,
            event_workers: DEFAULT_EVENT_WORKERS,
            credential_store_path: PathBuf::from(DEFAULT_CREDENTIAL_STORE_PATH),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TlsConfig {
    pub certificate: Option<PathBuf>,
    pub server_host_override: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrdererConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl OrdererConfig {
    pub fn url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    pub event_host: String,
    pub event_port: u16,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl PeerConfig {
    pub fn url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn event_url(&self) -> String {
        format!("{}:{}", self.event_host, self.event_port)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegistrarConfig {
    pub enroll_id: String,
    pub enroll_secret: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CaConfig {
    pub url: String,
    pub registrar: RegistrarConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrganizationConfig {
    pub msp_id: String,
    // directory prefix under peerOrganizations, "org1" for org1.example.com
    #[serde(default)]
    pub org_path: Option<String>,
    #[serde(default)]
    pub ca: Option<CaConfig>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl NetworkConfig {
    pub fn get_default() -> NetworkConfig {
        let peer = PeerConfig {
            host: "peer0.org1.example.com".to_string(),
            port: 7051,
            event_host: "peer0.org1.example.com".to_string(),
            event_port: 7053,
            tls: TlsConfig {
                certificate: None,
                server_host_override: Some("peer0.org1.example.com".to_string()),
            },
        };
        let mut organizations = HashMap::new();
        organizations.insert(
            DEFAULT_ORG.to_string(),
            OrganizationConfig {
                msp_id: "Org1MSP".to_string(),
                org_path: Some("org1".to_string()),
                ca: Some(CaConfig {
                    url: "ca.org1.example.com:7054".to_string(),
                    registrar: RegistrarConfig {
                        enroll_id: "admin".to_string(),
                        enroll_secret: "adminpw".to_string(),
                    },
                    tls: TlsConfig::default(),
                }),
                peers: vec![peer],
            },
        );

        NetworkConfig {
            crypto_config_path: PathBuf::from(DEFAULT_CRYPTO_CONFIG_PATH),
            channel: ChannelConfig::default(),
            client: ClientConfig::default(),
            orderers: vec![OrdererConfig {
                host: "orderer.example.com".to_string(),
                port: 7050,
                tls: TlsConfig {
                    certificate: None,
                    server_host_override: Some("orderer.example.com".to_string()),
                },
            }],
            organizations,
        }
    }

    // yaml file first, APP_* environment variables override it,
    // e.g. APP_CLIENT__EVENT_TIMEOUT_SECS=5
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NetworkConfig> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::ConfigError(format!("invalid path {:?}", path)))?;

        let config = ::config::Config::builder()
            .add_source(::config::File::new(path_str, ::config::FileFormat::Yaml).required(true))
            .add_source(
                ::config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let network: NetworkConfig = config.try_deserialize()?;
        network.validate()?;
        log::debug!("Loaded network config from {}", path.display());
        Ok(network)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel.name.is_empty() {
            return Err(Error::ConfigError("channel name is empty".to_string()));
        }
        if self.channel.chaincode_id.is_empty() {
            return Err(Error::ConfigError("chaincode id is empty".to_string()));
        }
        for orderer in &self.orderers {
            if orderer.port == 0 {
                return Err(Error::ConfigError(format!(
                    "orderer {} has no port",
                    orderer.host
                )));
            }
        }
        for (name, org) in &self.organizations {
            if org.msp_id.is_empty() {
                return Err(Error::ConfigError(format!(
                    "organization {} has no MSP ID",
                    name
                )));
            }
            if let Some(ca) = &org.ca {
                if ca.url.is_empty() || ca.registrar.enroll_id.is_empty() {
                    return Err(Error::ConfigError(format!(
                        "certificate authority of {} needs a url and a registrar",
                        name
                    )));
                }
            }
            for peer in &org.peers {
                if peer.port == 0 || peer.event_port == 0 {
                    return Err(Error::ConfigError(format!(
                        "peer {} of {} has no port",
                        peer.host, name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn crypto_config_path(&self) -> &Path {
        &self.crypto_config_path
    }

    pub fn msp_id(&self, org: &str) -> Result<String> {
        self.organization(org).map(|org| org.msp_id.clone())
    }

    pub fn peers_config(&self, org: &str) -> Result<Vec<PeerConfig>> {
        self.organization(org).map(|org| org.peers.clone())
    }

    // falls back to the organization name without its "peer" prefix
    pub fn org_path(&self, org: &str) -> Result<String> {
        let config = self.organization(org)?;
        Ok(config
            .org_path
            .clone()
            .unwrap_or_else(|| org.trim_start_matches("peer").to_string()))
    }

    pub fn ca_config(&self, org: &str) -> Result<CaConfig> {
        self.organization(org)?.ca.clone().ok_or_else(|| {
            Error::ConfigError(format!("organization {} has no certificate authority", org))
        })
    }

    pub fn random_orderer_config(&self) -> Result<OrdererConfig> {
        self.orderers
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::ConfigError("no orderers configured".to_string()))
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.client.event_timeout_secs)
    }

    fn organization(&self, org: &str) -> Result<&OrganizationConfig> {
        self.organizations
            .get(org)
            .ok_or_else(|| Error::ConfigError(format!("unknown organization {}", org)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG_YAML: &str = r#"
crypto_config_path: /tmp/crypto-config
channel:
  name: testchannel
client:
  organization: peerorg1
  event_timeout_secs: 5
orderers:
  - host: orderer.example.com
    port: 7050
organizations:
  peerorg1:
    msp_id: Org1MSP
    ca:
      url: ca.org1.example.com:7054
      registrar:
        enroll_id: admin
        enroll_secret: adminpw
    peers:
      - host: peer0.org1.example.com
        port: 7051
        event_host: peer0.org1.example.com
        event_port: 7053
        tls:
          server_host_override: peer0.org1.example.com
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("Failed to create temp file");
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn read_config_file() {
        let file = write_config(CONFIG_YAML);
        let cfg = NetworkConfig::from_file(file.path()).expect("Failed to read config");

        assert_eq!(cfg.crypto_config_path(), Path::new("/tmp/crypto-config"));
        assert_eq!(cfg.channel.name, "testchannel");
        // not in the file
        assert_eq!(cfg.channel.chaincode_id, "fabcar");
        assert_eq!(cfg.client.event_workers, 4);
        assert_eq!(cfg.event_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.msp_id("peerorg1").unwrap(), "Org1MSP");

        let peers = cfg.peers_config("peerorg1").unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].url(), "peer0.org1.example.com:7051");
        assert_eq!(peers[0].event_url(), "peer0.org1.example.com:7053");
        assert_eq!(
            peers[0].tls.server_host_override.as_deref(),
            Some("peer0.org1.example.com")
        );
    }

    #[test]
    fn certificate_authority_config() {
        let file = write_config(CONFIG_YAML);
        let cfg = NetworkConfig::from_file(file.path()).unwrap();

        let ca = cfg.ca_config("peerorg1").unwrap();
        assert_eq!(ca.url, "ca.org1.example.com:7054");
        assert_eq!(ca.registrar.enroll_id, "admin");
        assert_eq!(ca.registrar.enroll_secret, "adminpw");
        assert_eq!(
            cfg.client.credential_store_path,
            PathBuf::from("/tmp/enroll_user")
        );
        assert!(cfg.ca_config("peerorg2").is_err());

        let mut cfg = NetworkConfig::get_default();
        cfg.organizations.get_mut("peerorg1").unwrap().ca = None;
        assert!(matches!(cfg.ca_config("peerorg1"), Err(Error::ConfigError(_))));
    }

    #[test]
    fn missing_config_file() {
        let err = NetworkConfig::from_file("/nonexistent/config_test.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn unknown_organization() {
        let cfg = NetworkConfig::get_default();
        assert!(cfg.msp_id("peerorg2").is_err());
        assert!(cfg.peers_config("peerorg2").is_err());
    }

    #[test]
    fn org_path_defaults_to_org_name() {
        let mut cfg = NetworkConfig::get_default();
        assert_eq!(cfg.org_path("peerorg1").unwrap(), "org1");

        cfg.organizations.get_mut("peerorg1").unwrap().org_path = None;
        assert_eq!(cfg.org_path("peerorg1").unwrap(), "org1");
        assert!(cfg.org_path("peerorg2").is_err());
    }

    #[test]
    fn random_orderer_needs_orderers() {
        let mut cfg = NetworkConfig::get_default();
        assert_eq!(
            cfg.random_orderer_config().unwrap().url(),
            "orderer.example.com:7050"
        );

        cfg.orderers.clear();
        assert!(cfg.random_orderer_config().is_err());
    }

    #[test]
    fn validate_rejects_empty_msp_id() {
        let mut cfg = NetworkConfig::get_default();
        assert!(cfg.validate().is_ok());

        cfg.organizations.get_mut("peerorg1").unwrap().msp_id = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_channel() {
        let mut cfg = NetworkConfig::get_default();
        cfg.channel.name = String::new();
        assert!(cfg.validate().is_err());
    }
}
