use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use prost::Message;

use crate::config::NetworkConfig;
use crate::cryptosuite::CryptoSuite;
use crate::error::{Error, Result};
use crate::protos::msp::SerializedIdentity;

mod cryptogen;
mod enroll;
mod store;

pub use cryptogen::{generate_crypto_material, peer_msp_dir, OrgSpec};
pub use enroll::{enroll_user, CertificateAuthority, Enrollment};
pub use store::UserStore;

const ORDERER_ADMIN_KEY_DIR: &str =
    "ordererOrganizations/example.com/users/Admin@example.com/msp/keystore";
const ORDERER_ADMIN_CERT_DIR: &str =
    "ordererOrganizations/example.com/users/Admin@example.com/msp/signcerts";

/// An enrollment certificate plus its private key, bound to the MSP of an
/// organization.
#[derive(Clone)]
pub struct User {
    name: String,
    msp_id: String,
    enrollment_certificate: Vec<u8>,
    private_key: Vec<u8>,
}

impl User {
    pub fn new(
        name: String,
        msp_id: String,
        enrollment_certificate: Vec<u8>,
        private_key: Vec<u8>,
    ) -> User {
        User {
            name,
            msp_id,
            enrollment_certificate,
            private_key,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn enrollment_certificate(&self) -> &[u8] {
        &self.enrollment_certificate
    }

    /// Serialized `SerializedIdentity`, used as the creator of proposals
    /// and transactions.
    pub fn identity(&self) -> Vec<u8> {
        SerializedIdentity {
            mspid: self.msp_id.clone(),
            id_bytes: self.enrollment_certificate.clone(),
        }
        .encode_to_vec()
    }

    pub fn sign(&self, suite: &dyn CryptoSuite, message: &[u8]) -> Result<Vec<u8>> {
        suite.sign(&self.private_key, message)
    }
}

// private key never goes to the logs
impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("msp_id", &self.msp_id)
            .finish()
    }
}

/// Returns the orderer admin of the `example.com` orderer organization.
pub fn get_orderer_admin(config: &NetworkConfig, org: &str) -> Result<User> {
    pre_enrolled_user(
        config,
        Path::new(ORDERER_ADMIN_KEY_DIR),
        Path::new(ORDERER_ADMIN_CERT_DIR),
        "ordererAdmin",
        org,
    )
}

/// Returns the admin of `<org_path>.example.com`.
pub fn get_admin(config: &NetworkConfig, org_path: &str, org: &str) -> Result<User> {
    let (key_dir, cert_dir) = peer_org_user_dirs(org_path, "Admin");
    pre_enrolled_user(
        config,
        &key_dir,
        &cert_dir,
        &format!("peer{}Admin", org_path),
        org,
    )
}

/// Returns `User1` of `<org_path>.example.com`.
pub fn get_user(config: &NetworkConfig, org_path: &str, org: &str) -> Result<User> {
    let (key_dir, cert_dir) = peer_org_user_dirs(org_path, "User1");
    pre_enrolled_user(
        config,
        &key_dir,
        &cert_dir,
        &format!("peer{}User1", org_path),
        org,
    )
}

fn peer_org_user_dirs(org_path: &str, user: &str) -> (PathBuf, PathBuf) {
    let msp = format!(
        "peerOrganizations/{org}.example.com/users/{user}@{org}.example.com/msp",
        org = org_path,
        user = user
    );
    (
        Path::new(&msp).join("keystore"),
        Path::new(&msp).join("signcerts"),
    )
}

/// Loads a user whose key and certificate were issued out of band.
///
/// `key_dir` and `cert_dir` are relative to the crypto config path; the first
/// file found in each is used.
pub fn pre_enrolled_user(
    config: &NetworkConfig,
    key_dir: &Path,
    cert_dir: &Path,
    username: &str,
    org: &str,
) -> Result<User> {
    let private_key_dir = config.crypto_config_path().join(key_dir);
    let private_key_path = get_first_path_from_dir(&private_key_dir).map_err(|err| {
        Error::IdentityError(format!("Error finding the private key path: {}", err))
    })?;

    let enrollment_cert_dir = config.crypto_config_path().join(cert_dir);
    let enrollment_cert_path = get_first_path_from_dir(&enrollment_cert_dir).map_err(|err| {
        Error::IdentityError(format!("Error finding the enrollment cert path: {}", err))
    })?;

    let msp_id = config
        .msp_id(org)
        .map_err(|err| Error::IdentityError(format!("Error reading MSP ID config: {}", err)))?;

    let private_key = fs::read(&private_key_path)?;
    let enrollment_certificate = fs::read(&enrollment_cert_path)?;

    info!("Loaded pre-enrolled user {} ({})", username, msp_id);
    Ok(User::new(
        username.to_string(),
        msp_id,
        enrollment_certificate,
        private_key,
    ))
}

/// Returns the first regular file in `dir`, by file name.
pub fn get_first_path_from_dir(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir).map_err(|err| {
        Error::IdentityError(format!("Could not read directory {}: {}", dir.display(), err))
    })?;

    let mut files = vec![];
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        debug!("Reading file {}", entry.path().display());
        files.push(entry.path());
    }
    files.sort();

    files.into_iter().next().ok_or_else(|| {
        Error::IdentityError(format!("No paths found in directory: {}", dir.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptosuite::Secp256k1Suite;
    use crate::protos;

    #[test]
    fn first_path_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("aaa")).unwrap();
        fs::write(dir.path().join("b_sk"), "key").unwrap();
        fs::write(dir.path().join("c_sk"), "key").unwrap();

        let path = get_first_path_from_dir(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("b_sk"));
    }

    #[test]
    fn first_path_of_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("only_dirs")).unwrap();

        let err = get_first_path_from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No paths found"));
    }

    #[test]
    fn first_path_of_missing_dir() {
        let err = get_first_path_from_dir(Path::new("/nonexistent/keystore")).unwrap_err();
        assert!(err.to_string().contains("Could not read directory"));
    }

    #[test]
    fn load_generated_users() {
        let suite = Secp256k1Suite::new();
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = NetworkConfig::get_default();
        cfg.crypto_config_path = dir.path().to_path_buf();
        generate_crypto_material(dir.path(), &suite, &[OrgSpec::new("org1", 1)]).unwrap();

        let admin = get_admin(&cfg, "org1", "peerorg1").unwrap();
        assert_eq!(admin.name(), "peerorg1Admin");
        assert_eq!(admin.msp_id(), "Org1MSP");

        let user = get_user(&cfg, "org1", "peerorg1").unwrap();
        assert_eq!(user.name(), "peerorg1User1");
        assert_ne!(user.enrollment_certificate(), admin.enrollment_certificate());

        let orderer_admin = get_orderer_admin(&cfg, "peerorg1").unwrap();
        assert_eq!(orderer_admin.name(), "ordererAdmin");

        // the loaded key matches the certificate
        let signature = admin.sign(&suite, b"hello").unwrap();
        assert!(suite
            .verify(admin.enrollment_certificate(), &signature, b"hello")
            .unwrap());

        let identity: SerializedIdentity = protos::decode(&admin.identity()).unwrap();
        assert_eq!(identity.mspid, "Org1MSP");
        assert_eq!(identity.id_bytes, admin.enrollment_certificate());
    }

    #[test]
    fn missing_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = NetworkConfig::get_default();
        cfg.crypto_config_path = dir.path().to_path_buf();

        let err = get_admin(&cfg, "org1", "peerorg1").unwrap_err();
        assert!(err
            .to_string()
            .contains("Error finding the private key path"));
    }

    #[test]
    fn unknown_org_msp() {
        let suite = Secp256k1Suite::new();
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = NetworkConfig::get_default();
        cfg.crypto_config_path = dir.path().to_path_buf();
        generate_crypto_material(dir.path(), &suite, &[OrgSpec::new("org1", 1)]).unwrap();

        let err = get_admin(&cfg, "org1", "peerorg9").unwrap_err();
        assert!(err.to_string().contains("Error reading MSP ID config"));
    }
}
