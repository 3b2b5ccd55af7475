// Writes MSP directories in the layout produced by Fabric's cryptogen tool,
// so the development network can run without external tooling.

use std::fs;
use std::path::Path;

use log::debug;

use crate::cryptosuite::CryptoSuite;
use crate::error::Result;

const DOMAIN: &str = "example.com";

#[derive(Clone, Debug)]
pub struct OrgSpec {
    // short name, e.g. "org1" for org1.example.com
    pub name: String,
    pub peers: usize,
}

impl OrgSpec {
    pub fn new(name: &str, peers: usize) -> OrgSpec {
        OrgSpec {
            name: name.to_string(),
            peers,
        }
    }
}

pub fn generate_crypto_material(
    root: &Path,
    suite: &dyn CryptoSuite,
    orgs: &[OrgSpec],
) -> Result<()> {
    let orderer_org = root.join("ordererOrganizations").join(DOMAIN);
    write_msp(
        suite,
        &orderer_org
            .join("users")
            .join(format!("Admin@{}", DOMAIN))
            .join("msp"),
        &format!("Admin@{}", DOMAIN),
    )?;
    write_msp(
        suite,
        &root.join(orderer_msp_dir()),
        &format!("orderer.{}", DOMAIN),
    )?;

    for org in orgs {
        let org_domain = format!("{}.{}", org.name, DOMAIN);
        let org_dir = root.join("peerOrganizations").join(&org_domain);

        for user in ["Admin", "User1"] {
            let name = format!("{}@{}", user, org_domain);
            write_msp(suite, &org_dir.join("users").join(&name).join("msp"), &name)?;
        }
        for i in 0..org.peers {
            let name = format!("peer{}.{}", i, org_domain);
            write_msp(suite, &root.join(peer_msp_dir(&org.name, i)), &name)?;
        }
    }
    Ok(())
}

// keystore/<ski>_sk + signcerts/<name>-cert.pem, existing material is kept
fn write_msp(suite: &dyn CryptoSuite, msp_dir: &Path, name: &str) -> Result<()> {
    let keystore = msp_dir.join("keystore");
    let signcerts = msp_dir.join("signcerts");
    if has_files(&keystore) && has_files(&signcerts) {
        debug!("Keeping existing MSP at {}", msp_dir.display());
        return Ok(());
    }

    fs::create_dir_all(&keystore)?;
    fs::create_dir_all(&signcerts)?;

    let (private_key, certificate) = suite.new_key_pair()?;
    let ski = hex::encode(suite.hash(&certificate));
    fs::write(keystore.join(format!("{}_sk", ski)), &private_key)?;
    fs::write(signcerts.join(format!("{}-cert.pem", name)), &certificate)?;
    debug!("Generated MSP for {} at {}", name, msp_dir.display());
    Ok(())
}

fn has_files(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Path of the MSP directory of a peer node, relative to the crypto config root.
pub fn peer_msp_dir(org_name: &str, peer_index: usize) -> std::path::PathBuf {
    let org_domain = format!("{}.{}", org_name, DOMAIN);
    Path::new("peerOrganizations")
        .join(&org_domain)
        .join("peers")
        .join(format!("peer{}.{}", peer_index, org_domain))
        .join("msp")
}

fn orderer_msp_dir() -> std::path::PathBuf {
    Path::new("ordererOrganizations")
        .join(DOMAIN)
        .join("orderers")
        .join(format!("orderer.{}", DOMAIN))
        .join("msp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptosuite::Secp256k1Suite;

    #[test]
    fn generation_is_idempotent() {
        let suite = Secp256k1Suite::new();
        let dir = tempfile::tempdir().unwrap();
        let orgs = [OrgSpec::new("org1", 2)];

        generate_crypto_material(dir.path(), &suite, &orgs).unwrap();
        let keystore = dir
            .path()
            .join("peerOrganizations/org1.example.com/users/Admin@org1.example.com/msp/keystore");
        let first = fs::read_dir(&keystore).unwrap().count();

        generate_crypto_material(dir.path(), &suite, &orgs).unwrap();
        assert_eq!(fs::read_dir(&keystore).unwrap().count(), first);
        assert_eq!(first, 1);

        assert!(dir.path().join(peer_msp_dir("org1", 1)).join("signcerts").is_dir());
    }
}
