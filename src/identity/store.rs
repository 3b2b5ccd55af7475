// File backed state store for enrolled users.
//
// <path>/<name>.json holds the user record, the private key goes to
// <path>/keystore/<ski>_sk next to it, like in an MSP directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cryptosuite::CryptoSuite;
use crate::error::{Error, Result};

use super::User;

#[derive(Debug, Serialize, Deserialize)]
struct UserRecord {
    name: String,
    msp_id: String,
    // hex encoded
    enrollment_certificate: String,
}

pub struct UserStore {
    path: PathBuf,
    suite: Arc<dyn CryptoSuite>,
}

impl UserStore {
    pub fn new(path: &Path, suite: Arc<dyn CryptoSuite>) -> UserStore {
        UserStore {
            path: path.to_path_buf(),
            suite,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves `user`, replacing an earlier record of the same name.
    pub fn save(&self, user: &User) -> Result<()> {
        let keystore = self.path.join("keystore");
        fs::create_dir_all(&keystore)?;
        fs::write(
            keystore.join(self.key_file(user.enrollment_certificate())),
            &user.private_key,
        )?;

        let record = UserRecord {
            name: user.name().to_string(),
            msp_id: user.msp_id().to_string(),
            enrollment_certificate: hex::encode(user.enrollment_certificate()),
        };
        let json = serde_json::to_string_pretty(&record)?;

        // write then rename, a reader never sees half a record
        let record_path = self.record_path(user.name());
        let temp_path = record_path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &record_path)?;

        debug!("Saved user {} to {}", user.name(), record_path.display());
        Ok(())
    }

    /// Loads the user saved under `name`, `Ok(None)` if there is none.
    pub fn load(&self, name: &str) -> Result<Option<User>> {
        let record_path = self.record_path(name);
        if !record_path.exists() {
            return Ok(None);
        }

        let record: UserRecord = serde_json::from_str(&fs::read_to_string(&record_path)?)?;
        let enrollment_certificate = hex::decode(&record.enrollment_certificate)?;
        let key_path = self
            .path
            .join("keystore")
            .join(self.key_file(&enrollment_certificate));
        let private_key = fs::read(&key_path).map_err(|err| {
            Error::IdentityError(format!(
                "private key of user {} not found at {}: {}",
                name,
                key_path.display(),
                err
            ))
        })?;

        Ok(Some(User::new(
            record.name,
            record.msp_id,
            enrollment_certificate,
            private_key,
        )))
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{}.json", name))
    }

    fn key_file(&self, certificate: &[u8]) -> String {
        format!("{}_sk", hex::encode(self.suite.hash(certificate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptosuite::Secp256k1Suite;

    fn enrolled_admin(suite: &dyn CryptoSuite) -> User {
        let (private_key, certificate) = suite.new_key_pair().unwrap();
        User::new(
            "admin".to_string(),
            "Org1MSP".to_string(),
            certificate,
            private_key,
        )
    }

    #[test]
    fn saved_user_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let suite: Arc<dyn CryptoSuite> = Arc::new(Secp256k1Suite::new());
        let store = UserStore::new(&dir.path().join("enroll_user"), suite.clone());
        let admin = enrolled_admin(suite.as_ref());

        store.save(&admin).unwrap();
        assert!(store.path().join("admin.json").is_file());

        let loaded = store.load("admin").unwrap().expect("admin was saved");
        assert_eq!(loaded.name(), "admin");
        assert_eq!(loaded.msp_id(), "Org1MSP");
        assert_eq!(loaded.enrollment_certificate(), admin.enrollment_certificate());

        // the stored key still belongs to the certificate
        let signature = loaded.sign(suite.as_ref(), b"hello").unwrap();
        assert!(suite
            .verify(admin.enrollment_certificate(), &signature, b"hello")
            .unwrap());
    }

    #[test]
    fn saving_again_replaces_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let suite: Arc<dyn CryptoSuite> = Arc::new(Secp256k1Suite::new());
        let store = UserStore::new(dir.path(), suite.clone());

        store.save(&enrolled_admin(suite.as_ref())).unwrap();
        let second = enrolled_admin(suite.as_ref());
        store.save(&second).unwrap();

        let loaded = store.load("admin").unwrap().unwrap();
        assert_eq!(loaded.enrollment_certificate(), second.enrollment_certificate());
    }

    #[test]
    fn unknown_user_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::new(dir.path(), Arc::new(Secp256k1Suite::new()));
        assert!(store.load("admin").unwrap().is_none());
    }

    #[test]
    fn missing_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let suite: Arc<dyn CryptoSuite> = Arc::new(Secp256k1Suite::new());
        let store = UserStore::new(dir.path(), suite.clone());
        store.save(&enrolled_admin(suite.as_ref())).unwrap();
        fs::remove_dir_all(dir.path().join("keystore")).unwrap();

        let err = store.load("admin").unwrap_err();
        assert!(matches!(err, Error::IdentityError(_)));
    }
}
