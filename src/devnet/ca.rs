use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::cryptosuite::CryptoSuite;
use crate::error::{Error, Result};
use crate::identity::{CertificateAuthority, Enrollment};

/// Issues a fresh key pair to every successful enrollment of a registered id.
pub(crate) struct DevCa {
    url: String,
    suite: Arc<dyn CryptoSuite>,
    // enrollment id -> secret
    registrations: Mutex<HashMap<String, String>>,
}

impl DevCa {
    pub(crate) fn new(url: String, suite: Arc<dyn CryptoSuite>) -> DevCa {
        DevCa {
            url,
            suite,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, enrollment_id: &str, enrollment_secret: &str) -> Result<()> {
        if enrollment_id.is_empty() {
            return Err(Error::IdentityError(
                "enrollment id must not be empty".to_string(),
            ));
        }
        self.registrations
            .lock()
            .map_err(|_| Error::IdentityError("registrations lock poisoned".to_string()))?
            .insert(enrollment_id.to_string(), enrollment_secret.to_string());
        Ok(())
    }
}

impl CertificateAuthority for DevCa {
    fn url(&self) -> &str {
        &self.url
    }

    fn enroll(&self, enrollment_id: &str, enrollment_secret: &str) -> Result<Enrollment> {
        let authenticated = self
            .registrations
            .lock()
            .map_err(|_| Error::IdentityError("registrations lock poisoned".to_string()))?
            .get(enrollment_id)
            .map_or(false, |secret| secret == enrollment_secret);
        if !authenticated {
            return Err(Error::IdentityError(format!(
                "authentication failure for {}",
                enrollment_id
            )));
        }

        let (private_key, certificate) = self.suite.new_key_pair()?;
        debug!("CA {} enrolled {}", self.url, enrollment_id);
        Ok(Enrollment {
            private_key,
            certificate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptosuite::Secp256k1Suite;

    #[test]
    fn only_registered_ids_enroll() {
        let ca = DevCa::new(
            "ca.org1.example.com:7054".to_string(),
            Arc::new(Secp256k1Suite::new()),
        );
        ca.register("admin", "adminpw").unwrap();
        assert!(ca.register("", "secret").is_err());

        let first = ca.enroll("admin", "adminpw").unwrap();
        let second = ca.enroll("admin", "adminpw").unwrap();
        assert_ne!(first.certificate, second.certificate);

        assert!(ca.enroll("admin", "wrong").is_err());
        assert!(ca.enroll("user1", "adminpw").is_err());
    }
}
