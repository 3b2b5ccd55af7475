use log::info;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};

use super::User;

/// Key pair and certificate issued by a certificate authority.
pub struct Enrollment {
    pub private_key: Vec<u8>,
    pub certificate: Vec<u8>,
}

/// A certificate authority that enrolls registered identities.
pub trait CertificateAuthority: Send + Sync {
    fn url(&self) -> &str;

    fn enroll(&self, enrollment_id: &str, enrollment_secret: &str) -> Result<Enrollment>;
}

/// Enrolls `enrollment_id` with the CA and returns it as a user of `org`.
pub fn enroll_user(
    config: &NetworkConfig,
    ca: &dyn CertificateAuthority,
    enrollment_id: &str,
    enrollment_secret: &str,
    org: &str,
) -> Result<User> {
    let msp_id = config
        .msp_id(org)
        .map_err(|err| Error::IdentityError(format!("Error reading MSP ID config: {}", err)))?;

    let enrollment = ca
        .enroll(enrollment_id, enrollment_secret)
        .map_err(|err| Error::IdentityError(format!("Enroll failed: {}", err)))?;

    info!(
        "Enrolled user {} ({}) with CA {}",
        enrollment_id,
        msp_id,
        ca.url()
    );
    Ok(User::new(
        enrollment_id.to_string(),
        msp_id,
        enrollment.certificate,
        enrollment.private_key,
    ))
}
