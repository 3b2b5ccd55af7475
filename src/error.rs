use std::time::Duration;

use crate::protos::peer::TxValidationCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    ConfigError(String),
    IdentityError(String),
    IoError(std::io::Error),
    CryptoError(String),
    EncodeError(String),
    DecodeError(String),
    ProposalError(String),
    EndorserError {
        peer: String,
        status: i32,
        message: String,
    },
    EndorsementMismatch(String),
    BroadcastError(String),
    ChannelError(String),
    EventHubError(String),
    TransactionInvalid {
        tx_id: String,
        code: TxValidationCode,
    },
    Timeout {
        tx_id: String,
        timeout: Duration,
    },
    ChaincodeError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ConfigError(reason) => write!(f, "Invalid configuration: {}", reason),
            Error::IdentityError(reason) => write!(f, "Identity error: {}", reason),
            Error::IoError(err) => write!(f, "I/O failed: {}", err),
            Error::CryptoError(reason) => write!(f, "Crypto operation failed: {}", reason),
            Error::EncodeError(reason) => write!(f, "Failed to encode message: {}", reason),
            Error::DecodeError(reason) => write!(f, "Failed to decode message: {}", reason),
            Error::ProposalError(reason) => write!(f, "Invalid proposal: {}", reason),
            Error::EndorserError {
                peer,
                status,
                message,
            } => write!(
                f,
                "Endorser {} returned error: status {}, {}",
                peer, status, message
            ),
            Error::EndorsementMismatch(reason) => {
                write!(f, "Endorsements do not match: {}", reason)
            }
            Error::BroadcastError(reason) => write!(f, "Broadcast failed: {}", reason),
            Error::ChannelError(reason) => write!(f, "Channel error: {}", reason),
            Error::EventHubError(reason) => write!(f, "Event hub error: {}", reason),
            Error::TransactionInvalid { tx_id, code } => write!(
                f,
                "Transaction {} committed as invalid: {}",
                tx_id, code
            ),
            Error::Timeout { tx_id, timeout } => write!(
                f,
                "Didn't receive block event for txid({}) within {:?}",
                tx_id, timeout
            ),
            Error::ChaincodeError(reason) => write!(f, "Chaincode error: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error)
    }
}

impl From<::config::ConfigError> for Error {
    fn from(error: ::config::ConfigError) -> Self {
        Error::ConfigError(error.to_string())
    }
}

impl From<prost::EncodeError> for Error {
    fn from(error: prost::EncodeError) -> Self {
        Error::EncodeError(error.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(error: prost::DecodeError) -> Self {
        Error::DecodeError(error.to_string())
    }
}

impl From<sawtooth_sdk::signing::Error> for Error {
    fn from(error: sawtooth_sdk::signing::Error) -> Self {
        Error::CryptoError(error.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(error: hex::FromHexError) -> Self {
        Error::CryptoError(format!("invalid hex: {}", error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::ChaincodeError(format!("invalid JSON: {}", error))
    }
}
