#![doc = include_str!("../README.md")]

pub mod aws;
pub mod ca;
pub mod csr;
pub mod issuer_alt_name;
pub mod kms;
pub mod settings;
pub mod utils;

use core::fmt;

use const_oid::ObjectIdentifier;
use lazy_static::lazy_static;

/// Result type for dscertlib
pub type Result<T> = core::result::Result<T, Error>;

/// Error values for dscertlib
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Missing or empty input, detected before any network call
    Validation(String),
    /// Subject name, extension or CSR could not be constructed
    Build(String),
    /// KMS key was inaccessible, unsuitable or failed to sign
    Signing(String),
    /// Certificate authority rejected the issuance request
    Issuance(String),
    /// Certificate authority failed to return the issued certificate
    Retrieval(String),
    /// Ambient AWS credentials could not be resolved
    Credentials(String),
    /// Settings file could not be read or contained invalid values
    Config(String),
    /// Asn1 is used to propagate error information from the x509 and related crates
    Asn1(der::Error),
    /// Base64 is used to propagate error information from the base64ct crate
    Base64(base64ct::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(s)
            | Error::Build(s)
            | Error::Signing(s)
            | Error::Issuance(s)
            | Error::Retrieval(s)
            | Error::Credentials(s)
            | Error::Config(s) => f.write_str(s),
            Error::Asn1(e) => write!(f, "ASN.1 error: {e}"),
            Error::Base64(e) => write!(f, "base64 error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Error {
        Error::Asn1(err)
    }
}
impl From<base64ct::Error> for Error {
    fn from(err: base64ct::Error) -> Error {
        Error::Base64(err)
    }
}
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        use log::error;
        error!("serde_json::Error: {err}");
        Error::Config(err.to_string())
    }
}
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        use log::error;
        error!("std::io::Error: {err}");
        Error::Config(err.to_string())
    }
}

lazy_static! {
    /// Extended key usage identifying an ISO/IEC 18013-5 mDL document signer
    pub static ref ID_KP_MDL_DS: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.0.18013.5.1.2");

    /// Template that takes every extension from the API passthrough rather than from the CSR
    pub static ref BLANK_END_ENTITY_TEMPLATE_ARN: String =
        "arn:aws:acm-pca:::template/BlankEndEntityCertificate_APIPassthrough/V1".to_string();
}

/// Signing algorithm the certificate authority uses when none is configured
pub const DEFAULT_CA_SIGNING_ALGORITHM: &str = "SHA256WITHECDSA";

/// Certificate lifetime in days when none is configured
pub const DEFAULT_VALIDITY_DAYS: i64 = 1825;

/// Seconds to wait between attempts to fetch a certificate that is still being issued
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Country placed in the CSR subject when none is configured
pub const DEFAULT_COUNTRY: &str = "UK";
