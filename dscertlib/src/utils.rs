//! Utility functions used when reporting on issued certificates

use log::{error, info};
use subtle_encoding::hex;

use der::DecodePem;
use x509_cert::Certificate;

use crate::{Error, Result};

/// Renders `buffer` as upper case hex, i.e., for certificate serial numbers
pub fn buffer_to_hex(buffer: &[u8]) -> String {
    String::from_utf8(hex::encode_upper(buffer)).unwrap_or_default()
}

/// Summary of an issued certificate used for logging
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    /// Serial number rendered as upper case hex
    pub serial: String,
    pub not_before: String,
    pub not_after: String,
}

/// Parses a PEM-encoded certificate and logs its subject, serial number and validity.
///
/// Fails with [Error::Retrieval] when the PEM cannot be parsed as a certificate.
pub fn describe_certificate(pem: &str) -> Result<CertificateSummary> {
    let cert = match Certificate::from_pem(pem.as_bytes()) {
        Ok(cert) => cert,
        Err(e) => {
            error!("Failed to parse certificate returned by the certificate authority: {e:?}");
            return Err(Error::Retrieval(format!(
                "returned certificate could not be parsed: {e}"
            )));
        }
    };

    let tbs = &cert.tbs_certificate;
    let summary = CertificateSummary {
        subject: tbs.subject.to_string(),
        issuer: tbs.issuer.to_string(),
        serial: buffer_to_hex(tbs.serial_number.as_bytes()),
        not_before: tbs.validity.not_before.to_string(),
        not_after: tbs.validity.not_after.to_string(),
    };
    info!(
        "Issued certificate for {} with serial number {} by {} valid from {} to {}",
        summary.subject, summary.serial, summary.issuer, summary.not_before, summary.not_after
    );
    Ok(summary)
}

#[test]
fn hex_rendering() {
    assert_eq!("00A1FF", buffer_to_hex(&[0x00, 0xa1, 0xff]));
    assert_eq!("", buffer_to_hex(&[]));
}

#[test]
fn describe_garbage() {
    assert!(matches!(
        describe_certificate("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n"),
        Err(Error::Retrieval(_))
    ));
    assert!(matches!(
        describe_certificate("not a certificate"),
        Err(Error::Retrieval(_))
    ));
}
