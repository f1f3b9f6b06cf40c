//! Preparation of PKCS #10 certification requests signed by a key held in a key management service

use log::{debug, error, info};

use const_oid::db::rfc4519::{COMMON_NAME, COUNTRY_NAME};
use der::{
    asn1::{BitString, PrintableStringRef, SetOfVec, Utf8StringRef},
    pem::LineEnding,
    Any, Encode, EncodePem,
};
use signature::Signer;
use spki::{DynSignatureAlgorithmIdentifier, SignatureBitStringEncoding};
use x509_cert::{
    attr::AttributeTypeAndValue,
    name::{Name, RdnSequence, RelativeDistinguishedName},
    request::{CertReq, CertReqInfo},
};

use crate::{
    kms::{KeyManagement, KmsSigner},
    Error, Result,
};

/// Naming attributes placed in the subject of the CSR
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subject {
    /// Common name, must not be empty
    pub common_name: String,
    /// Two letter country code
    pub country: String,
}

impl Subject {
    /// Create new Subject
    pub fn new(common_name: &str, country: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            country: country.to_string(),
        }
    }

    /// Returns a Name of the form C=<country>, CN=<common name>. The country is encoded as a
    /// PrintableString and the common name as a UTF8String.
    pub fn to_name(&self) -> Result<Name> {
        if self.common_name.is_empty() {
            error!("CSR subject must include a non-empty common name");
            return Err(Error::Build("common name must not be empty".to_string()));
        }
        if self.country.len() != 2 {
            error!(
                "CSR subject country must be a two letter code: {}",
                self.country
            );
            return Err(Error::Build(format!(
                "country must be a two letter code, not {}",
                self.country
            )));
        }

        let country = PrintableStringRef::new(&self.country).map_err(|e| {
            Error::Build(format!("country {} is not printable: {e}", self.country))
        })?;
        let common_name = Utf8StringRef::new(&self.common_name)?;

        let rdns = vec![
            single_attribute_rdn(COUNTRY_NAME, Any::encode_from(&country)?)?,
            single_attribute_rdn(COMMON_NAME, Any::encode_from(&common_name)?)?,
        ];
        Ok(RdnSequence(rdns))
    }
}

/// Returns an RDN containing a single attribute
fn single_attribute_rdn(
    oid: const_oid::ObjectIdentifier,
    value: Any,
) -> Result<RelativeDistinguishedName> {
    let atav = AttributeTypeAndValue { oid, value };
    Ok(RelativeDistinguishedName(SetOfVec::try_from(vec![atav])?))
}

/// Generates a signature over the presented data using the provided signer and renders it as a BitString.
///
/// Errors raised by the key management service are returned as they were raised.
fn sign_request<K: KeyManagement + ?Sized>(
    signer: &KmsSigner<'_, K>,
    data: &[u8],
) -> Result<BitString> {
    match signer.try_sign(data) {
        Ok(sig) => match sig.to_bitstring() {
            Ok(res) => Ok(res),
            Err(e) => {
                error!("Failed to encode signature as a BitString: {e:?}");
                Err(Error::Asn1(e))
            }
        },
        Err(e) => {
            let inner = std::error::Error::source(&e).and_then(|s| s.downcast_ref::<Error>());
            match inner {
                Some(inner) => Err(inner.clone()),
                None => Err(Error::Signing(e.to_string())),
            }
        }
    }
}

/// Builds a CSR for `subject` whose public key is read from and whose signature is generated by the
/// key identified by `key_id`.
///
/// The subject is validated before any call is made to the key management service. Exactly one
/// signing request is sent to the key management service.
pub fn build_csr<K: KeyManagement + ?Sized>(kms: &K, subject: &Subject, key_id: &str) -> Result<CertReq> {
    let name = subject.to_name()?;
    let signer = KmsSigner::new(kms, key_id)?;
    build_csr_with_signer(&signer, name)
}

/// Builds a CSR for `subject` using a previously prepared [KmsSigner]
pub fn build_csr_with_signer<K: KeyManagement + ?Sized>(
    signer: &KmsSigner<'_, K>,
    subject: Name,
) -> Result<CertReq> {
    let cert_req_info = CertReqInfo {
        version: Default::default(),
        subject,
        public_key: signer.public_key().clone(),
        attributes: Default::default(),
    };

    let enc_cri = match cert_req_info.to_der() {
        Ok(enc_cri) => enc_cri,
        Err(e) => {
            error!("Failed to encode CertReqInfo: {e:?}");
            return Err(Error::Build(format!("failed to encode request: {e}")));
        }
    };

    let algorithm = signer
        .signature_algorithm_identifier()
        .map_err(|e| Error::Build(format!("failed to prepare signature algorithm: {e}")))?;

    let signature = sign_request(signer, &enc_cri)?;
    info!("Signed CSR for {}", cert_req_info.subject);

    Ok(CertReq {
        info: cert_req_info,
        algorithm,
        signature,
    })
}

/// Renders a CSR as PEM text with a CERTIFICATE REQUEST label
pub fn pem_armor_csr(csr: &CertReq) -> Result<String> {
    match csr.to_pem(LineEnding::LF) {
        Ok(pem) => {
            debug!("CSR: {pem}");
            Ok(pem)
        }
        Err(e) => {
            error!("Failed to encode CSR as PEM: {e:?}");
            Err(Error::Build(format!("failed to encode CSR as PEM: {e}")))
        }
    }
}

//------------------------------------------------------------------------------------
// Unit tests
//------------------------------------------------------------------------------------
#[test]
fn subject_name() {
    let name = Subject::new("Test Certificate", "UK").to_name().unwrap();
    assert_eq!(2, name.0.len());
    assert_eq!(COUNTRY_NAME, name.0[0].0.iter().next().unwrap().oid);
    assert_eq!(COMMON_NAME, name.0[1].0.iter().next().unwrap().oid);
    let s = name.to_string();
    assert!(s.contains("CN=Test Certificate"));
    assert!(s.contains("C=UK"));
}

#[test]
fn subject_name_incomplete() {
    assert!(matches!(
        Subject::new("", "UK").to_name(),
        Err(Error::Build(_))
    ));
    assert!(matches!(
        Subject::new("Test Certificate", "GBR").to_name(),
        Err(Error::Build(_))
    ));
}
