//! Submission of certification requests to a certificate authority and retrieval of the resulting
//! certificates

use std::time::Duration;

use log::{debug, error, info};

use const_oid::ObjectIdentifier;

use crate::{
    settings::IssuanceSettings, Error, Result, BLANK_END_ENTITY_TEMPLATE_ARN,
    DEFAULT_CA_SIGNING_ALGORITHM, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_VALIDITY_DAYS, ID_KP_MDL_DS,
};

/// Units in which a certificate validity period is expressed
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValidityUnit {
    Days,
    Months,
    Years,
}

impl ValidityUnit {
    /// Name of the unit as understood by AWS Private CA
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidityUnit::Days => "DAYS",
            ValidityUnit::Months => "MONTHS",
            ValidityUnit::Years => "YEARS",
        }
    }
}

/// Validity period requested for an issued certificate
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CertificateValidity {
    pub value: i64,
    pub unit: ValidityUnit,
}

impl CertificateValidity {
    /// Validity period of `days` days
    pub fn days(days: i64) -> Self {
        Self {
            value: days,
            unit: ValidityUnit::Days,
        }
    }
}

impl Default for CertificateValidity {
    fn default() -> Self {
        Self::days(DEFAULT_VALIDITY_DAYS)
    }
}

/// Extension whose DER-encoded value is supplied verbatim as base64
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CustomExtension {
    pub oid: ObjectIdentifier,
    /// Base64 encoding of the DER-encoded extension value
    pub value: String,
    pub critical: bool,
}

/// Extensions the certificate authority is asked to place in the issued certificate
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DocumentSignerExtensions {
    /// Assert digitalSignature in the key usage extension
    pub digital_signature: bool,
    pub extended_key_usages: Vec<ObjectIdentifier>,
    pub custom_extensions: Vec<CustomExtension>,
}

impl DocumentSignerExtensions {
    /// Extensions for an ISO mDL document signer: digitalSignature key usage, the mDL document signer
    /// extended key usage and an IssuerAltName carried as a custom extension.
    pub fn mdl(issuer_alt_name: &str) -> Self {
        Self {
            digital_signature: true,
            extended_key_usages: vec![*ID_KP_MDL_DS],
            custom_extensions: vec![CustomExtension {
                oid: const_oid::db::rfc5912::ID_CE_ISSUER_ALT_NAME,
                value: issuer_alt_name.to_string(),
                critical: false,
            }],
        }
    }
}

/// Everything the certificate authority needs to issue a certificate
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IssuanceRequest {
    pub ca_arn: String,
    /// PEM-encoded CSR
    pub csr_pem: String,
    pub template_arn: String,
    /// Algorithm the certificate authority uses to sign, i.e., SHA256WITHECDSA
    pub signing_algorithm: String,
    pub validity: CertificateValidity,
    pub extensions: DocumentSignerExtensions,
}

impl IssuanceRequest {
    /// Prepares a request for an mDL document signing certificate using values from `settings`
    pub fn document_signer(
        ca_arn: &str,
        csr_pem: &str,
        issuer_alt_name: &str,
        settings: &IssuanceSettings,
    ) -> Self {
        Self {
            ca_arn: ca_arn.to_string(),
            csr_pem: csr_pem.to_string(),
            template_arn: settings.template_arn.clone(),
            signing_algorithm: settings.signing_algorithm.clone(),
            validity: CertificateValidity::days(settings.validity_days),
            extensions: DocumentSignerExtensions::mdl(issuer_alt_name),
        }
    }
}

impl Default for IssuanceRequest {
    fn default() -> Self {
        Self {
            ca_arn: String::new(),
            csr_pem: String::new(),
            template_arn: BLANK_END_ENTITY_TEMPLATE_ARN.clone(),
            signing_algorithm: DEFAULT_CA_SIGNING_ALGORITHM.to_string(),
            validity: CertificateValidity::default(),
            extensions: DocumentSignerExtensions::default(),
        }
    }
}

/// Certificate returned by the certificate authority
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IssuedCertificate {
    /// PEM-encoded certificate
    pub certificate: String,
    /// PEM-encoded chain of CA certificates, if returned
    pub certificate_chain: Option<String>,
}

/// Result of a single attempt to fetch an issued certificate
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchOutcome {
    /// Issuance has not finished. The fetch may be retried.
    InProgress,
    /// Issuance finished
    Ready(IssuedCertificate),
    /// Any other failure. Not retried.
    Failed(String),
}

/// Issue and fetch capabilities of a certificate authority.
///
/// Implementations are expected to block until the service responds.
pub trait CertificateAuthority {
    /// Submits `request` and returns the ARN of the certificate being issued.
    /// Fails with [Error::Issuance] if the request is rejected.
    fn issue_certificate(&self, request: &IssuanceRequest) -> Result<String>;

    /// Makes one attempt to fetch the certificate identified by `certificate_arn`
    fn get_certificate(&self, ca_arn: &str, certificate_arn: &str) -> FetchOutcome;
}

/// Submits `request` to `ca` and returns the ARN of the certificate being issued.
///
/// Rejections are terminal and are not retried.
pub fn issue<C: CertificateAuthority + ?Sized>(ca: &C, request: &IssuanceRequest) -> Result<String> {
    if request.ca_arn.is_empty() {
        return Err(Error::Validation("CA ARN must be specified".to_string()));
    }
    if request.csr_pem.is_empty() {
        return Err(Error::Validation("CSR must be specified".to_string()));
    }

    info!(
        "Requesting certificate from {} using template {}",
        request.ca_arn, request.template_arn
    );
    match ca.issue_certificate(request) {
        Ok(arn) if arn.is_empty() => {
            error!("Certificate authority accepted request but returned no certificate ARN");
            Err(Error::Issuance(
                "no certificate ARN was returned".to_string(),
            ))
        }
        Ok(arn) => {
            info!("Certificate request accepted: {arn}");
            Ok(arn)
        }
        Err(Error::Issuance(e)) => {
            error!("Certificate authority rejected request: {e}");
            Err(Error::Issuance(e))
        }
        Err(Error::Build(e)) => {
            error!("Failed to prepare certificate request: {e}");
            Err(Error::Build(e))
        }
        Err(e) => {
            error!("Failed to submit certificate request: {e}");
            Err(Error::Issuance(e.to_string()))
        }
    }
}

/// Repeatedly fetches an issued certificate, waiting a fixed interval each time the certificate
/// authority reports that issuance is still in progress.
///
/// There is no bound on the number of attempts.
pub struct PollingRetriever<W = fn(Duration)> {
    interval: Duration,
    wait: W,
}

impl PollingRetriever {
    /// Create new PollingRetriever that sleeps the calling thread for `interval` between attempts
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            wait: std::thread::sleep,
        }
    }
}

impl Default for PollingRetriever {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS))
    }
}

impl<W: FnMut(Duration)> PollingRetriever<W> {
    /// Replaces the function used to wait between attempts
    pub fn with_wait<V: FnMut(Duration)>(self, wait: V) -> PollingRetriever<V> {
        PollingRetriever {
            interval: self.interval,
            wait,
        }
    }

    /// Returns the interval waited between attempts
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetches the certificate identified by `certificate_arn`, waiting while issuance is in progress.
    /// Fails with [Error::Retrieval] on any other failure.
    pub fn retrieve<C: CertificateAuthority + ?Sized>(
        &mut self,
        ca: &C,
        ca_arn: &str,
        certificate_arn: &str,
    ) -> Result<IssuedCertificate> {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match ca.get_certificate(ca_arn, certificate_arn) {
                FetchOutcome::Ready(cert) => {
                    info!("Retrieved {certificate_arn} after {attempts} attempt(s)");
                    return Ok(cert);
                }
                FetchOutcome::InProgress => {
                    debug!(
                        "Issuance of {certificate_arn} in progress. Retrying in {:?}.",
                        self.interval
                    );
                    (self.wait)(self.interval);
                }
                FetchOutcome::Failed(e) => {
                    error!("Failed to retrieve {certificate_arn}: {e}");
                    return Err(Error::Retrieval(e));
                }
            }
        }
    }
}

//------------------------------------------------------------------------------------
// Unit tests
//------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    const CA_ARN: &str = "arn:aws:acm-pca:eu-west-2:111122223333:certificate-authority/ca";
    const CERT_ARN: &str =
        "arn:aws:acm-pca:eu-west-2:111122223333:certificate-authority/ca/certificate/01";

    /// Returns `in_progress` in-progress responses followed by `last`
    struct FakeCa {
        in_progress: Cell<usize>,
        last: FetchOutcome,
        issued: RefCell<Vec<IssuanceRequest>>,
        reject: Option<Error>,
    }

    impl FakeCa {
        fn new(in_progress: usize, last: FetchOutcome) -> Self {
            Self {
                in_progress: Cell::new(in_progress),
                last,
                issued: RefCell::new(vec![]),
                reject: None,
            }
        }
    }

    impl CertificateAuthority for FakeCa {
        fn issue_certificate(&self, request: &IssuanceRequest) -> Result<String> {
            if let Some(e) = &self.reject {
                return Err(e.clone());
            }
            self.issued.borrow_mut().push(request.clone());
            Ok(CERT_ARN.to_string())
        }

        fn get_certificate(&self, ca_arn: &str, certificate_arn: &str) -> FetchOutcome {
            assert_eq!(CA_ARN, ca_arn);
            assert_eq!(CERT_ARN, certificate_arn);
            let remaining = self.in_progress.get();
            if remaining > 0 {
                self.in_progress.set(remaining - 1);
                FetchOutcome::InProgress
            } else {
                self.last.clone()
            }
        }
    }

    fn issued() -> IssuedCertificate {
        IssuedCertificate {
            certificate: "-----BEGIN CERTIFICATE-----".to_string(),
            certificate_chain: None,
        }
    }

    #[test]
    fn waits_once_per_in_progress_response() {
        let ca = FakeCa::new(3, FetchOutcome::Ready(issued()));
        let mut waits = vec![];
        let cert = PollingRetriever::new(Duration::from_secs(2))
            .with_wait(|d| waits.push(d))
            .retrieve(&ca, CA_ARN, CERT_ARN)
            .unwrap();
        assert_eq!(issued(), cert);
        assert_eq!(vec![Duration::from_secs(2); 3], waits);
    }

    #[test]
    fn ready_without_waiting() {
        let ca = FakeCa::new(0, FetchOutcome::Ready(issued()));
        let mut waits = 0;
        assert!(PollingRetriever::default()
            .with_wait(|_| waits += 1)
            .retrieve(&ca, CA_ARN, CERT_ARN)
            .is_ok());
        assert_eq!(0, waits);
    }

    #[test]
    fn failure_is_not_retried() {
        let ca = FakeCa::new(0, FetchOutcome::Failed("ResourceNotFoundException".to_string()));
        let mut waits = 0;
        let r = PollingRetriever::default()
            .with_wait(|_| waits += 1)
            .retrieve(&ca, CA_ARN, CERT_ARN);
        assert_eq!(
            Err(Error::Retrieval("ResourceNotFoundException".to_string())),
            r
        );
        assert_eq!(0, waits);
    }

    #[test]
    fn failure_after_in_progress() {
        let ca = FakeCa::new(2, FetchOutcome::Failed("AccessDenied".to_string()));
        let mut waits = 0;
        assert!(matches!(
            PollingRetriever::default()
                .with_wait(|_| waits += 1)
                .retrieve(&ca, CA_ARN, CERT_ARN),
            Err(Error::Retrieval(_))
        ));
        assert_eq!(2, waits);
    }

    #[test]
    fn document_signer_request() {
        let settings = IssuanceSettings {
            validity_days: 365,
            ..Default::default()
        };
        let request =
            IssuanceRequest::document_signer(CA_ARN, "csr", "MAyBCmFAYi5nb3YudWs=", &settings);
        assert_eq!(*BLANK_END_ENTITY_TEMPLATE_ARN, request.template_arn);
        assert_eq!("SHA256WITHECDSA", request.signing_algorithm);
        assert_eq!(CertificateValidity::days(365), request.validity);
        assert!(request.extensions.digital_signature);
        assert_eq!(
            vec![ObjectIdentifier::new_unwrap("1.0.18013.5.1.2")],
            request.extensions.extended_key_usages
        );
        assert_eq!(
            vec![CustomExtension {
                oid: ObjectIdentifier::new_unwrap("2.5.29.18"),
                value: "MAyBCmFAYi5nb3YudWs=".to_string(),
                critical: false,
            }],
            request.extensions.custom_extensions
        );
    }

    #[test]
    fn issue_passes_request_through() {
        let ca = FakeCa::new(0, FetchOutcome::Ready(issued()));
        let request = IssuanceRequest {
            ca_arn: CA_ARN.to_string(),
            csr_pem: "csr".to_string(),
            extensions: DocumentSignerExtensions::mdl("MAyBCmFAYi5nb3YudWs="),
            ..Default::default()
        };
        assert_eq!(CERT_ARN, issue(&ca, &request).unwrap());
        assert_eq!(vec![request], *ca.issued.borrow());
    }

    #[test]
    fn issue_rejected() {
        let mut ca = FakeCa::new(0, FetchOutcome::Ready(issued()));
        ca.reject = Some(Error::Issuance("MalformedCSRException".to_string()));
        let request = IssuanceRequest {
            ca_arn: CA_ARN.to_string(),
            csr_pem: "csr".to_string(),
            ..Default::default()
        };
        assert!(matches!(issue(&ca, &request), Err(Error::Issuance(_))));
    }

    #[test]
    fn local_build_failure_is_not_a_rejection() {
        let mut ca = FakeCa::new(0, FetchOutcome::Ready(issued()));
        ca.reject = Some(Error::Build("failed to prepare validity".to_string()));
        let request = IssuanceRequest {
            ca_arn: CA_ARN.to_string(),
            csr_pem: "csr".to_string(),
            ..Default::default()
        };
        assert_eq!(
            Err(Error::Build("failed to prepare validity".to_string())),
            issue(&ca, &request)
        );

        ca.reject = Some(Error::Signing("unexpected".to_string()));
        assert!(matches!(issue(&ca, &request), Err(Error::Issuance(_))));
    }

    #[test]
    fn issue_requires_ca_and_csr() {
        let ca = FakeCa::new(0, FetchOutcome::Ready(issued()));
        assert!(matches!(
            issue(&ca, &IssuanceRequest::default()),
            Err(Error::Validation(_))
        ));
        assert!(ca.issued.borrow().is_empty());
    }
}
