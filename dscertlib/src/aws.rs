//! AWS implementations of [KeyManagement] and [CertificateAuthority].
//!
//! The AWS SDK is asynchronous while the issuance flow is sequential. [AwsContext] owns a
//! current-thread tokio runtime and each adapter blocks on it for the duration of a single call.

use std::{fmt, sync::Arc};

use log::{debug, error, info};
use tokio::runtime::{Builder, Runtime};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_acmpca::{
    error::SdkError,
    operation::get_certificate::{GetCertificateError, GetCertificateOutput},
    types::{
        ApiPassthrough, CustomExtension as PcaCustomExtension, ExtendedKeyUsage, Extensions,
        KeyUsage, SigningAlgorithm, Validity, ValidityPeriodType,
    },
};
use aws_sdk_kms::{
    error::DisplayErrorContext,
    primitives::Blob,
    types::{MessageType, SigningAlgorithmSpec},
};

use crate::{
    ca::{
        CertificateAuthority, CertificateValidity, DocumentSignerExtensions, FetchOutcome,
        IssuanceRequest, IssuedCertificate,
    },
    kms::{KeyManagement, KmsPublicKey, SigningScheme},
    Error, Result,
};

/// Runtime and SDK configuration shared by the AWS adapters
pub struct AwsContext {
    runtime: Arc<Runtime>,
    config: SdkConfig,
}

impl AwsContext {
    /// Loads AWS configuration from the environment, optionally overriding region and profile, and
    /// confirms that credentials can be resolved.
    ///
    /// Fails with [Error::Credentials] when no credentials are available.
    pub fn connect(region: Option<&str>, profile: Option<&str>) -> Result<Self> {
        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to create runtime: {e}");
                return Err(Error::Credentials(format!("failed to create runtime: {e}")));
            }
        };

        let config = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region.to_string()));
            }
            if let Some(profile) = profile {
                loader = loader.profile_name(profile);
            }
            loader.load().await
        });

        let provider = match config.credentials_provider() {
            Some(provider) => provider,
            None => {
                error!("No AWS credentials provider is configured");
                return Err(Error::Credentials(
                    "no credentials provider is configured".to_string(),
                ));
            }
        };
        if let Err(e) = runtime.block_on(provider.provide_credentials()) {
            error!("Failed to resolve AWS credentials: {e}");
            return Err(Error::Credentials(format!(
                "{}",
                DisplayErrorContext(&e)
            )));
        }

        match config.region() {
            Some(region) => info!("Connected to AWS in {region}"),
            None => info!("Connected to AWS with no region configured"),
        }

        Ok(Self {
            runtime: Arc::new(runtime),
            config,
        })
    }

    /// Returns a KMS adapter that shares this context's runtime
    pub fn kms(&self) -> AwsKms {
        AwsKms {
            runtime: self.runtime.clone(),
            client: aws_sdk_kms::Client::new(&self.config),
        }
    }

    /// Returns an AWS Private CA adapter that shares this context's runtime
    pub fn private_ca(&self) -> AwsPrivateCa {
        AwsPrivateCa {
            runtime: self.runtime.clone(),
            client: aws_sdk_acmpca::Client::new(&self.config),
        }
    }
}

/// [KeyManagement] implementation backed by AWS KMS
#[derive(Clone)]
pub struct AwsKms {
    runtime: Arc<Runtime>,
    client: aws_sdk_kms::Client,
}

impl KeyManagement for AwsKms {
    fn get_public_key(&self, key_id: &str) -> Result<KmsPublicKey> {
        debug!("Reading public key for {key_id}");
        let resp = self
            .runtime
            .block_on(self.client.get_public_key().key_id(key_id).send())
            .map_err(|e| {
                error!("Failed to get public key for {key_id}: {}", DisplayErrorContext(&e));
                Error::Signing(format!("{}", DisplayErrorContext(&e)))
            })?;

        let public_key = match resp.public_key() {
            Some(pk) => pk.as_ref().to_vec(),
            None => {
                error!("KMS returned no public key for {key_id}");
                return Err(Error::Signing(format!("no public key returned for {key_id}")));
            }
        };
        let key_spec = match resp.key_spec() {
            Some(ks) => ks.as_str().to_string(),
            None => {
                error!("KMS returned no key spec for {key_id}");
                return Err(Error::Signing(format!("no key spec returned for {key_id}")));
            }
        };

        Ok(KmsPublicKey {
            public_key,
            key_spec,
            key_usage: resp.key_usage().map(|ku| ku.as_str().to_string()),
        })
    }

    fn sign(&self, key_id: &str, digest: &[u8], scheme: SigningScheme) -> Result<Vec<u8>> {
        let resp = self
            .runtime
            .block_on(
                self.client
                    .sign()
                    .key_id(key_id)
                    .message(Blob::new(digest.to_vec()))
                    .message_type(MessageType::Digest)
                    .signing_algorithm(SigningAlgorithmSpec::from(scheme.kms_name()))
                    .send(),
            )
            .map_err(|e| {
                error!("Failed to sign using {key_id}: {}", DisplayErrorContext(&e));
                Error::Signing(format!("{}", DisplayErrorContext(&e)))
            })?;

        match resp.signature() {
            Some(sig) => Ok(sig.as_ref().to_vec()),
            None => {
                error!("KMS returned no signature for {key_id}");
                Err(Error::Signing(format!("no signature returned for {key_id}")))
            }
        }
    }
}

/// Returns the API passthrough structure that asks AWS Private CA to include `extensions`
pub fn api_passthrough(extensions: &DocumentSignerExtensions) -> Result<ApiPassthrough> {
    let mut builder = Extensions::builder();
    if extensions.digital_signature {
        builder = builder.key_usage(KeyUsage::builder().digital_signature(true).build());
    }
    for eku in &extensions.extended_key_usages {
        builder = builder.extended_key_usage(
            ExtendedKeyUsage::builder()
                .extended_key_usage_object_identifier(eku.to_string())
                .build(),
        );
    }
    for ce in &extensions.custom_extensions {
        let custom = PcaCustomExtension::builder()
            .object_identifier(ce.oid.to_string())
            .value(ce.value.clone())
            .critical(ce.critical)
            .build()
            .map_err(|e| Error::Build(format!("failed to prepare custom extension: {e}")))?;
        builder = builder.custom_extensions(custom);
    }
    Ok(ApiPassthrough::builder().extensions(builder.build()).build())
}

/// Returns the validity structure understood by AWS Private CA
pub fn pca_validity(validity: &CertificateValidity) -> Result<Validity> {
    Validity::builder()
        .value(validity.value)
        .r#type(ValidityPeriodType::from(validity.unit.as_str()))
        .build()
        .map_err(|e| Error::Build(format!("failed to prepare validity: {e}")))
}

/// [CertificateAuthority] implementation backed by AWS Private CA
#[derive(Clone)]
pub struct AwsPrivateCa {
    runtime: Arc<Runtime>,
    client: aws_sdk_acmpca::Client,
}

impl CertificateAuthority for AwsPrivateCa {
    fn issue_certificate(&self, request: &IssuanceRequest) -> Result<String> {
        let passthrough = api_passthrough(&request.extensions)?;
        let validity = pca_validity(&request.validity)?;

        let resp = self
            .runtime
            .block_on(
                self.client
                    .issue_certificate()
                    .certificate_authority_arn(&request.ca_arn)
                    .csr(Blob::new(request.csr_pem.as_bytes()))
                    .signing_algorithm(SigningAlgorithm::from(request.signing_algorithm.as_str()))
                    .template_arn(&request.template_arn)
                    .validity(validity)
                    .api_passthrough(passthrough)
                    .send(),
            )
            .map_err(|e| Error::Issuance(format!("{}", DisplayErrorContext(&e))))?;

        match resp.certificate_arn() {
            Some(arn) => Ok(arn.to_string()),
            None => Err(Error::Issuance(
                "no certificate ARN was returned".to_string(),
            )),
        }
    }

    fn get_certificate(&self, ca_arn: &str, certificate_arn: &str) -> FetchOutcome {
        let result = self.runtime.block_on(
            self.client
                .get_certificate()
                .certificate_authority_arn(ca_arn)
                .certificate_arn(certificate_arn)
                .send(),
        );
        fetch_outcome(result)
    }
}

/// Classifies the result of a GetCertificate call. Only RequestInProgressException is reported as
/// [FetchOutcome::InProgress]. A response without a certificate is a failure.
pub fn fetch_outcome<R: fmt::Debug>(
    result: core::result::Result<GetCertificateOutput, SdkError<GetCertificateError, R>>,
) -> FetchOutcome {
    match result {
        Ok(resp) => match resp.certificate() {
            Some(cert) => FetchOutcome::Ready(IssuedCertificate {
                certificate: cert.to_string(),
                certificate_chain: resp.certificate_chain().map(|c| c.to_string()),
            }),
            None => FetchOutcome::Failed("no certificate was returned".to_string()),
        },
        Err(e) => {
            if let Some(se) = e.as_service_error() {
                if se.is_request_in_progress_exception() {
                    return FetchOutcome::InProgress;
                }
            }
            FetchOutcome::Failed(format!("{}", DisplayErrorContext(&e)))
        }
    }
}

//------------------------------------------------------------------------------------
// Unit tests
//------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::IssuanceSettings;

    #[test]
    fn passthrough_for_document_signer() {
        let request = IssuanceRequest::document_signer(
            "arn:aws:acm-pca:eu-west-2:111122223333:certificate-authority/ca",
            "csr",
            "MAyBCmFAYi5nb3YudWs=",
            &IssuanceSettings::default(),
        );
        let passthrough = api_passthrough(&request.extensions).unwrap();
        let extensions = passthrough.extensions().unwrap();

        assert_eq!(
            Some(true),
            extensions.key_usage().map(|ku| ku.digital_signature())
        );
        let ekus = extensions.extended_key_usage();
        assert_eq!(1, ekus.len());
        assert_eq!(
            Some("1.0.18013.5.1.2"),
            ekus[0].extended_key_usage_object_identifier()
        );
        let custom = extensions.custom_extensions();
        assert_eq!(1, custom.len());
        assert_eq!("2.5.29.18", custom[0].object_identifier());
        assert_eq!("MAyBCmFAYi5nb3YudWs=", custom[0].value());
        assert_eq!(Some(false), custom[0].critical());
    }

    #[test]
    fn in_progress_is_the_only_retryable_fetch_error() {
        use aws_sdk_acmpca::types::error::{RequestInProgressException, ResourceNotFoundException};

        let in_progress = SdkError::service_error(
            GetCertificateError::RequestInProgressException(
                RequestInProgressException::builder()
                    .message("The request is still in progress")
                    .build(),
            ),
            (),
        );
        assert_eq!(FetchOutcome::InProgress, fetch_outcome(Err(in_progress)));

        let not_found = SdkError::service_error(
            GetCertificateError::ResourceNotFoundException(
                ResourceNotFoundException::builder()
                    .message("Could not find certificate")
                    .build(),
            ),
            (),
        );
        assert!(matches!(
            fetch_outcome(Err(not_found)),
            FetchOutcome::Failed(_)
        ));

        let timeout: SdkError<GetCertificateError, ()> =
            SdkError::timeout_error("operation timed out");
        assert!(matches!(fetch_outcome(Err(timeout)), FetchOutcome::Failed(_)));
    }

    #[test]
    fn fetch_response_contents() {
        let ready = GetCertificateOutput::builder()
            .certificate("-----BEGIN CERTIFICATE-----")
            .certificate_chain("-----BEGIN CERTIFICATE-----chain")
            .build();
        assert_eq!(
            FetchOutcome::Ready(IssuedCertificate {
                certificate: "-----BEGIN CERTIFICATE-----".to_string(),
                certificate_chain: Some("-----BEGIN CERTIFICATE-----chain".to_string()),
            }),
            fetch_outcome::<()>(Ok(ready))
        );

        let empty = GetCertificateOutput::builder().build();
        assert!(matches!(
            fetch_outcome::<()>(Ok(empty)),
            FetchOutcome::Failed(_)
        ));
    }

    #[test]
    fn validity_in_days() {
        let validity = pca_validity(&CertificateValidity::days(1825)).unwrap();
        assert_eq!(1825, validity.value());
        assert_eq!(&ValidityPeriodType::Days, validity.r#type());
    }
}
