#![doc = include_str!("../README.md")]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use core::fmt;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use dscertlib::{
    aws::AwsContext,
    ca::{issue, CertificateAuthority, IssuanceRequest, PollingRetriever},
    csr::{build_csr_with_signer, pem_armor_csr, Subject},
    issuer_alt_name::{build_issuer_alt_name, decode_issuer_alt_name, general_name_to_string},
    kms::{KeyManagement, KmsSigner},
    settings::{IssuanceSettings, SettingsOverrides},
    utils::describe_certificate,
    Error,
};

mod args;
mod utils;

use args::DsCertArgs;
use utils::configure_logging;

/// Steps of the issuance flow, used to give context to failures
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Stage {
    /// Loading AWS configuration and resolving credentials
    Connect,
    /// Reading the settings file and applying command line overrides
    Settings,
    /// Building the Issuer Alternative Name extension value
    IssuerAltName,
    /// Preparing the subject and public key and encoding the CSR
    BuildCsr,
    /// Obtaining the CSR signature from KMS
    SignCsr,
    /// Submitting the CSR to the certificate authority
    Issue,
    /// Fetching and parsing the issued certificate
    Retrieve,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connect => {
                "connecting to AWS - please make sure you have valid credentials available"
            }
            Stage::Settings => "loading settings",
            Stage::IssuerAltName => "generating the Issuer Alternative Name",
            Stage::BuildCsr => "building the CSR",
            Stage::SignCsr => "signing the CSR",
            Stage::Issue => "with generating the certificate",
            Stage::Retrieve => "retrieving the certificate",
        })
    }
}

/// Failure at a given stage
#[derive(Debug)]
struct Failure {
    /// Step that failed
    stage: Stage,
    /// Cause reported by dscertlib
    err: Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "An error occurred {}: {}", self.stage, self.err)
    }
}

/// Attaches a [Stage] to a library error
trait AtStage<T> {
    /// Returns the error, if any, as a [Failure] at `stage`
    fn at(self, stage: Stage) -> Result<T, Failure>;
}

impl<T> AtStage<T> for dscertlib::Result<T> {
    fn at(self, stage: Stage) -> Result<T, Failure> {
        self.map_err(|err| Failure { stage, err })
    }
}

/// Returns the value of an option that is required at the given stage
fn required<'a>(value: &'a Option<String>, name: &str, stage: Stage) -> Result<&'a str, Failure> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Failure {
            stage,
            err: Error::Validation(format!("--{name} must be specified")),
        }),
    }
}

/// Stage for a failure while producing a signed CSR. Only KMS signing errors are signing failures.
fn csr_stage(err: &Error) -> Stage {
    match err {
        Error::Signing(_) => Stage::SignCsr,
        _ => Stage::BuildCsr,
    }
}

/// Reads settings from the file named by `--settings`, if any, then applies command line overrides
fn load_settings(args: &DsCertArgs) -> dscertlib::Result<IssuanceSettings> {
    let settings = match &args.settings {
        Some(path) => IssuanceSettings::load(path)?,
        None => IssuanceSettings::default(),
    };
    settings.with_overrides(&SettingsOverrides {
        country: args.country.clone(),
        validity_days: args.validity_days,
        region: args.region.clone(),
        profile: args.profile.clone(),
    })
}

/// Executes the flow described by `args` and returns the text to print on success
fn run(args: &DsCertArgs) -> Result<String, Failure> {
    let settings = load_settings(args).at(Stage::Settings)?;

    info!("Generating the Issuer Alternative Name");
    let ian = build_issuer_alt_name(
        args.issueraltname_email.as_deref(),
        args.issueraltname_uri.as_deref(),
    )
    .at(Stage::IssuerAltName)?;
    if let Ok(names) = decode_issuer_alt_name(&ian) {
        let names: Vec<String> = names.iter().map(general_name_to_string).collect();
        info!("Issuer Alternative Name: {}", names.join(", "));
    }
    if args.issuer_alt_name {
        return Ok(ian);
    }

    info!("Connecting to AWS");
    let aws = AwsContext::connect(settings.region.as_deref(), settings.profile.as_deref())
        .at(Stage::Connect)?;
    issue_flow(
        args,
        &settings,
        &ian,
        &aws.kms(),
        &aws.private_ca(),
        std::thread::sleep,
    )
}

/// Generates a CSR using `kms` and, unless `--csr-only` was given, obtains a certificate from `ca`.
/// `wait` is called between attempts to fetch a certificate that is still being issued.
fn issue_flow<K, C, W>(
    args: &DsCertArgs,
    settings: &IssuanceSettings,
    ian: &str,
    kms: &K,
    ca: &C,
    wait: W,
) -> Result<String, Failure>
where
    K: KeyManagement + ?Sized,
    C: CertificateAuthority + ?Sized,
    W: FnMut(Duration),
{
    let kms_arn = required(&args.kms_arn, "kms-arn", Stage::BuildCsr)?;
    let common_name = required(&args.common_name, "common-name", Stage::BuildCsr)?;
    let ca_arn = if args.csr_only {
        None
    } else {
        Some(required(&args.ca_arn, "ca", Stage::Issue)?)
    };

    info!("Building the CSR");
    let subject = Subject::new(common_name, &settings.country)
        .to_name()
        .at(Stage::BuildCsr)?;
    let signer = KmsSigner::new(kms, kms_arn).at(Stage::BuildCsr)?;

    info!("Signing the CSR");
    let csr = build_csr_with_signer(&signer, subject).map_err(|err| Failure {
        stage: csr_stage(&err),
        err,
    })?;
    let csr_pem = pem_armor_csr(&csr).at(Stage::BuildCsr)?;

    let ca_arn = match ca_arn {
        Some(ca_arn) => ca_arn,
        None => return Ok(csr_pem.trim_end().to_string()),
    };

    info!("Generating the certificate");
    let request = IssuanceRequest::document_signer(ca_arn, &csr_pem, ian, settings);
    let cert_arn = issue(ca, &request).at(Stage::Issue)?;

    info!("Retrieving the certificate");
    let issued = PollingRetriever::new(settings.poll_interval())
        .with_wait(wait)
        .retrieve(ca, ca_arn, &cert_arn)
        .at(Stage::Retrieve)?;
    describe_certificate(&issued.certificate).at(Stage::Retrieve)?;

    let mut output = issued.certificate.trim_end().to_string();
    if args.include_chain {
        match &issued.certificate_chain {
            Some(chain) => {
                output.push('\n');
                output.push_str(chain.trim_end());
            }
            None => info!("No certificate chain was returned"),
        }
    }
    Ok(output)
}

/// Point of entry for `dscert` application.
///
/// See [DsCertArgs] for usage details.
fn main() {
    let args = DsCertArgs::parse();
    configure_logging(&args);

    match run(&args) {
        Ok(output) => println!("{output}"),
        Err(failure) => {
            error!("{failure}");
            println!("{failure}");
            std::process::exit(1);
        }
    }
}
