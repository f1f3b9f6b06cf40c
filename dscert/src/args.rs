//! Command line arguments for the dscert utility

use clap::{ArgGroup, Parser};

/// The `dscert` utility generates a CSR for an asymmetric key held in AWS KMS, submits the CSR to
/// AWS Private CA to obtain an ISO mDL document signing certificate and prints the certificate.
///
/// The certificate includes an Issuer Alternative Name extension carrying the given email address
/// and/or URI. Use `--issuer-alt-name` to print the base64-encoded extension value without
/// contacting AWS.
///
/// ```text
/// dscert -e a@b.gov.uk -k alias/document-signer -n "Document Signer" \
///   -c arn:aws:acm-pca:eu-west-2:111122223333:certificate-authority/<id>
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("issuer_alt_name_value")
        .required(true)
        .multiple(true)
        .args(["issueraltname_email", "issueraltname_uri"]),
))]
pub struct DsCertArgs {
    /// Email address to include in the Issuer Alternative Name
    #[arg(short = 'e', long, alias = "email", value_name = "EMAIL")]
    pub issueraltname_email: Option<String>,

    /// URI to include in the Issuer Alternative Name
    #[arg(short = 'u', long, alias = "uri", value_name = "URI")]
    pub issueraltname_uri: Option<String>,

    /// ARN or alias of the KMS key used to sign the CSR
    #[arg(short, long, required_unless_present = "issuer_alt_name")]
    pub kms_arn: Option<String>,

    /// ARN of the AWS Private CA that issues the certificate
    #[arg(short = 'c', long = "ca", value_name = "CA_ARN", required_unless_present_any = ["issuer_alt_name", "csr_only"])]
    pub ca_arn: Option<String>,

    /// Common name to include in the certificate subject
    #[arg(short = 'n', long, required_unless_present = "issuer_alt_name")]
    pub common_name: Option<String>,

    /// Print the Issuer Alternative Name extension value and exit
    #[arg(short, long)]
    pub issuer_alt_name: bool,

    /// Print the PEM-encoded CSR and exit without contacting the CA
    #[arg(long, conflicts_with = "issuer_alt_name")]
    pub csr_only: bool,

    /// Print the CA certificate chain after the certificate
    #[arg(long)]
    pub include_chain: bool,

    /// Two letter country code to include in the certificate subject
    #[arg(short = 'C', long)]
    pub country: Option<String>,

    /// Certificate lifetime in days
    #[arg(long, value_name = "DAYS")]
    pub validity_days: Option<i64>,

    /// AWS region
    #[arg(long)]
    pub region: Option<String>,

    /// AWS profile
    #[arg(long)]
    pub profile: Option<String>,

    /// JSON file containing issuance settings
    #[arg(short, long)]
    pub settings: Option<String>,

    /// Full path and filename of YAML-formatted configuration file for log4rs logging mechanism.
    /// See https://docs.rs/log4rs/latest/log4rs/ for details.
    #[arg(short, long)]
    pub logging_config: Option<String>,

    /// Log output to the console
    #[arg(long)]
    pub log_to_console: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn issuer_alt_name_only() {
        let args = DsCertArgs::try_parse_from(["dscert", "-i", "--email", "a@b.gov.uk"]).unwrap();
        assert!(args.issuer_alt_name);
        assert_eq!(Some("a@b.gov.uk".to_string()), args.issueraltname_email);
        assert!(args.kms_arn.is_none());
    }

    #[test]
    fn email_or_uri_required() {
        let e = DsCertArgs::try_parse_from(["dscert", "-i"]).unwrap_err();
        assert_eq!(ErrorKind::MissingRequiredArgument, e.kind());
        assert_eq!(2, e.exit_code());

        let e = DsCertArgs::try_parse_from([
            "dscert", "-k", "alias/ds", "-c", "arn:ca", "-n", "Document Signer",
        ])
        .unwrap_err();
        assert_eq!(2, e.exit_code());
    }

    #[test]
    fn full_issuance() {
        let args = DsCertArgs::try_parse_from([
            "dscert",
            "--issueraltname-email",
            "a@b.gov.uk",
            "--issueraltname-uri",
            "https://b.gov.uk",
            "-k",
            "alias/ds",
            "-c",
            "arn:ca",
            "-n",
            "Document Signer",
        ])
        .unwrap();
        assert_eq!(Some("https://b.gov.uk".to_string()), args.issueraltname_uri);
        assert_eq!(Some("arn:ca".to_string()), args.ca_arn);
        assert!(!args.csr_only);
    }

    #[test]
    fn kms_and_ca_required_for_issuance() {
        let e = DsCertArgs::try_parse_from(["dscert", "-e", "a@b.gov.uk", "-n", "Document Signer"])
            .unwrap_err();
        assert_eq!(ErrorKind::MissingRequiredArgument, e.kind());

        let args = DsCertArgs::try_parse_from([
            "dscert",
            "-e",
            "a@b.gov.uk",
            "-k",
            "alias/ds",
            "-n",
            "Document Signer",
            "--csr-only",
        ])
        .unwrap();
        assert!(args.ca_arn.is_none());
    }
}
