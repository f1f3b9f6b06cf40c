//! Construction of the Issuer Alternative Name extension value passed to the certificate authority

use log::{debug, error};

use base64ct::{Base64, Encoding};
use der::{asn1::Ia5String, Decode, Encode};
use x509_cert::ext::pkix::{name::GeneralName, IssuerAltName};

use crate::{Error, Result};

/// Returns `None` for absent or empty values so that `--issueraltname-email ""` is treated as absent
fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Takes a value destined for an rfc822Name or uniformResourceIdentifier and returns it as an IA5String
fn to_ia5(kind: &str, value: &str) -> Result<Ia5String> {
    Ia5String::new(value).map_err(|e| {
        error!("Failed to encode {kind} value {value} as an IA5String: {e:?}");
        Error::Build(format!("{kind} value {value} is not a valid IA5String: {e}"))
    })
}

/// Returns the general names for the Issuer Alternative Name in email-then-URI order.
///
/// Fails with [Error::Validation] when neither value is present.
pub fn issuer_alt_general_names(email: Option<&str>, uri: Option<&str>) -> Result<Vec<GeneralName>> {
    let email = present(email);
    let uri = present(uri);
    if email.is_none() && uri.is_none() {
        return Err(Error::Validation(
            "At least one of --email or --uri must be specified".to_string(),
        ));
    }

    let mut general_names = vec![];
    if let Some(email) = email {
        general_names.push(GeneralName::Rfc822Name(to_ia5("email", email)?));
    }
    if let Some(uri) = uri {
        general_names.push(GeneralName::UniformResourceIdentifier(to_ia5("uri", uri)?));
    }
    Ok(general_names)
}

/// Builds an IssuerAltName extension value from the given email address and/or URI and returns the
/// base64 encoding of its DER encoding.
///
/// The returned string is the form expected in the `Value` field of a custom extension submitted to
/// AWS Private CA.
pub fn build_issuer_alt_name(email: Option<&str>, uri: Option<&str>) -> Result<String> {
    let ian = IssuerAltName(issuer_alt_general_names(email, uri)?);
    let der_ian = match ian.to_der() {
        Ok(der_ian) => der_ian,
        Err(e) => {
            error!("Failed to encode IssuerAltName: {e:?}");
            return Err(Error::Build(format!("failed to encode IssuerAltName: {e}")));
        }
    };
    let b64 = Base64::encode_string(&der_ian);
    debug!("Prepared IssuerAltName: {b64}");
    Ok(b64)
}

/// Parses a base64-encoded IssuerAltName extension value and returns its general names
pub fn decode_issuer_alt_name(b64: &str) -> Result<Vec<GeneralName>> {
    let der_ian = Base64::decode_vec(b64)?;
    let ian = IssuerAltName::from_der(&der_ian)?;
    Ok(ian.0)
}

/// Renders a general name for log and diagnostic output
pub fn general_name_to_string(gn: &GeneralName) -> String {
    match gn {
        GeneralName::Rfc822Name(email) => format!("email:{email}"),
        GeneralName::UniformResourceIdentifier(uri) => format!("uri:{uri}"),
        other => format!("{other:?}"),
    }
}
