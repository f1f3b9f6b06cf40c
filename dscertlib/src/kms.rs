//! Provides the [KeyManagement] boundary to a key management service along with [KmsSigner], a
//! [Signer](https://docs.rs/signature/latest/signature/trait.Signer.html) implementation whose
//! private key never leaves the key management service.

use core::fmt;

use log::{debug, error, info};

use der::{asn1::BitString, Any, AnyRef, Decode};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::Signer;
use spki::{
    AlgorithmIdentifierOwned, DynSignatureAlgorithmIdentifier, SignatureBitStringEncoding,
    SubjectPublicKeyInfoOwned,
};

use crate::{Error, Result};

/// Public key information returned by a key management service for an asymmetric key
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KmsPublicKey {
    /// DER-encoded SubjectPublicKeyInfo
    pub public_key: Vec<u8>,
    /// Key spec as named by AWS KMS, i.e., ECC_NIST_P256
    pub key_spec: String,
    /// Key usage as named by AWS KMS, i.e., SIGN_VERIFY
    pub key_usage: Option<String>,
}

/// Remote signing capability of a key management service.
///
/// Implementations are expected to block until the service responds.
pub trait KeyManagement {
    /// Returns the public key and key spec associated with `key_id`
    fn get_public_key(&self, key_id: &str) -> Result<KmsPublicKey>;

    /// Signs a pre-computed `digest` using the key identified by `key_id` and returns the signature
    /// in the form the service emits it (DER-encoded Ecdsa-Sig-Value for ECDSA, raw for RSA).
    fn sign(&self, key_id: &str, digest: &[u8], scheme: SigningScheme) -> Result<Vec<u8>>;
}

/// Signature schemes available for keys held in KMS
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SigningScheme {
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
    RsaPkcs1v15Sha256,
}

impl SigningScheme {
    /// Selects the signature scheme for a KMS key spec. Fails with [Error::Signing] for key specs that
    /// cannot sign a CSR.
    pub fn for_key_spec(key_spec: &str) -> Result<Self> {
        match key_spec {
            "ECC_NIST_P256" => Ok(SigningScheme::EcdsaSha256),
            "ECC_NIST_P384" => Ok(SigningScheme::EcdsaSha384),
            "ECC_NIST_P521" => Ok(SigningScheme::EcdsaSha512),
            "RSA_2048" | "RSA_3072" | "RSA_4096" => Ok(SigningScheme::RsaPkcs1v15Sha256),
            _ => {
                error!("KMS key spec {key_spec} is not supported for CSR signing");
                Err(Error::Signing(format!(
                    "unsupported key spec {key_spec}"
                )))
            }
        }
    }

    /// Name of the signing algorithm as understood by AWS KMS
    pub fn kms_name(&self) -> &'static str {
        match self {
            SigningScheme::EcdsaSha256 => "ECDSA_SHA_256",
            SigningScheme::EcdsaSha384 => "ECDSA_SHA_384",
            SigningScheme::EcdsaSha512 => "ECDSA_SHA_512",
            SigningScheme::RsaPkcs1v15Sha256 => "RSASSA_PKCS1_V1_5_SHA_256",
        }
    }

    /// Returns the hash of `msg` using the digest algorithm associated with the scheme
    pub fn digest(&self, msg: &[u8]) -> Vec<u8> {
        match self {
            SigningScheme::EcdsaSha256 | SigningScheme::RsaPkcs1v15Sha256 => {
                Sha256::digest(msg).to_vec()
            }
            SigningScheme::EcdsaSha384 => Sha384::digest(msg).to_vec(),
            SigningScheme::EcdsaSha512 => Sha512::digest(msg).to_vec(),
        }
    }

    /// Returns the AlgorithmIdentifier that describes signatures generated with the scheme
    pub fn algorithm_identifier(&self) -> AlgorithmIdentifierOwned {
        match self {
            SigningScheme::EcdsaSha256 => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
                parameters: None,
            },
            SigningScheme::EcdsaSha384 => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_384,
                parameters: None,
            },
            SigningScheme::EcdsaSha512 => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_512,
                parameters: None,
            },
            SigningScheme::RsaPkcs1v15Sha256 => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(Any::from(AnyRef::NULL)),
            },
        }
    }
}

impl fmt::Display for SigningScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kms_name())
    }
}

/// Signature value exactly as returned by KMS
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KmsSignature(pub Vec<u8>);

impl SignatureBitStringEncoding for KmsSignature {
    fn to_bitstring(&self) -> der::Result<BitString> {
        BitString::from_bytes(&self.0)
    }
}

/// Signer backed by an asymmetric key held in a key management service.
///
/// Each call to `try_sign` results in exactly one remote signing operation.
pub struct KmsSigner<'k, K: KeyManagement + ?Sized> {
    /// Key management service that holds the key
    kms: &'k K,
    /// Identifier (ARN, alias or key ID) of the key
    key_id: String,
    /// Scheme selected based on the key spec
    scheme: SigningScheme,
    /// Public key read from KMS
    public_key: SubjectPublicKeyInfoOwned,
}

impl<'k, K: KeyManagement + ?Sized> KmsSigner<'k, K> {
    /// Reads the public key for `key_id` and confirms the key is suitable for signing a CSR
    pub fn new(kms: &'k K, key_id: &str) -> Result<Self> {
        let kms_public_key = kms.get_public_key(key_id)?;

        if let Some(usage) = &kms_public_key.key_usage {
            if usage != "SIGN_VERIFY" {
                error!("KMS key {key_id} has usage {usage}. Expected SIGN_VERIFY.");
                return Err(Error::Signing(format!(
                    "key {key_id} has usage {usage}, not SIGN_VERIFY"
                )));
            }
        }

        let scheme = SigningScheme::for_key_spec(&kms_public_key.key_spec)?;
        let public_key = match SubjectPublicKeyInfoOwned::from_der(&kms_public_key.public_key) {
            Ok(spki) => spki,
            Err(e) => {
                error!("Failed to parse public key returned by KMS for {key_id}: {e:?}");
                return Err(Error::Signing(format!(
                    "public key returned for {key_id} could not be parsed: {e}"
                )));
            }
        };
        info!(
            "Using KMS key {key_id} with key spec {} and signing algorithm {scheme}",
            kms_public_key.key_spec
        );

        Ok(Self {
            kms,
            key_id: key_id.to_string(),
            scheme,
            public_key,
        })
    }

    /// Returns the public key read from KMS
    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.public_key
    }

    /// Returns the signature scheme selected for the key
    pub fn scheme(&self) -> SigningScheme {
        self.scheme
    }
}

impl<K: KeyManagement + ?Sized> DynSignatureAlgorithmIdentifier for KmsSigner<'_, K> {
    fn signature_algorithm_identifier(&self) -> spki::Result<AlgorithmIdentifierOwned> {
        Ok(self.scheme.algorithm_identifier())
    }
}

impl<K: KeyManagement + ?Sized> Signer<KmsSignature> for KmsSigner<'_, K> {
    fn try_sign(&self, msg: &[u8]) -> signature::Result<KmsSignature> {
        let digest = self.scheme.digest(msg);
        debug!(
            "Requesting {} signature over {} byte digest from {}",
            self.scheme,
            digest.len(),
            self.key_id
        );
        match self.kms.sign(&self.key_id, &digest, self.scheme) {
            Ok(sig) => Ok(KmsSignature(sig)),
            Err(e) => {
                error!("KMS failed to sign using {}: {e}", self.key_id);
                Err(signature::Error::from_source(e))
            }
        }
    }
}

//------------------------------------------------------------------------------------
// Unit tests
//------------------------------------------------------------------------------------
#[test]
fn key_spec_mapping() {
    assert_eq!(
        SigningScheme::EcdsaSha256,
        SigningScheme::for_key_spec("ECC_NIST_P256").unwrap()
    );
    assert_eq!(
        SigningScheme::EcdsaSha384,
        SigningScheme::for_key_spec("ECC_NIST_P384").unwrap()
    );
    assert_eq!(
        SigningScheme::RsaPkcs1v15Sha256,
        SigningScheme::for_key_spec("RSA_3072").unwrap()
    );
    assert!(matches!(
        SigningScheme::for_key_spec("ECC_SECG_P256K1"),
        Err(Error::Signing(_))
    ));
    assert!(matches!(
        SigningScheme::for_key_spec("HMAC_256"),
        Err(Error::Signing(_))
    ));
}

#[test]
fn digest_lengths() {
    assert_eq!(32, SigningScheme::EcdsaSha256.digest(b"tbs").len());
    assert_eq!(48, SigningScheme::EcdsaSha384.digest(b"tbs").len());
    assert_eq!(64, SigningScheme::EcdsaSha512.digest(b"tbs").len());
    assert_eq!(32, SigningScheme::RsaPkcs1v15Sha256.digest(b"tbs").len());
}
