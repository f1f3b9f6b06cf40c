//! Settings that govern how certificates are requested from the certificate authority

use std::{fs::File, io::BufReader, path::Path, time::Duration};

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, BLANK_END_ENTITY_TEMPLATE_ARN, DEFAULT_CA_SIGNING_ALGORITHM, DEFAULT_COUNTRY,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_VALIDITY_DAYS,
};

fn default_template_arn() -> String {
    BLANK_END_ENTITY_TEMPLATE_ARN.clone()
}
fn default_signing_algorithm() -> String {
    DEFAULT_CA_SIGNING_ALGORITHM.to_string()
}
fn default_validity_days() -> i64 {
    DEFAULT_VALIDITY_DAYS
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

/// Issuance settings, read from a JSON file. Fields missing from the file take default values.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct IssuanceSettings {
    /// AWS Private CA template used when issuing certificates
    #[serde(default = "default_template_arn")]
    pub template_arn: String,
    /// Algorithm used by the CA to sign issued certificates
    #[serde(default = "default_signing_algorithm")]
    pub signing_algorithm: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
    /// Seconds to wait between attempts to retrieve an issued certificate
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Country included in the subject of generated CSRs
    #[serde(default = "default_country")]
    pub country: String,
    /// AWS region. When absent, region is resolved from the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// AWS profile. When absent, credentials are resolved from the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl Default for IssuanceSettings {
    fn default() -> Self {
        Self {
            template_arn: default_template_arn(),
            signing_algorithm: default_signing_algorithm(),
            validity_days: default_validity_days(),
            poll_interval_secs: default_poll_interval_secs(),
            country: default_country(),
            region: None,
            profile: None,
        }
    }
}

/// Values that replace those read from a settings file
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SettingsOverrides {
    pub country: Option<String>,
    pub validity_days: Option<i64>,
    pub region: Option<String>,
    pub profile: Option<String>,
}

impl IssuanceSettings {
    /// Reads settings from the JSON file at `path` and validates them
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            error!("Failed to open settings file {}: {e}", path.display());
            Error::Config(format!("could not open {}: {e}", path.display()))
        })?;
        let settings: IssuanceSettings = serde_json::from_reader(BufReader::new(f))?;
        settings.validate()?;
        info!("Read settings from {}", path.display());
        Ok(settings)
    }

    /// Parses settings from a JSON string and validates them
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: IssuanceSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Returns settings with any values present in `overrides` replacing existing values
    pub fn with_overrides(mut self, overrides: &SettingsOverrides) -> Result<Self> {
        if let Some(country) = &overrides.country {
            self.country = country.clone();
        }
        if let Some(validity_days) = overrides.validity_days {
            self.validity_days = validity_days;
        }
        if overrides.region.is_some() {
            self.region = overrides.region.clone();
        }
        if overrides.profile.is_some() {
            self.profile = overrides.profile.clone();
        }
        self.validate()?;
        Ok(self)
    }

    /// Confirms values are usable
    pub fn validate(&self) -> Result<()> {
        if self.validity_days <= 0 {
            error!("validity_days must be positive: {}", self.validity_days);
            return Err(Error::Config(format!(
                "validity_days must be positive, not {}",
                self.validity_days
            )));
        }
        if self.poll_interval_secs == 0 {
            error!("poll_interval_secs must be positive");
            return Err(Error::Config(
                "poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.template_arn.is_empty() || self.signing_algorithm.is_empty() {
            error!("template_arn and signing_algorithm must not be empty");
            return Err(Error::Config(
                "template_arn and signing_algorithm must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Interval to wait between attempts to retrieve an issued certificate
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

//------------------------------------------------------------------------------------
// Unit tests
//------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let settings = IssuanceSettings::from_json(r#"{"country": "FR"}"#).unwrap();
        assert_eq!("FR", settings.country);
        assert_eq!(1825, settings.validity_days);
        assert_eq!(Duration::from_secs(2), settings.poll_interval());
        assert_eq!("SHA256WITHECDSA", settings.signing_algorithm);
        assert_eq!(
            "arn:aws:acm-pca:::template/BlankEndEntityCertificate_APIPassthrough/V1",
            settings.template_arn
        );
        assert!(settings.region.is_none());
        assert_eq!(IssuanceSettings::default(), IssuanceSettings::from_json("{}").unwrap());
    }

    #[test]
    fn non_positive_values_rejected() {
        assert!(matches!(
            IssuanceSettings::from_json(r#"{"validity_days": 0}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            IssuanceSettings::from_json(r#"{"poll_interval_secs": 0}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            IssuanceSettings::from_json(r#"{"validity_days": "long"}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn overrides_replace_file_values() {
        let settings = IssuanceSettings::from_json(r#"{"country": "FR", "region": "eu-west-2"}"#)
            .unwrap()
            .with_overrides(&SettingsOverrides {
                country: Some("DE".to_string()),
                validity_days: Some(365),
                ..Default::default()
            })
            .unwrap();
        assert_eq!("DE", settings.country);
        assert_eq!(365, settings.validity_days);
        assert_eq!(Some("eu-west-2".to_string()), settings.region);

        assert!(matches!(
            IssuanceSettings::default().with_overrides(&SettingsOverrides {
                validity_days: Some(-1),
                ..Default::default()
            }),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            IssuanceSettings::load("/nonexistent/dscert/settings.json"),
            Err(Error::Config(_))
        ));
    }
}
