//! Semantic validation of a resolved alert, discriminated by alert type.

use std::fmt;
use std::str::FromStr;

use super::request::AlertRequest;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    Classic,
    Threshold,
}

impl FromStr for AlertType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CLASSIC" => Ok(AlertType::Classic),
            "THRESHOLD" => Ok(AlertType::Threshold),
            "" => Err(Error::Validation(
                "alertType must be one of CLASSIC or THRESHOLD".to_string(),
            )),
            other => Err(Error::Validation(format!("unsupported alertType {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Severe,
    Smoke,
    Warn,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Severe, Severity::Smoke, Severity::Warn, Severity::Info];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Severe => "severe",
            Severity::Smoke => "smoke",
            Severity::Warn => "warn",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "severity {s:?} must be one of severe, smoke, warn, info"
                ))
            })
    }
}

/// Check that template substitution left a request the backend will accept.
pub fn validate_alert_request(alert: &AlertRequest) -> Result<()> {
    match alert.alert_type.parse::<AlertType>()? {
        AlertType::Classic => {
            if alert.condition.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "alert {} of type CLASSIC must have a condition",
                    alert.name
                )));
            }
            alert.severity.parse::<Severity>()?;
        }
        AlertType::Threshold => {
            if alert.conditions.is_empty() {
                return Err(Error::Validation(format!(
                    "alert {} of type THRESHOLD must have conditions",
                    alert.name
                )));
            }
            for severity in alert.conditions.keys() {
                severity.parse::<Severity>()?;
            }
        }
    }
    Ok(())
}
