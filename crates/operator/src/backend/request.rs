use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crd::AlertDefinitionSpec;
use crate::{Error, Result};

/// Alert as sent to the backend. Built fresh for every reconciliation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertRequest {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alert_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_expression: String,

    pub minutes: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_after_minutes: Option<i32>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub severity: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub additional_information: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<AlertTags>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertTags {
    pub customer_tags: Vec<String>,
}

impl TryFrom<&AlertDefinitionSpec> for AlertRequest {
    type Error = Error;

    fn try_from(spec: &AlertDefinitionSpec) -> Result<Self> {
        if spec.alert_name.trim().is_empty() {
            return Err(Error::Conversion("alertName must be set".to_string()));
        }
        let minutes = spec
            .minutes
            .ok_or_else(|| Error::Conversion(format!("alert {} has no minutes set", spec.alert_name)))?;
        if minutes <= 0 {
            return Err(Error::Conversion(format!(
                "alert {} must have a positive minutes value, got {}",
                spec.alert_name, minutes
            )));
        }

        Ok(AlertRequest {
            name: spec.alert_name.clone(),
            alert_type: spec.alert_type.clone(),
            condition: spec.condition.clone(),
            conditions: spec.conditions.clone(),
            display_expression: spec.display_expression.clone(),
            minutes,
            resolve_after_minutes: spec.resolve_after_minutes,
            severity: spec.severity.clone(),
            target: spec.target.clone(),
            additional_information: spec.additional_information.clone(),
            tags: (!spec.tags.is_empty()).then(|| AlertTags {
                customer_tags: spec.tags.clone(),
            }),
        })
    }
}
