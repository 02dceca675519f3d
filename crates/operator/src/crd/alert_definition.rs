use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::{AlertStatus, State};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema, Default)]
#[kube(
    group = "alertsync.io",
    version = "v1alpha1",
    kind = "AlertDefinition",
    namespaced,
    derive = "PartialEq",
    status = "AlertDefinitionStatus",
    shortname = "alertdef"
)]
#[serde(rename_all = "camelCase")]
pub struct AlertDefinitionSpec {
    /// Alert type: CLASSIC or THRESHOLD
    #[serde(default)]
    pub alert_type: String,

    /// Display name of the alert in the backend
    #[serde(default)]
    pub alert_name: String,

    /// Condition expression (CLASSIC alerts)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,

    /// Severity name to condition expression (THRESHOLD alerts)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, String>,

    /// Query shown alongside the alert
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_expression: String,

    /// Minutes the condition must hold before firing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes: Option<i32>,

    /// Minutes the condition must be false before resolving
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_after_minutes: Option<i32>,

    /// Severity (CLASSIC alerts)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub severity: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Notification target
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub additional_information: String,

    /// Parameter names a referencing AlertGroupConfig must supply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exported_params: Vec<String>,

    /// Default values for exported parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exported_params_default_values: BTreeMap<String, String>,
}

impl AlertDefinitionSpec {
    /// A definition without exported parameters is sent to the backend on
    /// its own and must not be referenced from a group config.
    pub fn is_standalone(&self) -> bool {
        self.exported_params.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertDefinitionStatus {
    #[serde(default)]
    pub state: State,

    #[serde(default)]
    pub retry_count: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_timestamp: Option<String>,

    /// Backend id of the standalone alert
    #[serde(rename = "alertID", skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,

    /// Per group config status, keyed by AlertGroupConfig name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub alerts_status: BTreeMap<String, AlertStatus>,
}
