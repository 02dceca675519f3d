use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::{AlertStatus, State};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema, Default)]
#[kube(
    group = "alertsync.io",
    version = "v1alpha1",
    kind = "AlertGroupConfig",
    namespaced,
    derive = "PartialEq",
    status = "AlertGroupConfigStatus",
    shortname = "alertgroup"
)]
#[serde(rename_all = "camelCase")]
pub struct AlertGroupConfigSpec {
    /// Parameters applied to every referenced alert definition
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub global_params: BTreeMap<String, String>,

    /// Alert definitions instantiated by this config
    #[serde(default)]
    pub alerts: Vec<AlertReference>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertReference {
    /// Name of an AlertDefinition in the same namespace
    pub alert_definition_name: String,

    /// Overrides for the definition's exported parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertGroupConfigStatus {
    #[serde(default)]
    pub state: State,

    #[serde(default)]
    pub retry_count: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_description: String,

    /// Per alert status, keyed by AlertDefinition name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub alerts_status: BTreeMap<String, AlertStatus>,
}
