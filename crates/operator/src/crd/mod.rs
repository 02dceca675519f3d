pub mod alert_definition;
pub mod common;
pub mod group_config;

pub use alert_definition::{AlertDefinition, AlertDefinitionSpec, AlertDefinitionStatus};
pub use common::{AlertStatus, State, FINALIZER};
pub use group_config::{AlertGroupConfig, AlertGroupConfigSpec, AlertGroupConfigStatus, AlertReference};
