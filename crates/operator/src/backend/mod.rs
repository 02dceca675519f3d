//! Backend-facing alert model and client.

mod client;
mod request;
mod validate;

pub use client::{AlertingClient, HttpAlertingClient};
pub use request::{AlertRequest, AlertTags};
pub use validate::{validate_alert_request, AlertType, Severity};

#[cfg(test)]
pub use client::MockAlertingClient;
