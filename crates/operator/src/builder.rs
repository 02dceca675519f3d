//! Turns an alert definition plus parameter overrides into a concrete,
//! validated backend request.
//!
//! The definition spec is serialized to JSON, rendered as a template with the
//! resolved parameters, parsed back, converted and validated.

use tracing::debug;

use crate::backend::{validate_alert_request, AlertRequest};
use crate::crd::AlertDefinitionSpec;
use crate::params::{merge_params, validate_params, Params};
use crate::template;
use crate::{Error, Result};

/// Build the backend request for `spec` driven by `params`.
///
/// `params` is empty for a standalone definition and holds the group config's
/// overrides otherwise.
pub fn build_alert_request(spec: &AlertDefinitionSpec, params: &Params) -> Result<AlertRequest> {
    let rendered = render_spec(spec, params)?;
    let request = AlertRequest::try_from(&rendered)?;
    validate_alert_request(&request)?;
    Ok(request)
}

/// Substitute resolved parameters into every field of `spec`.
pub fn render_spec(spec: &AlertDefinitionSpec, params: &Params) -> Result<AlertDefinitionSpec> {
    let serialized = serde_json::to_string(spec).map_err(Error::Serialization)?;

    if spec.is_standalone() && !params.is_empty() {
        return Err(Error::UnsupportedUsage(format!(
            "alert definition {} has no exportedParams and cannot be used from an alert group config",
            spec.alert_name
        )));
    }

    let resolved = merge_params(&spec.exported_params_default_values, params);
    validate_params(&spec.exported_params, &resolved)?;

    // Placeholders sit inside JSON strings; values are escaped so they cannot
    // change the document structure.
    let escaped: Params = resolved
        .iter()
        .map(|(k, v)| Ok((k.clone(), json_escape(v)?)))
        .collect::<Result<_>>()?;

    let rendered = template::render(&serialized, &escaped)?;
    debug!(alert = %spec.alert_name, "alert definition template rendered");

    parse_rendered_spec(&rendered)
}

fn parse_rendered_spec(rendered: &str) -> Result<AlertDefinitionSpec> {
    serde_json::from_str(rendered).map_err(Error::RenderedSpecInvalid)
}

fn json_escape(value: &str) -> Result<String> {
    let quoted = serde_json::to_string(value).map_err(Error::Serialization)?;
    Ok(quoted[1..quoted.len() - 1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn template_spec() -> AlertDefinitionSpec {
        AlertDefinitionSpec {
            alert_type: "CLASSIC".into(),
            alert_name: "cpu-high-{{ .env }}".into(),
            condition: "ts(cpu.usage, env={{ .env }}) > {{ .threshold }}".into(),
            display_expression: "ts(cpu.usage, env={{ .env }})".into(),
            minutes: Some(5),
            resolve_after_minutes: Some(5),
            severity: "{{ .severity }}".into(),
            exported_params: vec!["env".into(), "threshold".into(), "severity".into()],
            exported_params_default_values: params(&[("threshold", "80"), ("severity", "warn")]),
            ..Default::default()
        }
    }

    fn standalone_spec() -> AlertDefinitionSpec {
        AlertDefinitionSpec {
            alert_type: "THRESHOLD".into(),
            alert_name: "disk-full".into(),
            conditions: BTreeMap::from([
                ("warn".to_string(), "ts(disk.used) > 80".to_string()),
                ("severe".to_string(), "ts(disk.used) > 95".to_string()),
            ]),
            minutes: Some(10),
            tags: vec!["storage".into()],
            ..Default::default()
        }
    }

    #[test]
    fn substitutes_overrides_and_defaults() {
        let request = build_alert_request(
            &template_spec(),
            &params(&[("env", "prod"), ("threshold", "95")]),
        )
        .unwrap();

        assert_eq!(request.name, "cpu-high-prod");
        assert_eq!(request.condition, "ts(cpu.usage, env=prod) > 95");
        assert_eq!(request.severity, "warn");
    }

    #[test]
    fn standalone_definition_builds_without_params() {
        let request = build_alert_request(&standalone_spec(), &Params::new()).unwrap();
        assert_eq!(request.name, "disk-full");
        assert_eq!(request.conditions.len(), 2);
    }

    #[test]
    fn standalone_definition_rejects_params() {
        let err = build_alert_request(&standalone_spec(), &params(&[("env", "prod")])).unwrap_err();
        assert!(matches!(err, Error::UnsupportedUsage(_)));
    }

    #[test]
    fn missing_parameter_is_a_mismatch() {
        let err = build_alert_request(&template_spec(), &Params::new()).unwrap_err();
        assert!(matches!(err, Error::ParameterMismatch { .. }));
    }

    #[test]
    fn undeclared_parameter_is_a_mismatch() {
        let err = build_alert_request(
            &template_spec(),
            &params(&[("env", "prod"), ("region", "us-west-2")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ParameterMismatch { .. }));
    }

    #[test]
    fn unknown_severity_after_rendering_fails_validation() {
        let err = build_alert_request(
            &template_spec(),
            &params(&[("env", "prod"), ("severity", "critical")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn placeholder_for_undeclared_name_fails_rendering() {
        let mut spec = template_spec();
        spec.target = "{{ .owner }}".into();
        let err = build_alert_request(&spec, &params(&[("env", "prod")])).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn values_cannot_break_out_of_json_strings() {
        let request = build_alert_request(
            &template_spec(),
            &params(&[("env", "pr\"od")]),
        )
        .unwrap();
        assert_eq!(request.name, "cpu-high-pr\"od");
    }

    #[test]
    fn spec_without_placeholders_round_trips() {
        let spec = standalone_spec();
        assert_eq!(render_spec(&spec, &Params::new()).unwrap(), spec);
    }

    #[test]
    fn unparseable_rendering_is_reported() {
        assert!(matches!(
            parse_rendered_spec("{\"alertName\": "),
            Err(Error::RenderedSpecInvalid(_))
        ));
    }

    #[test]
    fn unconvertible_spec_is_reported() {
        let mut spec = standalone_spec();
        spec.minutes = None;
        assert!(matches!(
            build_alert_request(&spec, &Params::new()),
            Err(Error::Conversion(_))
        ));
    }
}
