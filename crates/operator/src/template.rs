//! Template rendering utilities using Tera
//!
//! Alert definitions are authored with Go template placeholders
//! (`{{ .threshold }}`). They are converted to Tera syntax and rendered in
//! strict mode: a reference to a parameter that is not supplied is an error.

use lazy_static::lazy_static;
use regex::Regex;
use tera::{Context, Tera};

use crate::params::Params;
use crate::{Error, Result};

const TEMPLATE_NAME: &str = "alert";

lazy_static! {
    static ref DEFAULT_DOUBLE_QUOTED: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+"([^"]+)"\s*\}\}"#).unwrap();
    static ref DEFAULT_ESCAPED_QUOTED: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+\\"([^"\\]+)\\"\s*\}\}"#).unwrap();
    static ref DEFAULT_SINGLE_QUOTED: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+'([^']+)'\s*\}\}"#).unwrap();
    static ref DEFAULT_BARE: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+([^}\s(]+)\s*\}\}"#).unwrap();
}

/// Convert Go template syntax to Tera syntax
///
/// Handles common patterns:
/// - {{ .path.to.value }} -> {{ path.to.value }}
/// - {{ .value | default "default" }} -> {{ value | default(value="default") }}
/// - the same inside a JSON string, where the quotes arrive escaped
pub fn convert_go_to_tera(template: &str) -> String {
    let converted = template.replace("{{ .", "{{ ").replace("{{.", "{{");

    let converted = DEFAULT_ESCAPED_QUOTED.replace_all(&converted, "{{$1| default(value='$2')}}");
    let converted = DEFAULT_DOUBLE_QUOTED.replace_all(&converted, "{{$1| default(value=\"$2\")}}");
    let converted = DEFAULT_SINGLE_QUOTED.replace_all(&converted, "{{$1| default(value=\"$2\")}}");
    let converted = DEFAULT_BARE.replace_all(&converted, "{{$1| default(value=\"$2\")}}");

    converted.into_owned()
}

/// Render `template` against `params`.
///
/// Pure: no state is kept between calls.
pub fn render(template: &str, params: &Params) -> Result<String> {
    let converted = convert_go_to_tera(template);

    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, &converted)
        .map_err(|e| Error::Template(format!("failed to parse template: {}", error_chain(&e))))?;

    let mut context = Context::new();
    for (key, value) in params {
        context.insert(key.as_str(), value);
    }

    tera.render(TEMPLATE_NAME, &context)
        .map_err(|e| Error::Template(format!("failed to render template: {}", error_chain(&e))))
}

// Tera keeps the useful detail in the source chain.
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
