//! Parameter resolution for templated alert definitions.
//!
//! A group config supplies values for the parameters an alert definition
//! exports. Values are layered (later layers win) and the result must name
//! exactly the exported parameters, nothing more and nothing less.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::{Error, Result};

pub type Params = BTreeMap<String, String>;

/// Merge `overrides` on top of `defaults`. Every key of both inputs is kept;
/// on collision the override value wins.
pub fn merge_params(defaults: &Params, overrides: &Params) -> Params {
    let mut merged = defaults.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Check that the resolved parameter names equal `required` exactly.
pub fn validate_params<'a, I>(required: I, resolved: &Params) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    let required: BTreeSet<&str> = required.into_iter().map(String::as_str).collect();
    let supplied: BTreeSet<&str> = resolved.keys().map(String::as_str).collect();

    if required == supplied {
        return Ok(());
    }

    let missing: Vec<String> = required.difference(&supplied).map(|s| s.to_string()).collect();
    let unexpected: Vec<String> = supplied.difference(&required).map(|s| s.to_string()).collect();
    debug!(?missing, ?unexpected, "parameter set does not match exported params");

    Err(Error::ParameterMismatch { missing, unexpected })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_keeps_all_keys_and_prefers_overrides() {
        let defaults = params(&[("env", "dev"), ("threshold", "80")]);
        let overrides = params(&[("threshold", "95"), ("team", "infra")]);

        let merged = merge_params(&defaults, &overrides);

        assert_eq!(
            merged,
            params(&[("env", "dev"), ("team", "infra"), ("threshold", "95")])
        );
    }

    #[test]
    fn merge_with_empty_inputs() {
        let defaults = params(&[("env", "dev")]);
        assert_eq!(merge_params(&defaults, &Params::new()), defaults);
        assert_eq!(merge_params(&Params::new(), &defaults), defaults);
    }

    #[test]
    fn missing_param_is_rejected() {
        let err = validate_params(&names(&["p1", "p2"]), &params(&[("p1", "x")])).unwrap_err();
        match err {
            Error::ParameterMismatch { missing, unexpected } => {
                assert_eq!(missing, names(&["p2"]));
                assert!(unexpected.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extra_param_is_rejected() {
        let err = validate_params(&names(&["p1"]), &params(&[("p1", "x"), ("p2", "y")])).unwrap_err();
        match err {
            Error::ParameterMismatch { missing, unexpected } => {
                assert!(missing.is_empty());
                assert_eq!(unexpected, names(&["p2"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wrong_param_name_is_rejected() {
        assert!(validate_params(&names(&["foo"]), &params(&[("bar", "bar")])).is_err());
    }

    #[test]
    fn exact_match_is_accepted() {
        assert!(validate_params(&names(&["p1"]), &params(&[("p1", "x")])).is_ok());
        assert!(validate_params(&Vec::<String>::new(), &Params::new()).is_ok());
    }
}
