//! Pure checks of a request against an access rule.

use std::collections::BTreeMap;

use super::{FieldError, ValidationError};
use crate::models::provider::CachedProviderOption;
use crate::models::request::{RequestTiming, SelectedOption};
use crate::models::rule::{AccessRule, Target};

/// Fails when the requested duration exceeds the rule's maximum.
pub fn validate_timing(timing: &RequestTiming, rule: &AccessRule) -> Result<(), ValidationError> {
    let max = rule.time_constraints.max_duration_seconds;
    if timing.duration_seconds > max {
        return Err(FieldError::new(
            "timing.durationSeconds",
            format!(
                "durationSeconds: {} exceeds the maximum duration seconds: {}",
                timing.duration_seconds, max
            ),
        )
        .into());
    }
    Ok(())
}

/// Checks the requester's argument selections against the rule target and
/// resolves a display label for each chosen option.
///
/// Every selectable argument must be chosen exactly once with an allowed value.
/// Labels come from `cached` when present, otherwise the raw value is used.
pub fn resolve_selections(
    with: &BTreeMap<String, String>,
    target: &Target,
    cached: &[CachedProviderOption],
) -> Result<BTreeMap<String, SelectedOption>, ValidationError> {
    let mut fields = Vec::new();
    let mut selected = BTreeMap::new();

    for (key, value) in with {
        match target.allows_option(key, value) {
            None => fields.push(FieldError::new(
                format!("with.{key}"),
                format!("{key} is not a selectable argument for this rule"),
            )),
            Some(false) => fields.push(FieldError::new(
                format!("with.{key}"),
                format!("{value} is not an allowed option for {key}"),
            )),
            Some(true) => {
                let label = cached
                    .iter()
                    .find(|o| &o.arg == key && &o.value == value)
                    .map(|o| o.label.clone())
                    .unwrap_or_else(|| value.clone());
                selected.insert(
                    key.clone(),
                    SelectedOption {
                        value: value.clone(),
                        label,
                    },
                );
            }
        }
    }

    for key in target.selectable_keys() {
        if !with.contains_key(key) {
            fields.push(FieldError::new(
                format!("with.{key}"),
                format!("a value must be selected for {key}"),
            ));
        }
    }

    if fields.is_empty() {
        Ok(selected)
    } else {
        Err(ValidationError { fields })
    }
}
