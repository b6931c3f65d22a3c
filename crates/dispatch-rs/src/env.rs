use std::env;

use anyhow::{Context, Result};

use crate::tensor::DeviceKind;

pub(crate) const GRAPH_CACHE_CAPACITY: &str = "DISPATCH_GRAPH_CACHE_CAPACITY";
pub(crate) const REAPPLY_VIEWS: &str = "DISPATCH_REAPPLY_VIEWS";
pub(crate) const FUNCTIONAL_DEVICES: &str = "DISPATCH_FUNCTIONAL_DEVICES";

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

pub(crate) fn bool_var(name: &str) -> Option<bool> {
    non_empty(name).map(|value| parse_bool(&value))
}

pub(crate) fn usize_var(name: &str) -> Result<Option<usize>> {
    non_empty(name)
        .map(|value| {
            value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("invalid {name}={value}"))
        })
        .transpose()
}

/// Comma-separated device kinds, e.g. `lazy,graph`.
pub(crate) fn device_list_var(name: &str) -> Result<Option<Vec<DeviceKind>>> {
    non_empty(name)
        .map(|value| parse_device_list(&value).with_context(|| format!("invalid {name}={value}")))
        .transpose()
}

pub(crate) fn parse_device_list(value: &str) -> Result<Vec<DeviceKind>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<DeviceKind>().map_err(anyhow::Error::msg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }

    #[test]
    fn malformed_capacity_names_the_variable() {
        let name = "DISPATCH_TEST_MALFORMED_CAPACITY";
        env::set_var(name, "many");
        let err = usize_var(name).err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("invalid DISPATCH_TEST_MALFORMED_CAPACITY=many"));
        env::set_var(name, " 16 ");
        assert_eq!(usize_var(name).ok(), Some(Some(16)));
        env::remove_var(name);
        assert_eq!(usize_var(name).ok(), Some(None));
    }

    #[test]
    fn device_lists_skip_blank_entries() {
        assert_eq!(
            parse_device_list("lazy, graph,,").ok(),
            Some(vec![DeviceKind::Lazy, DeviceKind::Graph])
        );
        let err = parse_device_list("lazy,tpu").err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("unknown device kind 'tpu'"));
    }
}
