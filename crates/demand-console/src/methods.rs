use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_METHOD: &str = "sainte-lague";

pub const QUEUE_OVERRIDES_ONLY_FOR_PRIORITIZE: &str = "Queue-specific methods (NOW/NEXT/LATER) are only supported by \"Prioritize\". Clear those fields to use \"Prioritize RS\" or \"Prioritize Global\".";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    #[default]
    SainteLague,
    Dhondt,
    Wsjf,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::SainteLague, Method::Dhondt, Method::Wsjf];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::SainteLague => "sainte-lague",
            Method::Dhondt => "dhondt",
            Method::Wsjf => "wsjf",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::malformed(format!("unknown method '{s}'")))
    }
}

/// Cycles `"" -> sainte-lague -> dhondt -> wsjf -> ""` for optional selectors.
pub fn cycle_optional(current: &str) -> String {
    let cur = current.trim();
    if cur.is_empty() {
        return Method::ALL[0].as_str().to_string();
    }
    match Method::ALL.iter().position(|m| m.as_str() == cur) {
        Some(i) if i + 1 < Method::ALL.len() => Method::ALL[i + 1].as_str().to_string(),
        _ => String::new(),
    }
}

/// Cycles through the methods for the required default selector.
pub fn cycle_required(current: &str) -> String {
    let next = cycle_optional(current);
    if next.is_empty() {
        Method::ALL[0].as_str().to_string()
    } else {
        next
    }
}

/// Operator input for the method selectors, kept as raw strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSelection {
    pub default_method: String,
    pub now_method: Option<String>,
    pub next_method: Option<String>,
    pub later_method: Option<String>,
}

impl Default for MethodSelection {
    fn default() -> Self {
        Self {
            default_method: DEFAULT_METHOD.to_string(),
            now_method: None,
            next_method: None,
            later_method: None,
        }
    }
}

impl MethodSelection {
    pub fn with_default(method: impl Into<String>) -> Self {
        Self {
            default_method: method.into(),
            ..Self::default()
        }
    }
}

/// Effective per-queue methods as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMethods {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub later_method: Option<String>,
}

fn active(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|s| !s.is_empty()).map(ToOwned::to_owned)
}

pub fn resolve_default_method(selection: &MethodSelection) -> String {
    active(Some(&selection.default_method)).unwrap_or_else(|| DEFAULT_METHOD.to_string())
}

pub fn resolve_queue_methods(selection: &MethodSelection) -> QueueMethods {
    QueueMethods {
        method: resolve_default_method(selection),
        now_method: active(selection.now_method.as_deref()),
        next_method: active(selection.next_method.as_deref()),
        later_method: active(selection.later_method.as_deref()),
    }
}

pub fn has_active_overrides(selection: &MethodSelection) -> bool {
    [
        &selection.now_method,
        &selection.next_method,
        &selection.later_method,
    ]
    .into_iter()
    .any(|v| active(v.as_deref()).is_some())
}

/// Rejects single-queue operations while queue overrides are set.
pub fn ensure_single_queue(selection: &MethodSelection) -> Result<()> {
    if has_active_overrides(selection) {
        return Err(Error::Guard(QUEUE_OVERRIDES_ONLY_FOR_PRIORITIZE.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(default: &str, now: Option<&str>, next: Option<&str>, later: Option<&str>) -> MethodSelection {
        MethodSelection {
            default_method: default.to_string(),
            now_method: now.map(str::to_string),
            next_method: next.map(str::to_string),
            later_method: later.map(str::to_string),
        }
    }

    #[test]
    fn blank_default_falls_back_to_sainte_lague() {
        let q = resolve_queue_methods(&sel("   ", None, None, None));
        assert_eq!(q.method, "sainte-lague");
        let q = resolve_queue_methods(&sel("", None, None, None));
        assert_eq!(q.method, "sainte-lague");
    }

    #[test]
    fn whitespace_overrides_are_dropped_from_the_payload() {
        let q = resolve_queue_methods(&sel("dhondt", Some("  "), Some(" wsjf "), Some("")));
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v, serde_json::json!({"method": "dhondt", "next_method": "wsjf"}));
    }

    #[test]
    fn active_overrides_detection() {
        assert!(!has_active_overrides(&sel("wsjf", None, Some(" "), Some("\t"))));
        assert!(has_active_overrides(&sel("wsjf", None, None, Some("dhondt"))));
        assert!(has_active_overrides(&sel("", Some("wsjf"), None, None)));
    }

    #[test]
    fn resolution_never_emits_empty_fields() {
        let inputs = ["", " ", "sainte-lague", " dhondt", "wsjf "];
        for d in inputs {
            for n in inputs {
                for l in inputs {
                    let q = resolve_queue_methods(&sel(d, Some(n), None, Some(l)));
                    assert!(!q.method.is_empty());
                    assert!(q.now_method.as_deref().is_none_or(|s| !s.is_empty()));
                    assert!(q.later_method.as_deref().is_none_or(|s| !s.is_empty()));
                    assert_eq!(
                        has_active_overrides(&sel(d, Some(n), None, Some(l))),
                        q.now_method.is_some() || q.later_method.is_some()
                    );
                }
            }
        }
    }

    #[test]
    fn guard_uses_the_fixed_message() {
        let err = ensure_single_queue(&sel("wsjf", Some("dhondt"), None, None)).unwrap_err();
        assert_eq!(err.to_string(), QUEUE_OVERRIDES_ONLY_FOR_PRIORITIZE);
        assert!(ensure_single_queue(&sel("wsjf", Some(""), None, None)).is_ok());
    }

    #[test]
    fn selectors_cycle() {
        assert_eq!(cycle_optional(""), "sainte-lague");
        assert_eq!(cycle_optional("dhondt"), "wsjf");
        assert_eq!(cycle_optional("wsjf"), "");
        assert_eq!(cycle_required("wsjf"), "sainte-lague");
        assert_eq!("WSJF".parse::<Method>().unwrap(), Method::Wsjf);
    }
}
