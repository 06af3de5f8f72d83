//! Declarative lookups over loosely-shaped provider JSON.
//!
//! Webhook payloads arrive with fields at varying nesting depths and casings
//! depending on provider version. Instead of ad hoc nested `get` chains, each
//! logical field declares an ordered list of [`PathExpr`] candidates which
//! are tried in order against the raw tree; the first hit wins.

use serde_json::Value;

/// A dot-separated key path into a JSON tree, e.g. `"Body.stkCallback.ResultCode"`.
/// The empty path refers to the tree itself.
#[derive(Debug, Clone)]
pub struct PathExpr {
    segments: Vec<String>,
}

impl PathExpr {
    pub fn parse(path: &str) -> Self {
        let segments = if path.is_empty() {
            Vec::new()
        } else {
            path.split('.').map(str::to_string).collect()
        };
        Self { segments }
    }

    /// Walk the tree along this path. Keys are matched exactly; casing
    /// variants are expressed as separate candidate paths.
    pub fn eval<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut node = root;
        for seg in &self.segments {
            node = node.get(seg)?;
        }
        Some(node)
    }
}

/// Try each candidate path in order; return the first non-null hit.
pub fn first_match<'a>(root: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .filter_map(|p| PathExpr::parse(p).eval(root))
        .find(|v| !v.is_null())
}

/// Scan a `CallbackMetadata.Item`-style array of `{Name, Value}` pairs for an
/// item whose name matches one of `names` case-insensitively.
pub fn metadata_item<'a>(items: &'a Value, names: &[&str]) -> Option<&'a Value> {
    let arr = items.as_array()?;
    for item in arr {
        let name = match first_match(item, &["Name", "name"]).and_then(Value::as_str) {
            Some(n) => n,
            None => continue,
        };
        if names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return first_match(item, &["Value", "value"]);
        }
    }
    None
}

/// Read a value as f64, accepting both JSON numbers and numeric strings.
pub fn as_amount(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a value as a string, rendering bare numbers (receipt fields and
/// timestamps arrive as either).
pub fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
