//! JSON value tree (§4.D): `serde_json::Value` plus a dotted/indexed
//! path-lookup helper (`a.b[0].c`) with typed, defaulted accessors. Used
//! exclusively by the glTF codec.

use serde_json::Value;

/// One step of a parsed path: a named object field, or an array index.
enum Step<'a> {
    Field(&'a str),
    Index(usize),
}

/// Parses `a.b[0].c` into a sequence of [`Step`]s. `[N]` may also appear
/// directly after a dot (`a.b.[0].c`) or standalone at the start.
fn parse_path(path: &str) -> Vec<Step<'_>> {
    let mut steps = Vec::new();
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        let mut rest = segment;
        if let Some(bracket) = rest.find('[') {
            let (field, tail) = rest.split_at(bracket);
            if !field.is_empty() {
                steps.push(Step::Field(field));
            }
            rest = tail;
            while let Some(end) = rest.find(']') {
                if let Ok(idx) = rest[1..end].parse::<usize>() {
                    steps.push(Step::Index(idx));
                }
                rest = &rest[end + 1..];
            }
        } else {
            steps.push(Step::Field(rest));
        }
    }
    steps
}

/// Walks `value` along `path`, returning `None` if any step is absent or of
/// the wrong shape (object field on a non-object, index on a non-array).
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for step in parse_path(path) {
        current = match step {
            Step::Field(name) => current.as_object()?.get(name)?,
            Step::Index(idx) => current.as_array()?.get(idx)?,
        };
    }
    Some(current)
}

pub fn as_f32(value: &Value) -> Option<f32> {
    value.as_f64().map(|v| v as f32)
}

pub fn as_f32_or(value: &Value, path: &str, default: f32) -> f32 {
    lookup(value, path).and_then(as_f32).unwrap_or(default)
}

pub fn as_str_or<'a>(value: &'a Value, path: &str, default: &'a str) -> &'a str {
    lookup(value, path).and_then(Value::as_str).unwrap_or(default)
}

pub fn as_u64_or(value: &Value, path: &str, default: u64) -> u64 {
    lookup(value, path).and_then(Value::as_u64).unwrap_or(default)
}

pub fn as_bool_or(value: &Value, path: &str, default: bool) -> bool {
    lookup(value, path).and_then(Value::as_bool).unwrap_or(default)
}

/// Reads a fixed-size float array at `path` (e.g. `[1,2,3,4]`), returning
/// `None` if absent or the wrong length.
pub fn as_f32_array<const N: usize>(value: &Value, path: &str) -> Option<[f32; N]> {
    let array = lookup(value, path)?.as_array()?;
    if array.len() != N {
        return None;
    }
    let mut result = [0f32; N];
    for (dst, src) in result.iter_mut().zip(array.iter()) {
        *dst = as_f32(src)?;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_and_indexed_lookup() {
        let doc = json!({
            "a": { "b": [ { "c": 42 } ] }
        });
        assert_eq!(lookup(&doc, "a.b[0].c").and_then(Value::as_i64), Some(42));
    }

    #[test]
    fn missing_path_is_none() {
        let doc = json!({ "a": 1 });
        assert!(lookup(&doc, "a.b.c").is_none());
        assert!(lookup(&doc, "z").is_none());
    }

    #[test]
    fn defaulted_accessors() {
        let doc = json!({ "x": 1.5 });
        assert_eq!(as_f32_or(&doc, "x", 0.0), 1.5);
        assert_eq!(as_f32_or(&doc, "missing", 9.0), 9.0);
        assert_eq!(as_str_or(&doc, "missing", "fallback"), "fallback");
    }

    #[test]
    fn fixed_float_array() {
        let doc = json!({ "v": [1.0, 2.0, 3.0, 4.0] });
        assert_eq!(as_f32_array::<4>(&doc, "v"), Some([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(as_f32_array::<3>(&doc, "v"), None);
    }
}
