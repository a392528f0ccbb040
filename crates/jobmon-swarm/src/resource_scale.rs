//! §9 "Resource scaling callable or iterator or number": a requested-resource
//! value that grows between retries of an ADJUSTING_RESOURCES task. The
//! original's third variant — a user-supplied callable — cannot cross the
//! HTTP/JSON boundary this swarm talks over, so this port's tagged variant
//! narrows to `Number` and `Sequence` (see DESIGN.md for that decision).

use serde_json::Value;

#[derive(Debug, Clone)]
pub enum ResourceScale {
    /// `new = ceil(old * (1 + factor))`.
    Number(f64),
    /// `new = ceil(old * (1 + values[cursor]))`; exhausted once `cursor`
    /// runs past the end.
    Sequence(Vec<f64>),
}

impl ResourceScale {
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(ResourceScale::Number),
            Value::Array(items) => {
                let nums: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
                if nums.is_empty() {
                    None
                } else {
                    Some(ResourceScale::Sequence(nums))
                }
            }
            _ => None,
        }
    }
}

/// Apply a scale to `old`, returning `None` on an exhausted sequence (the
/// caller logs a warning and keeps the old value, per §9).
pub fn apply_scale(scale: &ResourceScale, cursor: usize, old: f64) -> Option<f64> {
    match scale {
        ResourceScale::Number(factor) => Some((old * (1.0 + factor)).ceil()),
        ResourceScale::Sequence(values) => values.get(cursor).map(|v| (old * (1.0 + v)).ceil()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_scale_never_rounds_down() {
        // §8 boundary behavior: value 1, scale 0.2 -> ceil(1.2) = 2.
        let scale = ResourceScale::parse(&serde_json::json!(0.2)).unwrap();
        assert_eq!(apply_scale(&scale, 0, 1.0), Some(2.0));
    }

    #[test]
    fn sequence_scale_advances_by_cursor() {
        let scale = ResourceScale::parse(&serde_json::json!([0.5, 1.0])).unwrap();
        assert_eq!(apply_scale(&scale, 0, 2.0), Some(3.0));
        assert_eq!(apply_scale(&scale, 1, 2.0), Some(4.0));
        assert_eq!(apply_scale(&scale, 2, 2.0), None);
    }
}
