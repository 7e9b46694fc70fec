//! Detection normalization — converts whatever shape the inference service
//! returned into the canonical [`Detection`] form.
//!
//! The service has shipped three box encodings over time (`[x,y,w,h]`
//! arrays, `{x1,y1,x2,y2}` corner pairs, `{x,y,width,height}` objects with
//! `w`/`h` aliases). Each raw item is classified into a [`BoxFormat`] once;
//! nothing downstream re-inspects the raw payload. Deterministic and
//! side-effect-free; a malformed item degrades to a zero box instead of
//! aborting the pipeline.

use serde_json::Value;

use super::types::{BoundingBox, BoxFormat, Detection};

/// Label used when the AI payload carries no class information at all.
pub const FALLBACK_LABEL: &str = "Suspected fracture region";

/// Normalize a raw detection list. Empty input yields empty output.
pub fn normalize_detections(raw: &[Value]) -> Vec<Detection> {
    raw.iter().map(normalize_detection).collect()
}

fn normalize_detection(item: &Value) -> Detection {
    let label = ["class_name", "class", "label"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .unwrap_or(FALLBACK_LABEL)
        .to_string();

    let confidence = round1(item.get("confidence").and_then(as_f64).unwrap_or(0.0));

    let bounding_box = classify_box(item.get("bbox").or_else(|| item.get("box")))
        .to_bounding_box();

    Detection {
        label,
        confidence,
        bounding_box,
    }
}

/// Decode a raw box value into one of the known encodings.
pub fn classify_box(value: Option<&Value>) -> BoxFormat {
    let Some(value) = value else {
        return BoxFormat::Unknown;
    };

    if let Some(items) = value.as_array() {
        if items.len() == 4 {
            let mut coords = [0.0; 4];
            for (slot, item) in coords.iter_mut().zip(items) {
                match as_f64(item) {
                    Some(n) => *slot = n,
                    None => return BoxFormat::Unknown,
                }
            }
            return BoxFormat::Array(coords);
        }
        return BoxFormat::Unknown;
    }

    if let Some(object) = value.as_object() {
        let field = |key: &str| object.get(key).and_then(as_f64);

        if object.contains_key("x1") {
            return BoxFormat::Corners {
                x1: field("x1").unwrap_or(0.0),
                y1: field("y1").unwrap_or(0.0),
                x2: field("x2").unwrap_or(0.0),
                y2: field("y2").unwrap_or(0.0),
            };
        }
        if object.contains_key("x") {
            return BoxFormat::Size {
                x: field("x").unwrap_or(0.0),
                y: field("y").unwrap_or(0.0),
                width: field("width").or_else(|| field("w")).unwrap_or(0.0),
                height: field("height").or_else(|| field("h")).unwrap_or(0.0),
            };
        }
    }

    BoxFormat::Unknown
}

impl BoxFormat {
    /// Convert to the canonical rectangle. All coordinates round to the
    /// nearest integer; `x2 = x + width` and `y2 = y + height` hold for
    /// every variant.
    pub fn to_bounding_box(&self) -> BoundingBox {
        match *self {
            BoxFormat::Array([x, y, width, height])
            | BoxFormat::Size {
                x,
                y,
                width,
                height,
            } => {
                let (x, y) = (round(x), round(y));
                let (width, height) = (round(width), round(height));
                BoundingBox {
                    x,
                    y,
                    width,
                    height,
                    x2: x + width,
                    y2: y + height,
                }
            }
            BoxFormat::Corners { x1, y1, x2, y2 } => {
                let (x, y) = (round(x1), round(y1));
                let (x2, y2) = (round(x2), round(y2));
                BoundingBox {
                    x,
                    y,
                    width: x2 - x,
                    height: y2 - y,
                    x2,
                    y2,
                }
            }
            BoxFormat::Unknown => BoundingBox::default(),
        }
    }
}

/// Round a confidence value to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round(value: f64) -> i64 {
    value.round() as i64
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}
