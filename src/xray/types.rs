//! Canonical detection types and the untrusted AI payload shape.

use serde::{Deserialize, Serialize};

/// Normalized rectangle. `x2`/`y2` are redundant with `x + width` /
/// `y + height` but carried explicitly because front-ends consume both
/// corner and size forms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub x2: i64,
    pub y2: i64,
}

/// One located finding within an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// 0–100, one decimal place.
    pub confidence: f64,
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
}

/// The bounding-box encodings observed across iterations of the inference
/// service. Decoded once at the boundary; downstream code only ever sees
/// [`BoundingBox`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoxFormat {
    /// `[x, y, width, height]`
    Array([f64; 4]),
    /// `{x1, y1, x2, y2}`
    Corners { x1: f64, y1: f64, x2: f64, y2: f64 },
    /// `{x, y, width|w, height|h}`
    Size {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Anything else. Yields a zero box rather than aborting the pipeline.
    Unknown,
}

/// Response body from the inference service. The schema is not trusted:
/// every field is optional and defended against at the call site.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Prediction {
    pub result: Option<String>,
    pub confidence: Option<f64>,
    pub details: Option<String>,
    /// Raw detection objects; normalized by [`crate::xray::normalize`].
    #[serde(default)]
    pub detections: Vec<serde_json::Value>,
    /// Base64-encoded annotated image, sometimes wrapped in a data URL.
    pub annotated_image: Option<String>,
    /// Advisory only; the normalized detection count is authoritative.
    pub total_detections: Option<u32>,
}
