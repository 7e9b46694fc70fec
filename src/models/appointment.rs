use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AppointmentStatus;
use crate::xray::types::Detection;

/// Appointment row as seen by the X-ray pipeline. Scheduling fields and
/// their validation belong to the appointment-management subsystem; this
/// side only reads the row and attaches a screening result summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub department: String,
    pub appointment_date: Option<DateTime<Utc>>,
    pub status: AppointmentStatus,
    pub has_visited: bool,
    pub result: Option<ResultSummary>,
}

/// Screening result summary embedded on an appointment. Written best-effort
/// after a diagnosis is persisted; a write failure never fails the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub fracture_detected: bool,
    pub confidence: f64,
    /// Human-readable summary: the AI-provided detail text, or the joined
    /// detection labels when no detail text came back.
    pub region: String,
    pub total_detections: usize,
    pub detections: Vec<Detection>,
    pub analyzed_at: DateTime<Utc>,
    /// Annotated image when available, otherwise the original upload.
    pub image_url: String,
}
