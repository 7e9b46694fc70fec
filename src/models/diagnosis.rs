use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::DiagnosisStatus;
use crate::xray::types::Detection;

/// Reference to an image held by the external media store. The store owns
/// the bytes; diagnosis records hold only the identifier and public URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredImage {
    pub storage_id: String,
    pub url: String,
}

/// Canonical screening outcome embedded in a diagnosis record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisResult {
    pub fracture_detected: bool,
    /// 0–100, one decimal place.
    pub confidence: f64,
    pub details: String,
    pub detections: Vec<Detection>,
    pub total_detections: usize,
}

/// Durable record of one inference request's outcome. Created exactly once
/// per successful pipeline run; only `status`, `doctor_note` and
/// `reviewed_at` change afterwards (clinical review, handled elsewhere).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub xray_image: StoredImage,
    /// Present only when the AI service returned a decodable annotated image.
    pub annotated_image: Option<StoredImage>,
    pub result: DiagnosisResult,
    pub doctor_note: String,
    pub status: DiagnosisStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnosis_serializes_camel_case() {
        let diagnosis = Diagnosis {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            xray_image: StoredImage {
                storage_id: "xray_diagnoses/abc".into(),
                url: "https://media.example/xray_diagnoses/abc.png".into(),
            },
            annotated_image: None,
            result: DiagnosisResult {
                fracture_detected: false,
                confidence: 0.0,
                details: String::new(),
                detections: vec![],
                total_detections: 0,
            },
            doctor_note: String::new(),
            status: DiagnosisStatus::Pending,
            created_at: Utc::now(),
            reviewed_at: None,
        };

        let json = serde_json::to_value(&diagnosis).unwrap();
        assert!(json["patientId"].is_string());
        assert!(json["xrayImage"]["storageId"].is_string());
        assert!(json["annotatedImage"].is_null());
        assert_eq!(json["result"]["totalDetections"], 0);
        assert_eq!(json["status"], "pending");
    }
}
