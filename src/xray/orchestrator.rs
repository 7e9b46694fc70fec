//! X-ray diagnosis pipeline.
//!
//! Drives one diagnosis request end to end: intake validation, AI
//! inference, artifact uploads, detection normalization, diagnosis
//! persistence and the optional appointment link. Fatal failures abort
//! with a typed error; the annotated-image upload and the appointment
//! link are best-effort and never fail the request.
//!
//! There are no retries anywhere in this chain: a flaky inference service
//! is absorbed by the long call timeout, not by re-submitting (which would
//! double inference cost and create duplicate diagnosis records).

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use regex::Regex;
use rusqlite::Connection;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

use crate::db::repository::{appointment, diagnosis as diagnosis_repo};
use crate::db::DatabaseError;
use crate::media::{MediaStore, MediaStoreError};
use crate::models::{
    Appointment, Diagnosis, DiagnosisResult, DiagnosisStatus, ResultSummary,
};
use crate::xray::inference::{InferenceClient, InferenceError};
use crate::xray::intake::{self, IntakeError, UploadedImage};
use crate::xray::linker;
use crate::xray::normalize::{normalize_detections, round1};
use crate::xray::types::Detection;

/// Logical store folder for original uploads.
pub const ORIGINALS_FOLDER: &str = "xray_diagnoses";
/// Logical store folder for AI-annotated copies.
pub const ANNOTATED_FOLDER: &str = "xray_diagnoses/annotated";

/// Verdict text used when the AI service returned no free-text result.
pub const UNDETERMINED_VERDICT: &str = "Undetermined";

/// Fracture-indicating terms in the model's free-text verdict: the English
/// term and its Vietnamese equivalent, as the service has emitted both.
static FRACTURE_TERMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)fracture|gãy").expect("fracture term pattern"));

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Intake(#[from] IntakeError),
    #[error("Appointment does not belong to this patient")]
    PatientMismatch,
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Failed to store the X-ray image: {0}")]
    Storage(MediaStoreError),
    #[error("Failed to save the diagnosis record: {0}")]
    Persistence(DatabaseError),
}

/// One inbound diagnosis request, already authenticated.
pub struct DiagnosisRequest {
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub upload: UploadedImage,
}

/// Everything the HTTP layer needs to assemble the success response.
#[derive(Debug)]
pub struct DiagnosisOutcome {
    pub diagnosis: Diagnosis,
    /// The AI's free-text verdict (`"Undetermined"` when absent).
    pub verdict: String,
    pub appointment_id: Option<Uuid>,
    /// Whether the optional appointment link actually applied.
    pub appointment_updated: bool,
}

pub struct DiagnosisPipeline {
    db: Arc<Mutex<Connection>>,
    inference: Arc<dyn InferenceClient>,
    media: Arc<dyn MediaStore>,
}

impl DiagnosisPipeline {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        inference: Arc<dyn InferenceClient>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            db,
            inference,
            media,
        }
    }

    /// Run the full diagnosis sequence. The caller owns the temporary
    /// upload file and removes it on drop, whichever way this returns.
    pub async fn run(
        &self,
        request: DiagnosisRequest,
    ) -> Result<DiagnosisOutcome, PipelineError> {
        // Resolve the appointment up front so an ownership mismatch is
        // rejected before any external call is spent. A missing row is not
        // fatal: the diagnosis proceeds unlinked.
        let appointment = self.resolve_appointment(&request)?;

        // Local-only intake checks, also ahead of any network traffic.
        intake::validate_upload(&request.upload)?;

        let prediction = self.inference.infer(&request.upload.path).await?;
        tracing::info!(
            result = prediction.result.as_deref().unwrap_or("-"),
            raw_detections = prediction.detections.len(),
            "AI prediction received"
        );

        // Original image upload is fatal: a diagnosis without its stored
        // X-ray is useless and must not be created.
        let xray_image = self
            .media
            .upload_file(&request.upload.path, ORIGINALS_FOLDER)
            .await
            .map_err(PipelineError::Storage)?;

        // Annotated copy is optional end to end; on any failure the
        // original serves as the visual fallback.
        let annotated_image = match prediction.annotated_image.as_deref() {
            Some(data) => match self.media.upload_base64(data, ANNOTATED_FOLDER).await {
                Ok(image) => Some(image),
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        "Annotated image upload failed, continuing with original"
                    );
                    None
                }
            },
            None => None,
        };

        let detections = normalize_detections(&prediction.detections);
        let verdict = prediction
            .result
            .clone()
            .unwrap_or_else(|| UNDETERMINED_VERDICT.to_string());
        let confidence = round1(prediction.confidence.unwrap_or(0.0));
        let details = prediction
            .details
            .clone()
            .unwrap_or_else(|| format!("Confidence: {confidence:.1}%"));
        let fracture_detected = fracture_indicated(&verdict, &detections);

        let diagnosis = Diagnosis {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            xray_image,
            annotated_image,
            result: DiagnosisResult {
                fracture_detected,
                confidence,
                details,
                total_detections: detections.len(),
                detections,
            },
            doctor_note: String::new(),
            status: DiagnosisStatus::Pending,
            created_at: Utc::now(),
            reviewed_at: None,
        };

        {
            let conn = self.lock_db()?;
            diagnosis_repo::insert_diagnosis(&conn, &diagnosis).map_err(|error| {
                // The original is already stored remotely at this point and
                // is not rolled back: an orphaned artifact is preferable to
                // a delete racing the failed write. Logged for reconciliation.
                tracing::error!(
                    error = %error,
                    storage_id = %diagnosis.xray_image.storage_id,
                    "Diagnosis insert failed; stored X-ray is now orphaned"
                );
                PipelineError::Persistence(error)
            })?;
        }
        tracing::info!(diagnosis_id = %diagnosis.id, "Diagnosis saved");

        let appointment_updated = self.link_appointment(appointment.as_ref(), &diagnosis);

        Ok(DiagnosisOutcome {
            verdict,
            appointment_id: request.appointment_id,
            appointment_updated,
            diagnosis,
        })
    }

    fn resolve_appointment(
        &self,
        request: &DiagnosisRequest,
    ) -> Result<Option<Appointment>, PipelineError> {
        let Some(appointment_id) = request.appointment_id else {
            return Ok(None);
        };

        let conn = self.lock_db()?;
        match appointment::get_appointment(&conn, appointment_id)
            .map_err(PipelineError::Persistence)?
        {
            Some(appointment) if appointment.patient_id != request.patient_id => {
                Err(PipelineError::PatientMismatch)
            }
            Some(appointment) => Ok(Some(appointment)),
            None => {
                tracing::warn!(
                    appointment_id = %appointment_id,
                    "Appointment not found, continuing without link"
                );
                Ok(None)
            }
        }
    }

    /// Step 9: best-effort link. Never fails the request; the return value
    /// feeds the response's `appointmentUpdated` flag.
    fn link_appointment(&self, appointment: Option<&Appointment>, diagnosis: &Diagnosis) -> bool {
        let Some(appointment) = appointment else {
            return false;
        };

        if !appointment.status.is_pending_like() {
            tracing::info!(
                appointment_id = %appointment.id,
                status = appointment.status.as_str(),
                "Appointment already finalized, skipping result link"
            );
            return false;
        }

        let summary = build_summary(diagnosis);
        match self.lock_db() {
            Ok(conn) => linker::attach_result(&conn, appointment.id, &summary),
            Err(_) => {
                tracing::warn!(
                    appointment_id = %appointment.id,
                    "Skipping appointment link: database lock poisoned"
                );
                false
            }
        }
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Connection>, PipelineError> {
        self.db
            .lock()
            .map_err(|_| PipelineError::Persistence(DatabaseError::LockPoisoned))
    }
}

/// Two independent signals, either sufficient: structured detections win
/// even over a "normal" free-text verdict, and a fracture-flavored verdict
/// counts even with zero structured detections.
pub fn fracture_indicated(result_text: &str, detections: &[Detection]) -> bool {
    !detections.is_empty() || FRACTURE_TERMS.is_match(result_text)
}

/// Summary written onto the appointment: annotated image when present,
/// original otherwise.
fn build_summary(diagnosis: &Diagnosis) -> ResultSummary {
    let result = &diagnosis.result;
    let region = if result.details.is_empty() {
        result
            .detections
            .iter()
            .map(|detection| detection.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        result.details.clone()
    };

    ResultSummary {
        fracture_detected: result.fracture_detected,
        confidence: result.confidence,
        region,
        total_detections: result.total_detections,
        detections: result.detections.clone(),
        analyzed_at: diagnosis.created_at,
        image_url: diagnosis
            .annotated_image
            .as_ref()
            .unwrap_or(&diagnosis.xray_image)
            .url
            .clone(),
    }
}

/// Administrative removal: best-effort delete of both stored artifacts,
/// then the database row. A failed artifact delete is logged and never
/// blocks record removal. Returns whether a record existed.
pub async fn delete_diagnosis_with_artifacts(
    db: &Mutex<Connection>,
    media: &dyn MediaStore,
    id: Uuid,
) -> Result<bool, DatabaseError> {
    let diagnosis = {
        let conn = db.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        diagnosis_repo::get_diagnosis(&conn, id)?
    };
    let Some(diagnosis) = diagnosis else {
        return Ok(false);
    };

    let storage_ids = [
        Some(&diagnosis.xray_image.storage_id),
        diagnosis
            .annotated_image
            .as_ref()
            .map(|image| &image.storage_id),
    ];
    for storage_id in storage_ids.into_iter().flatten() {
        if let Err(error) = media.delete(storage_id).await {
            tracing::warn!(
                storage_id = storage_id.as_str(),
                error = %error,
                "Artifact delete failed during diagnosis removal"
            );
        }
    }

    let conn = db.lock().map_err(|_| DatabaseError::LockPoisoned)?;
    diagnosis_repo::delete_diagnosis(&conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::appointment::insert_appointment;
    use crate::db::sqlite::open_memory_database;
    use crate::media::MockMediaStore;
    use crate::models::AppointmentStatus;
    use crate::xray::inference::MockInferenceClient;
    use crate::xray::types::{BoundingBox, Prediction};
    use base64::Engine;
    use serde_json::json;
    use std::io::Write;

    fn staged_upload() -> (tempfile::NamedTempFile, UploadedImage) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x89PNG\r\n\x1a\nxray-bytes").unwrap();
        let upload = UploadedImage {
            path: file.path().to_path_buf(),
            mime_type: "image/png".into(),
            size_bytes: 2 * 1024 * 1024,
        };
        (file, upload)
    }

    fn fracture_prediction() -> Prediction {
        Prediction {
            result: Some("Fracture detected".into()),
            confidence: Some(91.27),
            details: Some("1 abnormal region".into()),
            detections: vec![json!({
                "class_name": "Suspected fracture region",
                "confidence": 91.27,
                "bbox": [10, 20, 30, 40]
            })],
            annotated_image: Some(
                base64::engine::general_purpose::STANDARD.encode(b"\x89PNG\r\n\x1a\noverlay"),
            ),
            total_detections: Some(1),
        }
    }

    struct Harness {
        db: Arc<Mutex<Connection>>,
        media: Arc<MockMediaStore>,
        pipeline: DiagnosisPipeline,
    }

    fn harness(prediction_client: MockInferenceClient, media: MockMediaStore) -> Harness {
        let db = Arc::new(Mutex::new(open_memory_database().unwrap()));
        let media = Arc::new(media);
        let pipeline = DiagnosisPipeline::new(
            db.clone(),
            Arc::new(prediction_client),
            media.clone(),
        );
        Harness {
            db,
            media,
            pipeline,
        }
    }

    fn request(patient_id: Uuid, appointment_id: Option<Uuid>) -> (tempfile::NamedTempFile, DiagnosisRequest) {
        let (file, upload) = staged_upload();
        (
            file,
            DiagnosisRequest {
                patient_id,
                appointment_id,
                upload,
            },
        )
    }

    #[tokio::test]
    async fn success_without_appointment() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new(),
        );
        let patient_id = Uuid::new_v4();
        let (_file, req) = request(patient_id, None);

        let outcome = h.pipeline.run(req).await.unwrap();
        assert!(!outcome.appointment_updated);
        assert_eq!(outcome.verdict, "Fracture detected");

        let diagnosis = &outcome.diagnosis;
        assert!(diagnosis.result.fracture_detected);
        assert_eq!(diagnosis.result.confidence, 91.3);
        assert_eq!(diagnosis.result.total_detections, 1);
        assert_eq!(
            diagnosis.result.detections[0].bounding_box,
            BoundingBox {
                x: 10,
                y: 20,
                width: 30,
                height: 40,
                x2: 40,
                y2: 60
            }
        );
        assert!(diagnosis.annotated_image.is_some());
        assert_eq!(diagnosis.status, DiagnosisStatus::Pending);

        // Both uploads landed in their folders.
        assert_eq!(
            h.media.uploaded_folders.lock().unwrap().as_slice(),
            &[ORIGINALS_FOLDER.to_string(), ANNOTATED_FOLDER.to_string()]
        );

        // Record is durable.
        let conn = h.db.lock().unwrap();
        let stored = diagnosis_repo::get_diagnosis(&conn, diagnosis.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.patient_id, patient_id);
    }

    #[tokio::test]
    async fn no_annotated_image_persists_null() {
        let prediction = Prediction {
            annotated_image: None,
            ..fracture_prediction()
        };
        let h = harness(MockInferenceClient::new(prediction), MockMediaStore::new());
        let (_file, req) = request(Uuid::new_v4(), None);

        let outcome = h.pipeline.run(req).await.unwrap();
        assert!(outcome.diagnosis.annotated_image.is_none());
        assert_eq!(
            h.media.uploaded_folders.lock().unwrap().as_slice(),
            &[ORIGINALS_FOLDER.to_string()]
        );
    }

    #[tokio::test]
    async fn malformed_annotated_image_is_non_fatal() {
        let prediction = Prediction {
            annotated_image: Some("%%%not-base64%%%".into()),
            ..fracture_prediction()
        };
        let h = harness(MockInferenceClient::new(prediction), MockMediaStore::new());
        let (_file, req) = request(Uuid::new_v4(), None);

        let outcome = h.pipeline.run(req).await.unwrap();
        assert!(outcome.diagnosis.annotated_image.is_none());
        // The diagnosis itself still persisted.
        let conn = h.db.lock().unwrap();
        assert!(diagnosis_repo::get_diagnosis(&conn, outcome.diagnosis.id)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn annotated_upload_failure_is_non_fatal() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new().with_failing_base64_uploads(),
        );
        let (_file, req) = request(Uuid::new_v4(), None);

        let outcome = h.pipeline.run(req).await.unwrap();
        assert!(outcome.diagnosis.annotated_image.is_none());
    }

    #[tokio::test]
    async fn inference_failure_creates_no_record() {
        let h = harness(MockInferenceClient::unavailable(), MockMediaStore::new());
        let (_file, req) = request(Uuid::new_v4(), None);

        let error = h.pipeline.run(req).await.unwrap_err();
        assert!(matches!(error, PipelineError::Inference(_)));

        // Nothing was uploaded and nothing was persisted.
        assert!(h.media.uploaded_folders.lock().unwrap().is_empty());
        let conn = h.db.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM diagnoses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn storage_failure_is_fatal() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new().with_failing_file_uploads(),
        );
        let (_file, req) = request(Uuid::new_v4(), None);

        let error = h.pipeline.run(req).await.unwrap_err();
        assert!(matches!(error, PipelineError::Storage(_)));

        let conn = h.db.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM diagnoses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn validation_failure_happens_before_any_external_call() {
        let h = harness(MockInferenceClient::unavailable(), MockMediaStore::new());
        let (_file, mut req) = request(Uuid::new_v4(), None);
        req.upload.mime_type = "image/bmp".into();

        // Even with the inference service down, a bad upload reports the
        // validation error — the service was never called.
        let error = h.pipeline.run(req).await.unwrap_err();
        assert!(matches!(error, PipelineError::Intake(_)));
    }

    #[tokio::test]
    async fn pending_appointment_gets_linked() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new(),
        );
        let patient_id = Uuid::new_v4();
        let row = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id: None,
            department: "Orthopedics".into(),
            appointment_date: None,
            status: AppointmentStatus::Pending,
            has_visited: false,
            result: None,
        };
        {
            let conn = h.db.lock().unwrap();
            insert_appointment(&conn, &row).unwrap();
        }

        let (_file, req) = request(patient_id, Some(row.id));
        let outcome = h.pipeline.run(req).await.unwrap();
        assert!(outcome.appointment_updated);

        let conn = h.db.lock().unwrap();
        let linked = appointment::get_appointment(&conn, row.id).unwrap().unwrap();
        let summary = linked.result.unwrap();
        assert!(summary.fracture_detected);
        assert_eq!(summary.region, "1 abnormal region");
        // Annotated image wins as the visual.
        assert!(summary.image_url.contains("annotated"));
    }

    #[tokio::test]
    async fn finalized_appointment_is_not_linked_but_diagnosis_succeeds() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new(),
        );
        let patient_id = Uuid::new_v4();
        let row = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id: None,
            department: "Orthopedics".into(),
            appointment_date: None,
            status: AppointmentStatus::Confirmed,
            has_visited: true,
            result: None,
        };
        {
            let conn = h.db.lock().unwrap();
            insert_appointment(&conn, &row).unwrap();
        }

        let (_file, req) = request(patient_id, Some(row.id));
        let outcome = h.pipeline.run(req).await.unwrap();
        assert!(!outcome.appointment_updated);

        let conn = h.db.lock().unwrap();
        assert!(diagnosis_repo::get_diagnosis(&conn, outcome.diagnosis.id)
            .unwrap()
            .is_some());
        let untouched = appointment::get_appointment(&conn, row.id).unwrap().unwrap();
        assert!(untouched.result.is_none());
    }

    #[tokio::test]
    async fn missing_appointment_proceeds_unlinked() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new(),
        );
        let (_file, req) = request(Uuid::new_v4(), Some(Uuid::new_v4()));

        let outcome = h.pipeline.run(req).await.unwrap();
        assert!(!outcome.appointment_updated);
    }

    #[tokio::test]
    async fn foreign_appointment_is_rejected_before_inference() {
        let h = harness(
            MockInferenceClient::unavailable(),
            MockMediaStore::new(),
        );
        let row = Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: None,
            department: "Orthopedics".into(),
            appointment_date: None,
            status: AppointmentStatus::Pending,
            has_visited: false,
            result: None,
        };
        {
            let conn = h.db.lock().unwrap();
            insert_appointment(&conn, &row).unwrap();
        }

        let (_file, req) = request(Uuid::new_v4(), Some(row.id));
        let error = h.pipeline.run(req).await.unwrap_err();
        assert!(matches!(error, PipelineError::PatientMismatch));
    }

    #[tokio::test]
    async fn delete_cascades_artifact_removal() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new(),
        );
        let (_file, req) = request(Uuid::new_v4(), None);
        let outcome = h.pipeline.run(req).await.unwrap();
        let diagnosis = outcome.diagnosis;

        let removed =
            delete_diagnosis_with_artifacts(&h.db, h.media.as_ref(), diagnosis.id)
                .await
                .unwrap();
        assert!(removed);

        let deleted = h.media.deleted_ids.lock().unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(deleted.contains(&diagnosis.xray_image.storage_id));
        assert!(deleted.contains(&diagnosis.annotated_image.unwrap().storage_id));

        let conn = h.db.lock().unwrap();
        assert!(diagnosis_repo::get_diagnosis(&conn, diagnosis.id)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_survives_a_failing_artifact_delete() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new(),
        );
        let (_file, req) = request(Uuid::new_v4(), None);
        let diagnosis = h.pipeline.run(req).await.unwrap().diagnosis;

        let media = MockMediaStore::new().with_failing_delete(&diagnosis.xray_image.storage_id);
        let removed = delete_diagnosis_with_artifacts(&h.db, &media, diagnosis.id)
            .await
            .unwrap();
        assert!(removed);
        // Both deletes were attempted despite the first failing.
        assert_eq!(media.deleted_ids.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_of_unknown_diagnosis_reports_false() {
        let h = harness(
            MockInferenceClient::new(fracture_prediction()),
            MockMediaStore::new(),
        );
        let removed =
            delete_diagnosis_with_artifacts(&h.db, h.media.as_ref(), Uuid::new_v4())
                .await
                .unwrap();
        assert!(!removed);
    }

    #[test]
    fn detections_win_over_a_normal_verdict() {
        let detections = vec![Detection {
            label: "Suspected fracture region".into(),
            confidence: 40.0,
            bounding_box: BoundingBox::default(),
        }];
        assert!(fracture_indicated("Bone is normal", &detections));
    }

    #[test]
    fn english_term_counts_without_detections() {
        assert!(fracture_indicated("Possible FRACTURE of distal radius", &[]));
    }

    #[test]
    fn vietnamese_term_counts_without_detections() {
        assert!(fracture_indicated("Phát hiện vùng gãy", &[]));
        assert!(fracture_indicated("GÃY xương", &[]));
    }

    #[test]
    fn normal_verdict_with_no_detections_is_negative() {
        assert!(!fracture_indicated("Xương bình thường", &[]));
        assert!(!fracture_indicated("No abnormality detected", &[]));
    }

    #[tokio::test]
    async fn missing_prediction_fields_take_defaults() {
        let h = harness(
            MockInferenceClient::new(Prediction::default()),
            MockMediaStore::new(),
        );
        let (_file, req) = request(Uuid::new_v4(), None);

        let outcome = h.pipeline.run(req).await.unwrap();
        assert_eq!(outcome.verdict, UNDETERMINED_VERDICT);
        assert!(!outcome.diagnosis.result.fracture_detected);
        assert_eq!(outcome.diagnosis.result.confidence, 0.0);
        assert_eq!(outcome.diagnosis.result.details, "Confidence: 0.0%");
        assert!(outcome.diagnosis.result.detections.is_empty());
    }
}
