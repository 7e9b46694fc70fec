//! X-ray diagnosis endpoints.
//!
//! `POST /diagnose` receives the multipart upload, stages it in a
//! request-owned temp file and hands off to the diagnosis pipeline. The
//! temp file is removed on drop, whichever way the request exits. The
//! read endpoints serve a patient's own history and single records;
//! deletion is administrative and cascades artifact cleanup.

use axum::extract::{Multipart, Path, State};
use axum::Extension;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Principal, Role};
use crate::db::repository::diagnosis as diagnosis_repo;
use crate::models::Diagnosis;
use crate::xray::intake::{IntakeError, UploadedImage};
use crate::xray::orchestrator::{
    delete_diagnosis_with_artifacts, DiagnosisRequest,
};
use crate::xray::types::Detection;

/// History page size: the 50 most recent diagnoses.
const HISTORY_LIMIT: usize = 50;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseResponse {
    pub success: bool,
    pub message: String,
    pub appointment_updated: bool,
    pub data: DiagnoseData,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseData {
    pub diagnosis_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub image_url: String,
    /// Annotated image when available, otherwise the original upload.
    pub annotated_image: String,
    pub result: String,
    pub confidence: f64,
    pub details: String,
    pub total_detections: usize,
    pub detections: Vec<Detection>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub count: usize,
    pub history: Vec<Diagnosis>,
}

#[derive(Serialize)]
pub struct DetailResponse {
    pub success: bool,
    pub diagnosis: Diagnosis,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /diagnose` — run the full screening pipeline on an uploaded X-ray.
pub async fn diagnose(
    State(ctx): State<ApiContext>,
    Extension(principal): Extension<Principal>,
    multipart: Multipart,
) -> Result<Json<DiagnoseResponse>, ApiError> {
    if principal.role != Role::Patient {
        return Err(ApiError::Forbidden(
            "Only patients can submit X-rays for screening".into(),
        ));
    }

    let (staging, upload, appointment_id) = read_multipart(multipart).await?;

    tracing::info!(
        patient_id = %principal.user_id,
        appointment_id = ?appointment_id,
        size_bytes = upload.size_bytes,
        "X-ray diagnosis request received"
    );

    let outcome = ctx
        .pipeline()
        .run(DiagnosisRequest {
            patient_id: principal.user_id,
            appointment_id,
            upload,
        })
        .await?;

    // Staged upload removed here on success; drop also runs on every
    // early-error return above.
    drop(staging);

    let diagnosis = outcome.diagnosis;
    let annotated_image = diagnosis
        .annotated_image
        .as_ref()
        .unwrap_or(&diagnosis.xray_image)
        .url
        .clone();

    Ok(Json(DiagnoseResponse {
        success: true,
        message: "X-ray analysis completed".into(),
        appointment_updated: outcome.appointment_updated,
        data: DiagnoseData {
            diagnosis_id: diagnosis.id,
            patient_id: diagnosis.patient_id,
            appointment_id: outcome.appointment_id,
            image_url: diagnosis.xray_image.url.clone(),
            annotated_image,
            result: outcome.verdict,
            confidence: diagnosis.result.confidence,
            details: diagnosis.result.details.clone(),
            total_detections: diagnosis.result.total_detections,
            detections: diagnosis.result.detections.clone(),
            timestamp: diagnosis.created_at,
        },
    }))
}

/// `GET /history/:patient_id` — a patient's own diagnoses, newest first.
pub async fn history(
    State(ctx): State<ApiContext>,
    Extension(principal): Extension<Principal>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, ApiError> {
    authorize_record_access(&principal, patient_id)?;

    let history = {
        let conn = lock_db(&ctx)?;
        diagnosis_repo::list_by_patient(&conn, patient_id, HISTORY_LIMIT)?
    };

    Ok(Json(HistoryResponse {
        success: true,
        count: history.len(),
        history,
    }))
}

/// `GET /:id` — one diagnosis by identifier.
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailResponse>, ApiError> {
    let diagnosis = {
        let conn = lock_db(&ctx)?;
        diagnosis_repo::get_diagnosis(&conn, id)?
    }
    .ok_or_else(|| ApiError::NotFound("Diagnosis not found".into()))?;

    authorize_record_access(&principal, diagnosis.patient_id)?;

    Ok(Json(DetailResponse {
        success: true,
        diagnosis,
    }))
}

/// `DELETE /:id` — administrative removal with artifact cascade.
pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if principal.role != Role::Admin {
        return Err(ApiError::Forbidden(
            "Only administrators can delete diagnoses".into(),
        ));
    }

    let removed = delete_diagnosis_with_artifacts(&ctx.db, ctx.media.as_ref(), id).await?;
    if !removed {
        return Err(ApiError::NotFound("Diagnosis not found".into()));
    }

    Ok(Json(DeleteResponse {
        success: true,
        message: "Diagnosis deleted".into(),
    }))
}

/// Patients may only touch their own records; administrators see all.
fn authorize_record_access(principal: &Principal, owner: Uuid) -> Result<(), ApiError> {
    match principal.role {
        Role::Admin => Ok(()),
        Role::Patient if principal.user_id == owner => Ok(()),
        Role::Patient => Err(ApiError::Forbidden(
            "You can only access your own diagnoses".into(),
        )),
    }
}

/// Pull the `xrayImage` file and optional `appointmentId` text field out of
/// the multipart body, staging the image bytes in a temp file the caller
/// owns for the rest of the request.
async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(tempfile::NamedTempFile, UploadedImage, Option<Uuid>), ApiError> {
    let mut staged: Option<(tempfile::NamedTempFile, UploadedImage)> = None;
    let mut appointment_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().map(|name| name.to_string());
        match name.as_deref() {
            Some("xrayImage") => {
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;

                let staging = tempfile::Builder::new()
                    .prefix("xray_upload_")
                    .tempfile()
                    .map_err(|e| ApiError::Internal(format!("Staging file: {e}")))?;
                std::fs::write(staging.path(), &bytes)
                    .map_err(|e| ApiError::Internal(format!("Staging write: {e}")))?;

                let upload = UploadedImage {
                    path: staging.path().to_path_buf(),
                    mime_type,
                    size_bytes: bytes.len() as u64,
                };
                staged = Some((staging, upload));
            }
            Some("appointmentId") => {
                let text = field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read appointmentId: {e}"))
                })?;
                let text = text.trim();
                if !text.is_empty() {
                    appointment_id = Some(Uuid::parse_str(text).map_err(|_| {
                        ApiError::BadRequest("appointmentId is not a valid id".into())
                    })?);
                }
            }
            _ => {}
        }
    }

    let (staging, upload) =
        staged.ok_or_else(|| ApiError::BadRequest(IntakeError::MissingFile.to_string()))?;
    Ok((staging, upload, appointment_id))
}

fn lock_db(
    ctx: &ApiContext,
) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, ApiError> {
    ctx.db
        .lock()
        .map_err(|_| ApiError::Internal("database lock poisoned".into()))
}
