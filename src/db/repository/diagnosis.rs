use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{Diagnosis, DiagnosisResult, DiagnosisStatus, StoredImage};

pub fn insert_diagnosis(conn: &Connection, diagnosis: &Diagnosis) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO diagnoses (
            id, patient_id, xray_storage_id, xray_url,
            annotated_storage_id, annotated_url,
            fracture_detected, confidence, details, detections, total_detections,
            doctor_note, status, created_at, reviewed_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            diagnosis.id.to_string(),
            diagnosis.patient_id.to_string(),
            diagnosis.xray_image.storage_id,
            diagnosis.xray_image.url,
            diagnosis
                .annotated_image
                .as_ref()
                .map(|image| image.storage_id.clone()),
            diagnosis.annotated_image.as_ref().map(|image| image.url.clone()),
            diagnosis.result.fracture_detected,
            diagnosis.result.confidence,
            diagnosis.result.details,
            serde_json::to_string(&diagnosis.result.detections)?,
            diagnosis.result.total_detections as i64,
            diagnosis.doctor_note,
            diagnosis.status.as_str(),
            to_timestamp(&diagnosis.created_at),
            diagnosis.reviewed_at.as_ref().map(to_timestamp),
        ],
    )?;
    Ok(())
}

pub fn get_diagnosis(conn: &Connection, id: Uuid) -> Result<Option<Diagnosis>, DatabaseError> {
    let mut stmt = conn.prepare(&format!("{SELECT_DIAGNOSIS} WHERE id = ?1"))?;
    let mut rows = stmt.query_map(params![id.to_string()], read_row)?;
    rows.next().transpose()?.map(Diagnosis::try_from).transpose()
}

/// Most recent diagnoses for a patient, newest first.
pub fn list_by_patient(
    conn: &Connection,
    patient_id: Uuid,
    limit: usize,
) -> Result<Vec<Diagnosis>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_DIAGNOSIS} WHERE patient_id = ?1 ORDER BY created_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![patient_id.to_string(), limit as i64], read_row)?;

    let mut diagnoses = Vec::new();
    for row in rows {
        diagnoses.push(Diagnosis::try_from(row?)?);
    }
    Ok(diagnoses)
}

/// Remove a diagnosis record. Returns whether a row was deleted. Remote
/// artifact cleanup happens in the orchestration layer before this call.
pub fn delete_diagnosis(conn: &Connection, id: Uuid) -> Result<bool, DatabaseError> {
    let deleted = conn.execute("DELETE FROM diagnoses WHERE id = ?1", params![id.to_string()])?;
    Ok(deleted > 0)
}

const SELECT_DIAGNOSIS: &str = "SELECT
    id, patient_id, xray_storage_id, xray_url,
    annotated_storage_id, annotated_url,
    fracture_detected, confidence, details, detections, total_detections,
    doctor_note, status, created_at, reviewed_at
 FROM diagnoses";

/// Raw row image; string fields are parsed in `TryFrom<DiagnosisRow>` so
/// rusqlite's row mapping stays infallible.
struct DiagnosisRow {
    id: String,
    patient_id: String,
    xray_storage_id: String,
    xray_url: String,
    annotated_storage_id: Option<String>,
    annotated_url: Option<String>,
    fracture_detected: bool,
    confidence: f64,
    details: String,
    detections: String,
    total_detections: i64,
    doctor_note: String,
    status: String,
    created_at: String,
    reviewed_at: Option<String>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<DiagnosisRow> {
    Ok(DiagnosisRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        xray_storage_id: row.get(2)?,
        xray_url: row.get(3)?,
        annotated_storage_id: row.get(4)?,
        annotated_url: row.get(5)?,
        fracture_detected: row.get(6)?,
        confidence: row.get(7)?,
        details: row.get(8)?,
        detections: row.get(9)?,
        total_detections: row.get(10)?,
        doctor_note: row.get(11)?,
        status: row.get(12)?,
        created_at: row.get(13)?,
        reviewed_at: row.get(14)?,
    })
}

impl TryFrom<DiagnosisRow> for Diagnosis {
    type Error = DatabaseError;

    fn try_from(row: DiagnosisRow) -> Result<Self, Self::Error> {
        let annotated_image = match (row.annotated_storage_id, row.annotated_url) {
            (Some(storage_id), Some(url)) => Some(StoredImage { storage_id, url }),
            _ => None,
        };

        Ok(Diagnosis {
            id: parse_uuid(&row.id)?,
            patient_id: parse_uuid(&row.patient_id)?,
            xray_image: StoredImage {
                storage_id: row.xray_storage_id,
                url: row.xray_url,
            },
            annotated_image,
            result: DiagnosisResult {
                fracture_detected: row.fracture_detected,
                confidence: row.confidence,
                details: row.details,
                detections: serde_json::from_str(&row.detections)?,
                total_detections: row.total_detections as usize,
            },
            doctor_note: row.doctor_note,
            status: DiagnosisStatus::from_str(&row.status)?,
            created_at: parse_timestamp(&row.created_at)?,
            reviewed_at: row.reviewed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

pub(crate) fn to_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp '{raw}': {e}")))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}
