use std::str::FromStr;

use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::diagnosis::{parse_timestamp, parse_uuid, to_timestamp};
use crate::db::DatabaseError;
use crate::models::{Appointment, AppointmentStatus, ResultSummary};

/// Insert an appointment row. Scheduling itself lives in the appointment
/// subsystem; this exists for that boundary and for test fixtures.
pub fn insert_appointment(conn: &Connection, appointment: &Appointment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO appointments (
            id, patient_id, doctor_id, department, appointment_date,
            status, has_visited, result
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            appointment.id.to_string(),
            appointment.patient_id.to_string(),
            appointment.doctor_id.map(|id| id.to_string()),
            appointment.department,
            appointment.appointment_date.as_ref().map(to_timestamp),
            appointment.status.as_str(),
            appointment.has_visited,
            appointment
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        ],
    )?;
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, doctor_id, department, appointment_date,
                status, has_visited, result
         FROM appointments WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![id.to_string()], read_row)?;
    rows.next().transpose()?.map(Appointment::try_from).transpose()
}

/// Attach a screening result summary, but only while the appointment is
/// still in a pending-like status. Returns whether the update applied.
pub fn update_result(
    conn: &Connection,
    id: Uuid,
    summary: &ResultSummary,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE appointments SET result = ?1
         WHERE id = ?2 AND status IN ('pending', 'accepted')",
        params![serde_json::to_string(summary)?, id.to_string()],
    )?;
    Ok(updated > 0)
}

type AppointmentRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    bool,
    Option<String>,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DatabaseError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let (id, patient_id, doctor_id, department, appointment_date, status, has_visited, result) =
            row;
        Ok(Appointment {
            id: parse_uuid(&id)?,
            patient_id: parse_uuid(&patient_id)?,
            doctor_id: doctor_id.as_deref().map(parse_uuid).transpose()?,
            department,
            appointment_date: appointment_date
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            status: AppointmentStatus::from_str(&status)?,
            has_visited,
            result: result
                .as_deref()
                .map(serde_json::from_str::<ResultSummary>)
                .transpose()?,
        })
    }
}
