//! Best-effort appointment linking.
//!
//! Attaches a screening result summary to an appointment the caller has
//! already fetched and vetted (existence, ownership, status eligibility).
//! Nothing here ever propagates an error: a failed link is logged and
//! reported as `false`, and the diagnosis request succeeds regardless.

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository::appointment;
use crate::models::ResultSummary;

/// Attach `summary` to the appointment. Returns whether the update
/// actually applied (the row may have reached a finalized status in the
/// meantime — the conditional update re-checks).
pub fn attach_result(conn: &Connection, appointment_id: Uuid, summary: &ResultSummary) -> bool {
    match appointment::update_result(conn, appointment_id, summary) {
        Ok(true) => {
            tracing::info!(appointment_id = %appointment_id, "Appointment updated with screening result");
            true
        }
        Ok(false) => {
            tracing::warn!(
                appointment_id = %appointment_id,
                "Appointment link skipped: row missing or already finalized"
            );
            false
        }
        Err(error) => {
            tracing::warn!(
                appointment_id = %appointment_id,
                error = %error,
                "Failed to attach screening result to appointment"
            );
            false
        }
    }
}
