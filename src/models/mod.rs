pub mod appointment;
pub mod diagnosis;
pub mod enums;

pub use appointment::{Appointment, ResultSummary};
pub use diagnosis::{Diagnosis, DiagnosisResult, StoredImage};
pub use enums::{AppointmentStatus, DiagnosisStatus};
