pub mod appointment;
pub mod diagnosis;
