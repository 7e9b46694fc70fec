use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(DiagnosisStatus {
    Pending => "pending",
    Reviewed => "reviewed",
    Completed => "completed",
});

str_enum!(AppointmentStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
});

impl AppointmentStatus {
    /// Whether a screening result may still be attached to the appointment.
    /// Rejected, confirmed and cancelled appointments are finalized and
    /// must not have an existing result overwritten.
    pub fn is_pending_like(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}
