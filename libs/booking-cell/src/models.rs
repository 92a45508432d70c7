use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// One patient-doctor reservation of exactly one schedule slot.
///
/// `scheduled_at` is the absolute instant; `slot_date`/`slot_time` are the
/// clinic-local labels cached for display and querying, recomputed from
/// `scheduled_at` whenever it is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// Opaque foreign keys resolved by external directory services.
    pub location_id: Option<Uuid>,
    pub specialty_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub slot_date: NaiveDate,
    pub slot_time: NaiveTime,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    /// Contact the confirmation code went to; set while pending only.
    pub otp_contact: Option<String>,
    /// Deadline for OTP confirmation; drives the expiry sweep.
    pub otp_expires_at: Option<DateTime<Utc>>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Expired,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Expired => write!(f, "expired"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// Clinic-local calendar date and slot label, validated against the grid.
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub reason: Option<String>,
    pub location_id: Option<Uuid>,
    pub specialty_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRequest {
    /// When both are given, booked slots without a live appointment for that
    /// doctor/date are also released.
    pub doctor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub orphans_released: usize,
}

/// How the confirmation code left the building. Delivery trouble is a soft
/// warning on an otherwise successful booking, never a rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpDispatch {
    pub sent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingResponse {
    pub appointment: Appointment,
    pub otp: OtpDispatch,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Slot is already booked")]
    AlreadyBooked,

    #[error("No such slot for this doctor and date")]
    SlotNotFound,

    #[error("Requested slot is in the past")]
    InPast,

    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Appointment cannot change state from {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Incorrect code; {remaining} attempts left")]
    CodeIncorrect { remaining: i32 },

    #[error("Verification code expired")]
    CodeExpired,

    #[error("Verification attempts exceeded")]
    AttemptsExceeded,

    #[error("No active verification code; request a new one")]
    CodeNotFound,

    #[error("A code was sent recently; retry in {remaining_seconds}s")]
    CooldownActive { remaining_seconds: i64 },

    #[error("Database error: {0}")]
    DatabaseError(String),
}
