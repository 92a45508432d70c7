use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use otp_cell::models::{OtpError, VerifyOutcome};
use otp_cell::services::otp::OtpService;
use schedule_cell::models::ScheduleError;
use schedule_cell::services::store::ScheduleStore;
use schedule_cell::services::timegrid;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentStatus, BookingError, BookingResponse, CreateAppointmentRequest,
    OtpDispatch, SweepReport,
};
use crate::services::lifecycle::AppointmentLifecycle;
use crate::services::notify::{ContactNotifier, WebhookNotifier};

/// OTP purpose tag for booking confirmations; scopes tokens away from any
/// other code flows sharing the table.
pub const OTP_PURPOSE_BOOKING: &str = "booking";

impl From<ScheduleError> for BookingError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::NoSuchSlot => BookingError::SlotNotFound,
            ScheduleError::AlreadyBooked => BookingError::AlreadyBooked,
            ScheduleError::DatabaseError(msg) => BookingError::DatabaseError(msg),
        }
    }
}

impl From<OtpError> for BookingError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::CooldownActive { remaining_seconds } => {
                BookingError::CooldownActive { remaining_seconds }
            }
            OtpError::DatabaseError(msg) => BookingError::DatabaseError(msg),
        }
    }
}

/// Orchestrates the booking saga across the schedule store, the OTP service
/// and the appointment rows.
///
/// The service holds no in-memory booking state at all. Every decision that
/// two instances could race on is settled by a conditional write, so the
/// deployment can scale out without coordination.
pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    schedule: ScheduleStore,
    otp: OtpService,
    notifier: Arc<dyn ContactNotifier>,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            schedule: ScheduleStore::with_client(supabase.clone()),
            otp: OtpService::with_client(supabase.clone(), config),
            notifier: Arc::new(WebhookNotifier::new(config)),
            supabase,
        }
    }

    /// Wire in a custom notifier, used by tests and alternative transports.
    pub fn with_notifier(config: &AppConfig, notifier: Arc<dyn ContactNotifier>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            schedule: ScheduleStore::with_client(supabase.clone()),
            otp: OtpService::with_client(supabase.clone(), config),
            notifier,
            supabase,
        }
    }

    fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    fn appointment_path(id: Uuid) -> String {
        format!("/rest/v1/appointments?id=eq.{}", id)
    }

    fn parse_one(rows: Vec<Value>) -> Result<Appointment, BookingError> {
        let row = rows.into_iter().next().ok_or(BookingError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    /// Resolve the contact address the confirmation code goes to.
    async fn patient_contact(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<String, BookingError> {
        let path = format!("/rest/v1/patients?id=eq.{}&select=email", patient_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .and_then(|row| row.get("email").and_then(Value::as_str).map(String::from))
            .ok_or(BookingError::PatientNotFound)
    }

    /// Book a slot: reserve, persist a pending appointment, then dispatch the
    /// confirmation code.
    ///
    /// The reservation is the only step that must not double-apply; it is a
    /// compare-and-set in the schedule store. Everything after it either
    /// succeeds, compensates by releasing the slot, or degrades to a warning.
    pub async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<BookingResponse, BookingError> {
        if !timegrid::is_bookable(request.date, request.time) {
            return Err(BookingError::SlotNotFound);
        }

        let scheduled_at = timegrid::to_absolute(request.date, request.time);
        if scheduled_at <= Utc::now() {
            return Err(BookingError::InPast);
        }

        let contact = self.patient_contact(request.patient_id, auth_token).await?;

        self.schedule
            .reserve_slot(request.doctor_id, request.date, request.time, auth_token)
            .await?;

        let appointment = match self
            .insert_pending(&request, &contact, auth_token)
            .await
        {
            Ok(appointment) => appointment,
            Err(err) => {
                // Compensate: the slot must not stay booked for a row that
                // never existed.
                warn!("Appointment insert failed, releasing slot: {}", err);
                if let Err(release_err) = self
                    .schedule
                    .release_slot(request.doctor_id, request.date, request.time, auth_token)
                    .await
                {
                    error!("Compensating release also failed: {}", release_err);
                }
                return Err(err);
            }
        };

        let otp = self.dispatch_code(&contact, auth_token).await;

        info!(
            "Booked appointment {} for patient {} with doctor {} at {}",
            appointment.id, appointment.patient_id, appointment.doctor_id, appointment.scheduled_at
        );

        Ok(BookingResponse { appointment, otp })
    }

    async fn insert_pending(
        &self,
        request: &CreateAppointmentRequest,
        contact: &str,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let now = Utc::now();
        let scheduled_at = timegrid::to_absolute(request.date, request.time);
        let otp_deadline = now + chrono::Duration::minutes(self.otp.policy().ttl_minutes);

        let row = json!({
            "id": Uuid::new_v4(),
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "location_id": request.location_id,
            "specialty_id": request.specialty_id,
            "scheduled_at": scheduled_at.to_rfc3339(),
            "slot_date": request.date,
            "slot_time": request.time.format("%H:%M:%S").to_string(),
            "status": AppointmentStatus::Pending.to_string(),
            "reason": request.reason,
            "otp_contact": contact,
            "otp_expires_at": otp_deadline.to_rfc3339(),
            "is_verified": false,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let inserted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(row),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        Self::parse_one(inserted)
    }

    /// Issue and deliver a code. Neither a cooldown refusal nor a transport
    /// failure fails the booking; both surface as warnings on the response.
    async fn dispatch_code(&self, contact: &str, auth_token: &str) -> OtpDispatch {
        let issued = match self.otp.issue(contact, OTP_PURPOSE_BOOKING, auth_token).await {
            Ok(issued) => issued,
            Err(OtpError::CooldownActive { remaining_seconds }) => {
                return OtpDispatch {
                    sent: false,
                    expires_at: None,
                    warning: Some(format!(
                        "A code was sent recently; retry in {}s",
                        remaining_seconds
                    )),
                };
            }
            Err(err) => {
                warn!("Code issue failed for {}: {}", contact, err);
                return OtpDispatch {
                    sent: false,
                    expires_at: None,
                    warning: Some("Could not issue a confirmation code".to_string()),
                };
            }
        };

        match self
            .notifier
            .send_code(contact, &issued.code, issued.expires_at)
            .await
        {
            Ok(()) => OtpDispatch {
                sent: true,
                expires_at: Some(issued.expires_at),
                warning: None,
            },
            Err(err) => {
                warn!("Code delivery failed for {}: {}", contact, err);
                OtpDispatch {
                    sent: false,
                    expires_at: Some(issued.expires_at),
                    warning: Some("Confirmation code could not be delivered".to_string()),
                }
            }
        }
    }

    pub async fn get_appointment(
        &self,
        id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &Self::appointment_path(id), Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        Self::parse_one(rows)
    }

    /// Apply a status transition with a status guard in the filter. An empty
    /// result means another writer got there first (or the row is gone), so
    /// at most one caller ever observes success for a given transition.
    async fn guarded_transition(
        &self,
        id: Uuid,
        from: &[AppointmentStatus],
        patch: Value,
        auth_token: &str,
    ) -> Result<Option<Appointment>, BookingError> {
        let guard = if from.len() == 1 {
            format!("status=eq.{}", from[0])
        } else {
            let names: Vec<String> = from.iter().map(|s| s.to_string()).collect();
            format!("status=in.({})", names.join(","))
        };
        let path = format!("{}&{}", Self::appointment_path(id), guard);

        let updated: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(patch),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        match updated.into_iter().next() {
            None => Ok(None),
            Some(row) => serde_json::from_value(row).map(Some).map_err(|e| {
                BookingError::DatabaseError(format!("Failed to parse appointment: {}", e))
            }),
        }
    }

    /// A guarded update matched nothing: another writer moved the row first.
    /// Re-read it so the rejection names the state the row actually reached.
    async fn transition_conflict(&self, id: Uuid, auth_token: &str) -> BookingError {
        match self.get_appointment(id, auth_token).await {
            Ok(current) => BookingError::InvalidStatusTransition(current.status),
            Err(err) => err,
        }
    }

    /// Confirm a pending appointment with its one-time code.
    pub async fn confirm_appointment(
        &self,
        id: Uuid,
        code: &str,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let appointment = self.get_appointment(id, auth_token).await?;

        AppointmentLifecycle::check_transition(&appointment.status, &AppointmentStatus::Confirmed)?;

        let contact = appointment
            .otp_contact
            .clone()
            .ok_or(BookingError::CodeNotFound)?;

        let outcome = self
            .otp
            .verify(&contact, OTP_PURPOSE_BOOKING, code, auth_token)
            .await?;

        match outcome {
            VerifyOutcome::Verified => {
                let patch = json!({
                    "status": AppointmentStatus::Confirmed.to_string(),
                    "is_verified": true,
                    "otp_contact": Value::Null,
                    "otp_expires_at": Value::Null,
                    "updated_at": Utc::now().to_rfc3339()
                });
                let confirmed = match self
                    .guarded_transition(id, &[AppointmentStatus::Pending], patch, auth_token)
                    .await?
                {
                    Some(confirmed) => confirmed,
                    None => return Err(self.transition_conflict(id, auth_token).await),
                };

                info!("Appointment {} confirmed", id);
                Ok(confirmed)
            }
            VerifyOutcome::Incorrect { remaining_attempts } => Err(BookingError::CodeIncorrect {
                remaining: remaining_attempts,
            }),
            // A missing token is not fatal: issuance may have failed or been
            // throttled at booking time. The pending hold stays alive so a
            // resend can still recover it.
            VerifyOutcome::NotFound => Err(BookingError::CodeNotFound),
            VerifyOutcome::Expired => {
                // The code is gone for good; the pending hold is dead too.
                self.expire_appointment(&appointment, auth_token).await?;
                Err(BookingError::CodeExpired)
            }
            VerifyOutcome::AttemptsExceeded => {
                self.expire_appointment(&appointment, auth_token).await?;
                Err(BookingError::AttemptsExceeded)
            }
        }
    }

    /// Expire a pending appointment and free its slot. The status guard makes
    /// this race-safe: only the writer that flips pending to expired performs
    /// the release, so the slot is released exactly once.
    async fn expire_appointment(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<bool, BookingError> {
        let patch = json!({
            "status": AppointmentStatus::Expired.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let expired = self
            .guarded_transition(
                appointment.id,
                &[AppointmentStatus::Pending],
                patch,
                auth_token,
            )
            .await?;

        if expired.is_none() {
            debug!("Appointment {} already left pending", appointment.id);
            return Ok(false);
        }

        self.schedule
            .release_slot(
                appointment.doctor_id,
                appointment.slot_date,
                appointment.slot_time,
                auth_token,
            )
            .await?;

        info!("Appointment {} expired, slot released", appointment.id);
        Ok(true)
    }

    /// Re-send the confirmation code for a pending appointment. Subject to
    /// the resend cooldown, which surfaces as `CooldownActive`.
    pub async fn resend_otp(
        &self,
        id: Uuid,
        auth_token: &str,
    ) -> Result<OtpDispatch, BookingError> {
        let appointment = self.get_appointment(id, auth_token).await?;

        if appointment.status != AppointmentStatus::Pending {
            return Err(BookingError::InvalidStatusTransition(appointment.status));
        }

        let contact = appointment.otp_contact.ok_or(BookingError::CodeNotFound)?;

        let issued = self.otp.issue(&contact, OTP_PURPOSE_BOOKING, auth_token).await?;

        // Extend the confirmation deadline to match the fresh code.
        let patch = json!({
            "otp_expires_at": issued.expires_at.to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });
        self.guarded_transition(id, &[AppointmentStatus::Pending], patch, auth_token)
            .await?;

        match self
            .notifier
            .send_code(&contact, &issued.code, issued.expires_at)
            .await
        {
            Ok(()) => Ok(OtpDispatch {
                sent: true,
                expires_at: Some(issued.expires_at),
                warning: None,
            }),
            Err(err) => {
                warn!("Code delivery failed for {}: {}", contact, err);
                Ok(OtpDispatch {
                    sent: false,
                    expires_at: Some(issued.expires_at),
                    warning: Some("Confirmation code could not be delivered".to_string()),
                })
            }
        }
    }

    /// Cancel a pending or confirmed appointment and free its slot.
    pub async fn cancel_appointment(
        &self,
        id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let appointment = self.get_appointment(id, auth_token).await?;

        AppointmentLifecycle::check_transition(&appointment.status, &AppointmentStatus::Cancelled)?;

        let patch = json!({
            "status": AppointmentStatus::Cancelled.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let cancelled = match self
            .guarded_transition(id, AppointmentLifecycle::live_statuses(), patch, auth_token)
            .await?
        {
            Some(cancelled) => cancelled,
            None => return Err(self.transition_conflict(id, auth_token).await),
        };

        // Only the winning writer reaches this line, so the release cannot
        // run twice for one cancellation.
        self.schedule
            .release_slot(
                cancelled.doctor_id,
                cancelled.slot_date,
                cancelled.slot_time,
                auth_token,
            )
            .await?;

        info!("Appointment {} cancelled, slot released", id);
        Ok(cancelled)
    }

    /// Mark a confirmed appointment as completed. The slot stays booked; the
    /// visit happened.
    pub async fn complete_appointment(
        &self,
        id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let appointment = self.get_appointment(id, auth_token).await?;

        AppointmentLifecycle::check_transition(&appointment.status, &AppointmentStatus::Completed)?;

        let patch = json!({
            "status": AppointmentStatus::Completed.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        match self
            .guarded_transition(id, &[AppointmentStatus::Confirmed], patch, auth_token)
            .await?
        {
            Some(completed) => Ok(completed),
            None => Err(self.transition_conflict(id, auth_token).await),
        }
    }

    /// Housekeeping pass: expire overdue pending appointments, and when a
    /// doctor/date pair is given, release booked slots no live appointment
    /// accounts for.
    ///
    /// Safe to run from any number of instances concurrently; every mutation
    /// inside is guarded or idempotent.
    pub async fn sweep(
        &self,
        doctor_id: Option<Uuid>,
        date: Option<chrono::NaiveDate>,
        auth_token: &str,
    ) -> Result<SweepReport, BookingError> {
        let expired = self.expire_overdue(auth_token).await?;

        let orphans_released = match (doctor_id, date) {
            (Some(doctor_id), Some(date)) => {
                self.release_orphans(doctor_id, date, auth_token).await?
            }
            _ => 0,
        };

        Ok(SweepReport {
            expired,
            orphans_released,
        })
    }

    async fn expire_overdue(&self, auth_token: &str) -> Result<usize, BookingError> {
        let path = format!(
            "/rest/v1/appointments?status=eq.{}&otp_expires_at=lt.{}",
            AppointmentStatus::Pending,
            urlencoding::encode(&Utc::now().to_rfc3339())
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let mut expired = 0;
        for row in rows {
            let appointment: Appointment = serde_json::from_value(row).map_err(|e| {
                BookingError::DatabaseError(format!("Failed to parse appointment: {}", e))
            })?;
            if self.expire_appointment(&appointment, auth_token).await? {
                expired += 1;
            }
        }

        if expired > 0 {
            info!("Sweep expired {} overdue appointments", expired);
        }
        Ok(expired)
    }

    /// Release booked slots with no pending or confirmed appointment behind
    /// them. Such orphans can only appear after a partial failure between
    /// the reservation and the compensating release.
    async fn release_orphans(
        &self,
        doctor_id: Uuid,
        date: chrono::NaiveDate,
        auth_token: &str,
    ) -> Result<usize, BookingError> {
        let booked = self.schedule.booked_slots(doctor_id, date, auth_token).await?;
        if booked.is_empty() {
            return Ok(0);
        }

        let live_filter: Vec<String> = AppointmentLifecycle::live_statuses()
            .iter()
            .map(ToString::to_string)
            .collect();
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&slot_date=eq.{}&status=in.({})&select=slot_time",
            doctor_id,
            date,
            live_filter.join(",")
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let live: Vec<chrono::NaiveTime> = rows
            .into_iter()
            .filter_map(|row| {
                row.get("slot_time")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
            })
            .collect();

        let mut released = 0;
        for time in booked {
            if !live.contains(&time) {
                debug!("Releasing orphaned slot {} {} for doctor {}", date, time, doctor_id);
                self.schedule
                    .release_slot(doctor_id, date, time, auth_token)
                    .await?;
                released += 1;
            }
        }

        if released > 0 {
            info!("Sweep released {} orphaned slots", released);
        }
        Ok(released)
    }
}
