use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::ScheduleError;
use crate::services::timegrid;

/// Owns the `schedule_slots` rows: one row per (doctor, date, time), with a
/// booked flag. Bookedness is decided here and nowhere else; appointments are
/// never consulted to answer "is this slot free".
///
/// The only read-modify-write in the whole service is `reserve_slot`, and it
/// is pushed down into a single conditional PATCH so that concurrent callers
/// cannot both win.
pub struct ScheduleStore {
    supabase: Arc<SupabaseClient>,
}

#[derive(Debug, Deserialize)]
struct SlotTimeRow {
    slot_time: NaiveTime,
}

impl ScheduleStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn slot_filter(doctor_id: Uuid, date: NaiveDate, time: NaiveTime) -> String {
        format!(
            "doctor_id=eq.{}&slot_date=eq.{}&slot_time=eq.{}",
            doctor_id,
            date,
            time.format("%H:%M:%S")
        )
    }

    fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    /// Lazily materialize the day's slot rows from the time grid.
    ///
    /// Creation is idempotent: concurrent callers race on the bulk insert and
    /// the unique key plus `resolution=ignore-duplicates` makes the losers
    /// no-ops, so the schedule can never diverge.
    pub async fn ensure_schedule(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let grid = timegrid::slots_for_date(date);
        if grid.is_empty() {
            return Ok(());
        }

        let probe_path = format!(
            "/rest/v1/schedule_slots?doctor_id=eq.{}&slot_date=eq.{}&select=slot_time&limit=1",
            doctor_id, date
        );
        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &probe_path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if !existing.is_empty() {
            return Ok(());
        }

        debug!("Materializing schedule for doctor {} on {}", doctor_id, date);

        let rows: Vec<Value> = grid
            .iter()
            .map(|time| {
                json!({
                    "doctor_id": doctor_id,
                    "slot_date": date,
                    "slot_time": time.format("%H:%M:%S").to_string(),
                    "is_booked": false
                })
            })
            .collect();

        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=ignore-duplicates,return=representation"),
        );

        let _inserted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/schedule_slots?on_conflict=doctor_id,slot_date,slot_time",
                Some(auth_token),
                Some(Value::Array(rows)),
                Some(headers),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Atomically reserve one slot. At most one concurrent caller succeeds
    /// for a given (doctor, date, time); everyone else gets `AlreadyBooked`
    /// until a compensating `release_slot` runs.
    ///
    /// The compare-and-set lives in the storage layer: a conditional PATCH
    /// filtered on `is_booked=eq.false`. An empty result set means the flag
    /// was already flipped by someone else.
    pub async fn reserve_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        if !timegrid::is_bookable(date, time) {
            return Err(ScheduleError::NoSuchSlot);
        }

        self.ensure_schedule(doctor_id, date, auth_token).await?;

        let path = format!(
            "/rest/v1/schedule_slots?{}&is_booked=eq.false",
            Self::slot_filter(doctor_id, date, time)
        );

        let updated: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "is_booked": true })),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            debug!(
                "Reservation race lost for doctor {} on {} at {}",
                doctor_id, date, time
            );
            return Err(ScheduleError::AlreadyBooked);
        }

        info!("Reserved slot {} {} for doctor {}", date, time, doctor_id);
        Ok(())
    }

    /// Release a slot. Idempotent: releasing a slot that is already free is
    /// a no-op, not an error.
    pub async fn release_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let path = format!(
            "/rest/v1/schedule_slots?{}&is_booked=eq.true",
            Self::slot_filter(doctor_id, date, time)
        );

        let updated: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "is_booked": false })),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            debug!(
                "Release was a no-op for doctor {} on {} at {}",
                doctor_id, date, time
            );
        } else {
            info!("Released slot {} {} for doctor {}", date, time, doctor_id);
        }

        Ok(())
    }

    /// Ordered free time labels for a doctor's day.
    pub async fn free_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<NaiveTime>, ScheduleError> {
        self.ensure_schedule(doctor_id, date, auth_token).await?;
        self.slot_times(doctor_id, date, false, auth_token).await
    }

    /// Ordered booked time labels, used by the orphan sweep.
    pub async fn booked_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<NaiveTime>, ScheduleError> {
        self.slot_times(doctor_id, date, true, auth_token).await
    }

    async fn slot_times(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        booked: bool,
        auth_token: &str,
    ) -> Result<Vec<NaiveTime>, ScheduleError> {
        let path = format!(
            "/rest/v1/schedule_slots?doctor_id=eq.{}&slot_date=eq.{}&is_booked=eq.{}&select=slot_time&order=slot_time.asc",
            doctor_id, date, booked
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        let times = rows
            .into_iter()
            .map(serde_json::from_value::<SlotTimeRow>)
            .collect::<Result<Vec<SlotTimeRow>, _>>()
            .map_err(|e| {
                warn!("Failed to parse slot rows: {}", e);
                ScheduleError::DatabaseError(format!("Failed to parse slot rows: {}", e))
            })?;

        Ok(times.into_iter().map(|row| row.slot_time).collect())
    }
}
