use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::ScheduleError;
use crate::services::store::ScheduleStore;

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

/// Read-only listing of a doctor's free slots for one date. Does not reserve
/// anything.
#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let store = ScheduleStore::new(&state);

    let times = store
        .free_slots(query.doctor_id, query.date, token)
        .await
        .map_err(|e| match e {
            ScheduleError::DatabaseError(msg) => AppError::Database(msg),
            other => AppError::Internal(other.to_string()),
        })?;

    let labels: Vec<String> = times.iter().map(|t| t.format("%H:%M").to_string()).collect();

    Ok(Json(json!({
        "doctor_id": query.doctor_id,
        "date": query.date,
        "available_slots": labels
    })))
}
