use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, BookingError, CreateAppointmentRequest, SweepRequest, VerifyOtpRequest,
};
use crate::services::booking::BookingService;

fn map_booking_error(err: BookingError) -> AppError {
    match err {
        BookingError::NotFound | BookingError::PatientNotFound => AppError::NotFound(err.to_string()),
        BookingError::CooldownActive { .. } => AppError::TooManyRequests(err.to_string()),
        BookingError::DatabaseError(msg) => AppError::Database(msg),
        // Business rejections are client errors: bad slot, lost race, bad code
        other => AppError::BadRequest(other.to_string()),
    }
}

/// Patients may act on their own appointments; doctors on theirs; admins on
/// any.
fn check_appointment_access(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_admin()
        || appointment.patient_id.to_string() == user.id
        || (user.is_doctor() && appointment.doctor_id.to_string() == user.id)
    {
        Ok(())
    } else {
        Err(AppError::Auth("Access denied".to_string()))
    }
}

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() && request.patient_id.to_string() != user.id {
        return Err(AppError::Auth(
            "Patients can only book for themselves".to_string(),
        ));
    }

    let service = BookingService::new(&state);
    let response = service
        .create_appointment(request, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!(response)))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let service = BookingService::new(&state);
    let appointment = service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    check_appointment_access(&user, &appointment)?;

    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn verify_otp(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<Appointment>, AppError> {
    let service = BookingService::new(&state);
    let appointment = service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    if !user.is_admin() && appointment.patient_id.to_string() != user.id {
        return Err(AppError::Auth("Access denied".to_string()));
    }

    let confirmed = service
        .confirm_appointment(appointment_id, &request.code, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(confirmed))
}

#[axum::debug_handler]
pub async fn resend_otp(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = BookingService::new(&state);
    let appointment = service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    if !user.is_admin() && appointment.patient_id.to_string() != user.id {
        return Err(AppError::Auth("Access denied".to_string()));
    }

    let dispatch = service
        .resend_otp(appointment_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!(dispatch)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let service = BookingService::new(&state);
    let appointment = service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    check_appointment_access(&user, &appointment)?;

    let cancelled = service
        .cancel_appointment(appointment_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(cancelled))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    if !user.is_admin() && !user.is_doctor() {
        return Err(AppError::Auth(
            "Only doctors can complete appointments".to_string(),
        ));
    }

    let service = BookingService::new(&state);
    let appointment = service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    if !user.is_admin() && appointment.doctor_id.to_string() != user.id {
        return Err(AppError::Auth("Access denied".to_string()));
    }

    let completed = service
        .complete_appointment(appointment_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(completed))
}

#[axum::debug_handler]
pub async fn sweep(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<SweepRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Auth("Admin access required".to_string()));
    }

    let service = BookingService::new(&state);
    let report = service
        .sweep(request.doctor_id, request.date, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!(report)))
}
