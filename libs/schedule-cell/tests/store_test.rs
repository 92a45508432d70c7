use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use schedule_cell::models::ScheduleError;
use schedule_cell::services::store::ScheduleStore;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

const TOKEN: &str = "test-token";

fn monday() -> NaiveDate {
    // 2025-09-01 is a Monday
    "2025-09-01".parse().unwrap()
}

fn nine() -> NaiveTime {
    "09:00".parse().unwrap()
}

async fn store_for(mock_server: &MockServer) -> ScheduleStore {
    let test_config = TestConfig::default();
    let mut config = test_config.to_app_config();
    config.supabase_url = mock_server.uri();
    ScheduleStore::new(&config)
}

/// Schedule already materialized: the probe finds a row.
async fn mount_existing_schedule(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "slot_time": "08:00:00" }
        ])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn reserve_slot_succeeds_when_free() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_existing_schedule(&mock_server).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("is_booked", "eq.false"))
        .and(query_param("slot_time", "eq.09:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(&doctor_id.to_string(), "2025-09-01", "09:00:00", true)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server).await;
    let result = store.reserve_slot(doctor_id, monday(), nine(), TOKEN).await;
    assert_matches!(result, Ok(()));
}

#[tokio::test]
async fn reserve_slot_reports_already_booked_when_cas_matches_nothing() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_existing_schedule(&mock_server).await;

    // The conditional update filtered on is_booked=false touched no rows:
    // someone else holds the slot.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server).await;
    let result = store.reserve_slot(doctor_id, monday(), nine(), TOKEN).await;
    assert_matches!(result, Err(ScheduleError::AlreadyBooked));
}

#[tokio::test]
async fn reserve_slot_rejects_times_off_the_grid_without_io() {
    // No mocks mounted: an off-grid time must be rejected before any
    // storage round-trip.
    let mock_server = MockServer::start().await;
    let store = store_for(&mock_server).await;

    let off_pitch = "09:15".parse().unwrap();
    let result = store
        .reserve_slot(Uuid::new_v4(), monday(), off_pitch, TOKEN)
        .await;
    assert_matches!(result, Err(ScheduleError::NoSuchSlot));

    let sunday: NaiveDate = "2025-09-07".parse().unwrap();
    let result = store.reserve_slot(Uuid::new_v4(), sunday, nine(), TOKEN).await;
    assert_matches!(result, Err(ScheduleError::NoSuchSlot));
}

#[tokio::test]
async fn release_slot_is_idempotent() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    // Releasing an already-free slot matches no rows and is still Ok.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server).await;
    let result = store.release_slot(doctor_id, monday(), nine(), TOKEN).await;
    assert_matches!(result, Ok(()));
}

#[tokio::test]
async fn ensure_schedule_materializes_the_grid_once() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    // Probe finds nothing, so the grid must be inserted.
    Mock::given(method("GET"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("on_conflict", "doctor_id,slot_date,slot_time"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server).await;
    let result = store.ensure_schedule(doctor_id, monday(), TOKEN).await;
    assert_matches!(result, Ok(()));
}

#[tokio::test]
async fn ensure_schedule_skips_closed_days() {
    // Sundays have an empty grid; no storage calls at all.
    let mock_server = MockServer::start().await;
    let store = store_for(&mock_server).await;

    let sunday: NaiveDate = "2025-09-07".parse().unwrap();
    let result = store.ensure_schedule(Uuid::new_v4(), sunday, TOKEN).await;
    assert_matches!(result, Ok(()));
}

#[tokio::test]
async fn free_slots_returns_ordered_labels() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_existing_schedule(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "slot_time": "08:00:00" },
            { "slot_time": "08:30:00" },
            { "slot_time": "13:00:00" }
        ])))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server).await;
    let times = store.free_slots(doctor_id, monday(), TOKEN).await.unwrap();

    let labels: Vec<String> = times.iter().map(|t| t.format("%H:%M").to_string()).collect();
    assert_eq!(labels, vec!["08:00", "08:30", "13:00"]);
}
