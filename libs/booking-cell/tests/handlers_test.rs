use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_cell::router::booking_routes;
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn config_for(mock_server: &MockServer) -> AppConfig {
    let test_config = TestConfig::default();
    let mut config = test_config.to_app_config();
    config.supabase_url = mock_server.uri();
    config
}

fn app_for(config: &AppConfig) -> Router {
    booking_routes(Arc::new(config.clone()))
}

async fn mount_appointment(mock_server: &MockServer, id: Uuid, patient_id: &str, doctor_id: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &id.to_string(),
                patient_id,
                doctor_id,
                "2030-01-07T02:00:00Z",
                "2030-01-07",
                "09:00:00",
                "pending",
            )
        ])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn requests_without_a_token_are_rejected() {
    let mock_server = MockServer::start().await;
    let app = app_for(&config_for(&mock_server));

    let request = Request::builder()
        .method("GET")
        .uri(&format!("/{}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn patient_cannot_book_for_someone_else() {
    let mock_server = MockServer::start().await;
    let config = config_for(&mock_server);
    let app = app_for(&config);

    let user = TestUser::patient("patient@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let body = json!({
        "patient_id": Uuid::new_v4(),
        "doctor_id": Uuid::new_v4(),
        "date": "2030-01-07",
        "time": "09:00",
        "reason": null,
        "location_id": null,
        "specialty_id": null
    });

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn patient_reads_their_own_appointment() {
    let mock_server = MockServer::start().await;
    let config = config_for(&mock_server);
    let app = app_for(&config);

    let user = TestUser::patient("patient@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let appointment_id = Uuid::new_v4();
    mount_appointment(&mock_server, appointment_id, &user.id, &Uuid::new_v4().to_string()).await;

    let request = Request::builder()
        .method("GET")
        .uri(&format!("/{}", appointment_id))
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json_response: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json_response["id"], appointment_id.to_string());
    assert_eq!(json_response["status"], "pending");
}

#[tokio::test]
async fn strangers_cannot_read_an_appointment() {
    let mock_server = MockServer::start().await;
    let config = config_for(&mock_server);
    let app = app_for(&config);

    let user = TestUser::patient("stranger@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let appointment_id = Uuid::new_v4();
    mount_appointment(
        &mock_server,
        appointment_id,
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
    )
    .await;

    let request = Request::builder()
        .method("GET")
        .uri(&format!("/{}", appointment_id))
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sweep_requires_admin() {
    let mock_server = MockServer::start().await;
    let config = config_for(&mock_server);
    let app = app_for(&config);

    let user = TestUser::patient("patient@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let request = Request::builder()
        .method("POST")
        .uri("/sweep")
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(json!({"doctor_id": null, "date": null}).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_tokens_are_rejected() {
    let mock_server = MockServer::start().await;
    let config = config_for(&mock_server);
    let app = app_for(&config);

    let user = TestUser::patient("patient@example.com");
    let token = JwtTestUtils::create_expired_token(&user, &config.supabase_jwt_secret);

    let request = Request::builder()
        .method("GET")
        .uri(&format!("/{}", Uuid::new_v4()))
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
