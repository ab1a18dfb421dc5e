use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wacore::transport::AccountIdentity;
use wacore::transport::mock::{ConnectBehavior, MockTransportFactory};
use whatsapp_gateway::server::build_router;
use whatsapp_gateway::status::MemoryStatusPublisher;
use whatsapp_gateway::{Gateway, SessionRegistry};

const KEY: &str = "test-key";

fn app(behavior: ConnectBehavior) -> (Router, Arc<MockTransportFactory>) {
    let transports = Arc::new(MockTransportFactory::new(behavior));
    let registry = SessionRegistry::builder()
        .with_transport_factory(transports.clone())
        .with_status_publisher(Arc::new(MemoryStatusPublisher::new()))
        .build()
        .unwrap();
    let gateway = Gateway::new(registry).with_ready_timeout(Duration::from_secs(2));
    (build_router(gateway, Some(KEY.to_string())), transports)
}

fn open() -> ConnectBehavior {
    ConnectBehavior::Open(AccountIdentity {
        id: "5551234:1@s.whatsapp.net".to_string(),
        name: Some("Alice".to_string()),
    })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_root_is_not_guarded() {
    let (app, _) = app(open());
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_wrong_key_is_rejected() {
    let (app, transports) = app(open());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("Unauthorized"));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/create-session")
                .header("content-type", "application/json")
                .header("x-api-key", "wrong")
                .body(Body::from(json!({ "accountId": "acct" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(transports.created_count(), 0);
}

#[tokio::test]
async fn test_key_accepted_in_query() {
    let (app, _) = app(open());
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/sessions?key={KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn test_create_session_then_list() {
    let (app, transports) = app(ConnectBehavior::PairingCode("2@ref".to_string()));

    let response = app
        .clone()
        .oneshot(post_json("/create-session", json!({ "accountId": "acct" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["message"], json!("Session initialization started"));
    assert_eq!(transports.created_count(), 1);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/sessions")
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let sessions = body_json(response).await;
    assert_eq!(sessions[0]["accountId"], json!("acct"));
}

#[tokio::test]
async fn test_send_message_validates_recipient() {
    let (app, transports) = app(open());
    let response = app
        .oneshot(post_json(
            "/send-message",
            json!({ "accountId": "acct", "recipient": "nobody", "content": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
    assert_eq!(transports.created_count(), 0);
}

#[tokio::test]
async fn test_send_message_returns_message_id() {
    let (app, transports) = app(open());
    let response = app
        .oneshot(post_json(
            "/send-message",
            json!({ "accountId": "acct", "recipient": "15550100", "content": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "success": true, "messageId": "MOCK1" })
    );
    assert_eq!(
        transports.latest_client().unwrap().sent_messages(),
        vec![("15550100@s.whatsapp.net".to_string(), "hi".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unready_session_maps_to_503() {
    let (app, _) = app(ConnectBehavior::Silent);
    let response = app
        .oneshot(post_json(
            "/send-message",
            json!({ "accountId": "acct", "recipient": "15550100", "content": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_delete_session_succeeds_for_unknown_account() {
    let (app, _) = app(open());
    let response = app
        .oneshot(post_json("/delete-session", json!({ "accountId": "ghost" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "success": true }));
}
