// End-to-end exchanges through the router: interceptors, proxy and side endpoints
mod common;

use axum::{
    body::{Body, Bytes},
    http::{Request, StatusCode, header},
};
use common::{ORDER_SCHEMA, fixture, json, json_request, send};

#[tokio::test]
async fn test_valid_request_is_forwarded_byte_for_byte() {
    let fx = fixture(true, false).await;
    let body = "{ \"id\" : 42 }";

    let (status, _) = send(&fx.router, json_request("POST", "/orders?x=1", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(fx.upstream.calls(), 1);
    assert_eq!(
        fx.upstream.last_body.lock().unwrap().clone(),
        Some(Bytes::from_static(body.as_bytes()))
    );
    assert_eq!(
        fx.upstream.last_uri.lock().unwrap().as_deref(),
        Some("http://orders.upstream.test/orders?x=1")
    );
}

#[tokio::test]
async fn test_numeric_id_is_elided_for_lookup() {
    let fx = fixture(true, false).await;
    let (status, _) = send(&fx.router, json_request("POST", "/orders/77", r#"{"id": 1}"#)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&fx.router, json_request("POST", "/orders/77", r#"{"id": "1"}"#)).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_constraint_violation_is_rejected_before_upstream() {
    let fx = fixture(true, false).await;

    let (status, body) = send(&fx.router, json_request("POST", "/orders", r#"{"id": "x"}"#)).await;

    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    let payload = json(&body);
    assert_eq!(payload["status"], "validation error");
    assert!(!payload["details"].as_array().unwrap().is_empty());
    assert_eq!(fx.upstream.calls(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_deserialization_error() {
    let fx = fixture(true, false).await;

    let (status, body) = send(&fx.router, json_request("POST", "/orders", r#"{"id":"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["status"], "deserialization error");
    assert_eq!(fx.upstream.calls(), 0);
}

#[tokio::test]
async fn test_unregistered_route_has_no_schema() {
    let fx = fixture(true, false).await;

    let (status, body) = send(&fx.router, json_request("PUT", "/users/1", "{}")).await;

    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    let payload = json(&body);
    assert_eq!(payload["status"], "validation error");
    assert_eq!(payload["details"][0], "can't find json validation scheme");
    assert_eq!(fx.upstream.calls(), 0);
}

#[tokio::test]
async fn test_requests_outside_activation_pass_through() {
    let fx = fixture(true, false).await;

    // Not a body-carrying method
    let (status, _) = send(&fx.router, json_request("DELETE", "/orders/1", "not json")).await;
    assert_eq!(status, StatusCode::OK);

    // Not JSON
    let req = Request::builder()
        .method("POST")
        .uri("/orders")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(&fx.router, req).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(fx.upstream.calls(), 2);
}

#[tokio::test]
async fn test_request_toggle_is_read_per_exchange() {
    let fx = fixture(false, false).await;
    let (status, _) = send(&fx.router, json_request("POST", "/orders", "{}")).await;
    assert_eq!(status, StatusCode::OK);

    fx.toggles.store(schemaguard::config::FeatureFlags {
        request_validation_on: true,
        response_validation_on: false,
    });
    let (status, _) = send(&fx.router, json_request("POST", "/orders", "{}")).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_oversized_request_is_rejected() {
    let fx = fixture(true, false).await;
    let big = format!(r#"{{"id": 1, "pad": "{}"}}"#, "x".repeat(8192));

    let (status, body) = send(&fx.router, json_request("POST", "/orders", &big)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json(&body)["status"], "deserialization error");
    assert_eq!(fx.upstream.calls(), 0);
}

#[tokio::test]
async fn test_valid_response_is_delivered_unchanged() {
    let fx = fixture(false, true).await;
    fx.upstream.reply_with("application/json", r#"{"id":  7}"#);

    let req = Request::builder().uri("/orders/7").body(Body::empty()).unwrap();
    let (status, body) = send(&fx.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(br#"{"id":  7}"#));
}

#[tokio::test]
async fn test_invalid_response_is_masked() {
    let fx = fixture(false, true).await;
    fx.upstream.reply_with("application/json; charset=utf-8", r#"{"id": "leak"}"#);

    let req = Request::builder().uri("/orders").body(Body::empty()).unwrap();
    let (status, body) = send(&fx.router, req).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let payload = json(&body);
    assert_eq!(payload["status"], "Error");
    assert_eq!(payload["details"], serde_json::json!(["Server response error"]));
}

#[tokio::test]
async fn test_response_without_schema_is_masked() {
    let fx = fixture(false, true).await;

    let req = Request::builder()
        .method("PATCH")
        .uri("/users/3")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&fx.router, req).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(&body)["details"][0], "Server response error");
}

#[tokio::test]
async fn test_request_error_is_not_revalidated_on_the_way_out() {
    let fx = fixture(true, true).await;

    let (status, body) = send(&fx.router, json_request("POST", "/orders", r#"{"id": "x"}"#)).await;

    // The request-side payload passes the response layer untouched
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(json(&body)["status"], "validation error");
}

#[tokio::test]
async fn test_non_json_response_is_not_validated() {
    let fx = fixture(false, true).await;
    fx.upstream.reply_with("text/html", "<p>hi</p>");

    let req = Request::builder().uri("/orders").body(Body::empty()).unwrap();
    let (status, body) = send(&fx.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"<p>hi</p>"));
}

#[tokio::test]
async fn test_schema_content_endpoint() {
    let fx = fixture(false, false).await;

    let req = Request::builder()
        .uri("/jsonschema/Orders/Create.json")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&fx.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(ORDER_SCHEMA.as_bytes()));

    let req = Request::builder()
        .uri("/jsonschema/orders/missing.json")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&fx.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_health_reports_generation() {
    let fx = fixture(false, false).await;

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&fx.router, req).await;

    assert_eq!(status, StatusCode::OK);
    let payload = json(&body);
    assert_eq!(payload["generation"], 1);
    assert_eq!(payload["request_routes"], 1);
    assert_eq!(payload["response_routes"], 2);
}

#[tokio::test]
async fn test_unknown_upstream_is_not_found() {
    let fx = fixture(false, false).await;

    let req = Request::builder().uri("/billing").body(Body::empty()).unwrap();
    let (status, _) = send(&fx.router, req).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(fx.upstream.calls(), 0);
}
