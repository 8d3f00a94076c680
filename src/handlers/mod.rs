mod snaps;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Phone cameras produce large originals.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/snaps", post(snaps::create_instance))
        .route("/snaps/shapes", get(snaps::list_shapes))
        .route("/snaps/check-eligibility/:key", get(snaps::check_eligibility))
        .route("/snaps/:key", get(snaps::get_instance))
        .route("/snaps/:key/join", post(snaps::join))
        .route("/snaps/:key/start_timer", post(snaps::start_timer))
        .route("/snaps/:key/take_snap", post(snaps::take_snap))
        .route("/snaps/:key/publish", post(snaps::publish))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{jwt, AuthKeys};
    use crate::database::MemorySnapStore;
    use crate::media::resize::tests::png_of;
    use crate::media::{LocalCompositor, MemoryObjectStorage};
    use crate::models::User;
    use crate::realtime::testing::RecordingBroadcaster;
    use crate::snaps::{ShapeCatalog, SnapService, SnapSettings};

    const SECRET: &str = "router_test_secret";
    const BOUNDARY: &str = "snapboundary";

    fn app() -> Router {
        let store = Arc::new(MemorySnapStore::with_users(
            (1..=3).map(|id| User::named(id, &format!("user{id}"))),
        ));
        let storage = Arc::new(MemoryObjectStorage::new());
        let snaps = SnapService::new(
            store,
            Arc::new(ShapeCatalog::builtin()),
            storage.clone(),
            Arc::new(LocalCompositor::new(storage, "snaps")),
            Arc::new(RecordingBroadcaster::ready()),
            SnapSettings::default(),
        );
        router(AppState {
            snaps: Arc::new(snaps),
            keys: AuthKeys::new(SECRET),
        })
    }

    fn bearer(user_id: i32) -> String {
        let token = jwt::generate_token(user_id.to_string(), None, 300, SECRET)
            .unwrap()
            .token;
        format!("Bearer {token}")
    }

    fn json_request(method: &str, uri: &str, user_id: i32, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(user_id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_post(uri: &str, user_id: i32) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(user_id))
            .body(Body::empty())
            .unwrap()
    }

    fn snap_upload(uri: &str, user_id: i32, image: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"snap.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(user_id))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn shapes_are_listed_without_auth() {
        let app = app();
        let request = Request::get("/snaps/shapes").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "ok");
        assert_eq!(body["shapes"][0]["name"], "Duo");
    }

    #[tokio::test]
    async fn creating_requires_a_bearer_token() {
        let app = app();
        let request = Request::post("/snaps")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "shape_id": 1 }).to_string()))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn full_duo_round_over_http() {
        let app = app();
        let (status, body) = send(
            &app,
            json_request("POST", "/snaps", 1, json!({ "shape_id": 1, "countdown_secs": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let key = body["instance"]["key"].as_str().unwrap().to_string();
        assert_eq!(body["instance"]["state"], "OPEN");

        let (status, _) = send(
            &app,
            json_request("POST", &format!("/snaps/{key}/join"), 2, json!({ "position": "right" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            json_request("POST", &format!("/snaps/{key}/join"), 3, json!({ "position": "right" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "This position is already taken");

        let (status, _) = send(&app, empty_post(&format!("/snaps/{key}/start_timer"), 2)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(&app, empty_post(&format!("/snaps/{key}/start_timer"), 1)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["instance"]["state"], "TIMER_RUNNING");

        let image = png_of(522, 696, [90, 90, 200]);
        let (status, body) = send(&app, snap_upload(&format!("/snaps/{key}/take_snap"), 2, &image)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allCaptured"], false);

        let (status, body) = send(&app, snap_upload(&format!("/snaps/{key}/take_snap"), 1, &image)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allCaptured"], true);
        assert!(body["collageImageUrl"].is_string());

        let (status, body) = send(&app, empty_post(&format!("/snaps/{key}/publish"), 1)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["snap"]["owner_id"], 1);
    }

    #[tokio::test]
    async fn take_snap_without_an_image_field_is_a_bad_request() {
        let app = app();
        let (_, body) = send(
            &app,
            json_request("POST", "/snaps", 1, json!({ "shape_id": 1, "countdown_secs": 0 })),
        )
        .await;
        let key = body["instance"]["key"].as_str().unwrap().to_string();

        let request = Request::post(format!("/snaps/{key}/take_snap"))
            .header(header::AUTHORIZATION, bearer(1))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(format!("--{BOUNDARY}--\r\n")))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_instances_are_not_found() {
        let app = app();
        let request = Request::get("/snaps/check-eligibility/MISSING")
            .header(header::AUTHORIZATION, bearer(1))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "instance not found");
    }
}
