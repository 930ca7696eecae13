//! Defines the HTTP surface.
//!
//! ## Structure
//! - **Pipeline endpoints**
//!   - `GET    /plot`  : render size history, store it, return `{plot_url}`
//!   - `POST   /events`: ingest externally delivered store notifications
//!
//! - **Bucket-level endpoints**
//!   - `GET    /{bucket}`: list objects (supports prefix, max-keys, continuation-token)
//!   - `PUT    /{bucket}`: create bucket
//!   - `DELETE /{bucket}`: delete an empty bucket
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*key}`: upload object
//!   - `GET    /{bucket}/{*key}`: download object
//!   - `HEAD   /{bucket}/{*key}`: retrieve metadata only
//!   - `DELETE /{bucket}/{*key}`: delete object
//!
//! Static paths take precedence over the `{bucket}` capture.

use crate::{
    handlers::{
        event_handlers::ingest_events,
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_bucket, delete_bucket, delete_object, get_object, head_object, list_objects,
            upload_object,
        },
        plot_handlers::get_plot,
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/plot", get(get_plot))
        .route("/events", post(ingest_events))
        .route(
            "/{bucket}/{*key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        .route(
            "/{bucket}",
            get(list_objects).put(create_bucket).delete(delete_bucket),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::TestEnv;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app(env: &TestEnv) -> Router {
        routes().with_state(env.app_state())
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn plot_without_data_is_a_400() {
        let env = TestEnv::new().await;
        let response = app(&env)
            .oneshot(request("GET", "/plot", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No data available for plotting.");
    }

    #[tokio::test]
    async fn plot_returns_a_fetchable_url() {
        let env = TestEnv::new().await;
        env.size_tracker()
            .record_at("tracked", chrono::Utc::now().timestamp())
            .await
            .unwrap();

        let response = app(&env)
            .oneshot(request("GET", "/plot", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["plot_url"], "http://localhost:3000/plots/plot.png");

        let image = app(&env)
            .oneshot(request("GET", "/plots/plot.png", Body::empty()))
            .await
            .unwrap();
        assert_eq!(image.status(), StatusCode::OK);
        assert_eq!(image.headers()[header::CONTENT_TYPE], "image/png");
    }

    #[tokio::test]
    async fn objects_round_trip_over_http() {
        let env = TestEnv::new().await;

        let put = app(&env)
            .oneshot(request("PUT", "/tracked/notes/a.txt", Body::from("Empty Assignment 1")))
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::OK);
        assert!(put.headers().contains_key(header::ETAG));

        let get = app(&env)
            .oneshot(request("GET", "/tracked/notes/a.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(get.status(), StatusCode::OK);
        let bytes = to_bytes(get.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Empty Assignment 1");

        let list = app(&env)
            .oneshot(request("GET", "/tracked?prefix=notes/", Body::empty()))
            .await
            .unwrap();
        let body = json_body(list).await;
        assert_eq!(body["objects"][0]["key"], "notes/a.txt");
        assert_eq!(body["objects"][0]["size"], 18);

        let delete = app(&env)
            .oneshot(request("DELETE", "/tracked/notes/a.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::NO_CONTENT);

        let again = app(&env)
            .oneshot(request("DELETE", "/tracked/notes/a.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NO_CONTENT);

        let missing = app(&env)
            .oneshot(request("HEAD", "/tracked/notes/a.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn events_are_decoded_and_published() {
        let env = TestEnv::new().await;
        let mut rx = env.events.subscribe();
        let payload = json!({
            "Records": [
                {
                    "eventName": "ObjectCreated:Put",
                    "s3": { "bucket": { "name": "tracked" }, "object": { "key": "k", "size": 4 } }
                },
                { "eventName": "ObjectCreated:Put" }
            ]
        });

        let response = app(&env)
            .oneshot(request("POST", "/events", Body::from(payload.to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body, json!({ "accepted": 1, "skipped": 1 }));
        assert_eq!(rx.try_recv().unwrap().key, "k");
    }

    #[tokio::test]
    async fn malformed_event_payload_is_a_400() {
        let env = TestEnv::new().await;
        let response = app(&env)
            .oneshot(request("POST", "/events", Body::from("nope")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn readiness_reports_each_check() {
        let env = TestEnv::new().await;
        let response = app(&env)
            .oneshot(request("GET", "/readyz", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["checks"]["pipeline_tables"]["ok"], true);
    }
}
