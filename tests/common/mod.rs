//! Shared setup for the HTTP integration tests

#![allow(dead_code)]

use armwatch::camera::mock::MockCameraConnector;
use armwatch::camera::DEFAULT_CAMERA;
use armwatch::motor_bus::mock::MockHardware;
use armwatch::state::{AppConfig, AppState};
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const LEADER_PORT: &str = "/dev/ttyACM0";
pub const FOLLOWER_PORT: &str = "/dev/ttyACM1";

pub struct TestApp {
    pub state: AppState,
    pub hardware: MockHardware,
    pub camera: MockCameraConnector,
}

pub fn config(leader: Option<&str>, follower: Option<&str>) -> AppConfig {
    AppConfig {
        leader_port: leader.map(String::from),
        follower_port: follower.map(String::from),
        host: "127.0.0.1".to_string(),
        port: 5001,
        port_attempts: 100,
        poll_interval: Duration::from_millis(1),
        video_poll_interval: Duration::from_millis(5),
        camera: DEFAULT_CAMERA,
    }
}

impl TestApp {
    pub fn new(leader: Option<&str>, follower: Option<&str>) -> Self {
        let hardware = MockHardware::new();
        let camera = MockCameraConnector::new();
        camera.set_frame_delay(Duration::from_millis(2));
        let state = AppState::new(
            config(leader, follower),
            Arc::new(hardware.connector()),
            Arc::new(camera.clone()),
        );
        Self {
            state,
            hardware,
            camera,
        }
    }

    pub fn router(&self) -> Router {
        armwatch::web_api::create_router(self.state.clone())
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn get_json(&self, uri: &str) -> serde_json::Value {
        let resp = self.request(Method::GET, uri, None).await;
        assert!(resp.status().is_success(), "GET {} -> {}", uri, resp.status());
        body_json(resp).await
    }
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(resp: Response<Body>) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
