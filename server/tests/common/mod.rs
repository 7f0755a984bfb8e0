//! Shared helpers for the HTTP API tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use papertrans::engine::Credentials;
use papertrans::{EngineConfig, JobController, MemoryJobStore, ServiceConfig};
use papertrans_server::{build_router, AppState};

pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n% fake document\n%%EOF\n";
const BOUNDARY: &str = "papertrans-test-boundary";

/// Copies the input to `<output>/<stem>.<lang_out>.mono.pdf`, optionally
/// waiting for a gate file first.
const ENGINE_SCRIPT: &str = r#"#!/bin/sh
if [ -n "$GATE" ]; then
  while [ ! -f "$GATE" ]; do sleep 0.05; done
fi
files=""
out=""
lang_out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --files) files="$2"; shift 2 ;;
    --output) out="$2"; shift 2 ;;
    --lang-out) lang_out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
stem=$(basename "$files" .pdf)
echo "Translating $stem"
cp "$files" "$out/$stem.$lang_out.mono.pdf"
"#;

/// A running job service behind the application router.
pub struct TestApp {
    temp_dir: TempDir,
    pub controller: Arc<JobController>,
    pub router: Router,
    pub gate_file: PathBuf,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(100, false)
    }

    /// Engine blocks until [`TestApp::release`]; the queue holds `capacity` jobs.
    pub fn gated(capacity: usize) -> Self {
        Self::build(capacity, true)
    }

    fn build(capacity: usize, gated: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let gate_file = base.join("gate");

        let script = if gated {
            ENGINE_SCRIPT.replacen(
                "if [ -n \"$GATE\" ]",
                &format!("GATE='{}'\nif [ -n \"$GATE\" ]", gate_file.display()),
                1,
            )
        } else {
            ENGINE_SCRIPT.to_string()
        };
        let script_path = base.join("engine.sh");
        std::fs::write(&script_path, script).expect("Failed to write engine script");

        let mut config = ServiceConfig::with_data_dir(base.join("data"));
        config.queue_capacity = capacity;
        config.max_upload_bytes = 64 * 1024;
        config.engine = EngineConfig {
            program: "sh".to_string(),
            program_args: vec![script_path.to_string_lossy().into_owned()],
            credentials: Credentials {
                api_key: Some(SecretString::from("sk-test")),
                ..EngineConfig::default().credentials
            },
            ..EngineConfig::default()
        };

        let controller = Arc::new(
            JobController::start(&config, Arc::new(MemoryJobStore::new()))
                .expect("Failed to start controller"),
        );
        let router = build_router(AppState::new(
            Arc::clone(&controller),
            config.max_upload_bytes,
        ));

        Self {
            temp_dir,
            controller,
            router,
            gate_file,
        }
    }

    pub fn release(&self) {
        std::fs::write(&self.gate_file, b"go").expect("Failed to open gate");
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router should not fail")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// POSTs a multipart submission.
    pub async fn submit(
        &self,
        file: Option<(&str, &[u8])>,
        fields: &[(&str, &str)],
    ) -> Response<Body> {
        let request = Request::post("/api/tasks/submit")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(file, fields)))
            .unwrap();
        self.request(request).await
    }

    /// Submits `filename` and returns the task id.
    pub async fn submit_ok(&self, filename: &str) -> String {
        let response = self.submit(Some((filename, PDF_BYTES)), &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        json["task_id"].as_str().unwrap().to_string()
    }

    /// Polls the detail endpoint until the task is terminal.
    pub async fn wait_for_terminal(&self, id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            let job = body_json(self.get(&format!("/api/tasks/detail/{}", id)).await).await;
            if job["status"] == "success" || job["status"] == "failed" {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Timed out waiting for task {}",
                id
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_for_status(&self, id: &str, status: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            let job = body_json(self.get(&format!("/api/tasks/detail/{}", id)).await).await;
            if job["status"] == status {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn multipart_body(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
