use std::fs;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use opendesk::api::{create_router, AppState};
use opendesk::gateway::{ExecConfig, Gateway};
use opendesk::registry::Registry;
use tempfile::TempDir;

fn setup_with(config: ExecConfig) -> (TempDir, TestServer) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let registry = Registry::open(dir.path()).expect("Failed to open registry");
    let gateway = Gateway::new(dir.path(), config);
    let app = create_router(AppState::new(registry, gateway));
    let server = TestServer::new(app).expect("Failed to create test server");
    (dir, server)
}

/// Scripts are run with `sh`, so test scripts are shell snippets.
fn setup() -> (TempDir, TestServer) {
    setup_with(ExecConfig::with_program("sh"))
}

fn write(dir: &TempDir, file: &str, content: &str) {
    fs::write(dir.path().join(file), content).expect("Failed to write test file");
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        let (_dir, server) = setup();

        let response = server.get("/health").await;

        response.assert_status_ok();
        response.assert_json(&serde_json::json!({ "status": "ok" }));
    }
}

mod list_scripts {
    use super::*;

    #[tokio::test]
    async fn returns_empty_list_for_empty_directory() {
        let (_dir, server) = setup();

        let response = server.get("/scripts").await;

        response.assert_status_ok();
        let names: Vec<String> = response.json();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn returns_display_names_ordered_by_id() {
        let (dir, server) = setup();
        write(&dir, "test1.ts", "console.log('test1')");
        write(&dir, "test2.js", "console.log('test2')");
        write(&dir, "zeta.ts", "");
        write(
            &dir,
            "scripts.json",
            "[\n\t{\n\t\t\"id\": 3,\n\t\t\"file\": \"test1.ts\"\n\t},\n\t{\n\t\t\"id\": 1,\n\t\t\"file\": \"zeta.ts\"\n\t},\n\t{\n\t\t\"id\": 2,\n\t\t\"file\": \"test2.js\"\n\t}\n]",
        );

        let response = server.get("/scripts").await;

        response.assert_status_ok();
        let names: Vec<String> = response.json();
        assert_eq!(names, vec!["zeta", "test2", "test1"]);
    }

    #[tokio::test]
    async fn registers_new_files_on_each_request() {
        let (dir, server) = setup();
        write(&dir, "first.ts", "");
        server.get("/scripts").await.assert_status_ok();

        write(&dir, "second.js", "");
        let names: Vec<String> = server.get("/scripts").await.json();

        assert_eq!(names, vec!["first", "second"]);
        assert!(dir.path().join("scripts.json").exists());
    }

    #[tokio::test]
    async fn allows_any_origin() {
        let (_dir, server) = setup();

        let response = server
            .get("/scripts")
            .add_header(
                HeaderName::from_static("origin"),
                HeaderValue::from_static("http://example.com"),
            )
            .await;

        response.assert_status_ok();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn returns_server_error_when_directory_is_gone() {
        let (dir, server) = setup();
        fs::remove_dir_all(dir.path()).expect("Failed to remove dir");

        let response = server.get("/scripts").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.text(), "Internal server error");
    }
}

#[cfg(unix)]
mod execute_script {
    use super::*;

    #[tokio::test]
    async fn returns_trimmed_output() {
        let (dir, server) = setup();
        write(&dir, "test.js", "echo \"Hello, World!\"\n");

        let response = server.get("/scripts/test.js").await;

        response.assert_status_ok();
        response.assert_text("Hello, World!");
    }

    #[tokio::test]
    async fn resolves_display_names_from_the_listing() {
        let (dir, server) = setup();
        write(&dir, "toggle mic.ts", "echo Muted\n");

        let names: Vec<String> = server.get("/scripts").await.json();
        assert_eq!(names, vec!["toggle mic"]);

        let response = server.get("/scripts/toggle%20mic").await;

        response.assert_status_ok();
        response.assert_text("Muted");
    }

    #[tokio::test]
    async fn rejects_encoded_traversal() {
        let (_dir, server) = setup();

        let response = server.get("/scripts/..%2F..%2Fetc%2Fpasswd").await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(!response.text().contains("root:"));
    }

    #[tokio::test]
    async fn rejects_traversal_into_a_sibling_directory() {
        let outer = TempDir::new().expect("Failed to create temp dir");
        let scripts = outer.path().join("scripts");
        fs::create_dir(&scripts).expect("Failed to create scripts dir");
        let marker = outer.path().join("ran");
        fs::write(
            outer.path().join("evil.ts"),
            format!("touch {}\n", marker.display()),
        )
        .expect("Failed to write script");

        let registry = Registry::open(&scripts).expect("Failed to open registry");
        let gateway = Gateway::new(&scripts, ExecConfig::with_program("sh"));
        let server = TestServer::new(create_router(AppState::new(registry, gateway)))
            .expect("Failed to create test server");

        let response = server.get("/scripts/..%2Fevil.ts").await;

        assert!(response.status_code().is_client_error());
        assert!(!marker.exists(), "script outside the directory was executed");
    }

    #[tokio::test]
    async fn returns_not_found_for_unknown_script() {
        let (_dir, server) = setup();

        let response = server.get("/scripts/missing.ts").await;

        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn hides_process_details_on_failure() {
        let (dir, server) = setup();
        write(&dir, "broken.ts", "echo secret-detail >&2\nexit 1\n");

        let response = server.get("/scripts/broken.ts").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.text();
        assert!(!body.contains("secret-detail"));
        assert!(!body.contains(dir.path().to_str().unwrap()));
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_server_error() {
        let (dir, server) = setup_with(ExecConfig::with_program("definitely-not-an-interpreter"));
        write(&dir, "task.ts", "");

        let response = server.get("/scripts/task.ts").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
}
