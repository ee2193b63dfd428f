//! CLI integration tests

use std::process::{Command, Output};

use tempfile::TempDir;

/// Run pondctl with an isolated config directory
fn pondctl(config_home: &TempDir, args: &[&str], api_url: Option<&str>) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_pondctl"));
    command
        .args(args)
        .env("XDG_CONFIG_HOME", config_home.path())
        .env("HOME", config_home.path())
        .env("NO_COLOR", "1")
        .env_remove("PONDCTL_API_URL");
    if let Some(url) = api_url {
        command.env("PONDCTL_API_URL", url);
    }
    command.output().expect("Failed to execute pondctl")
}

fn help(args: &[&str]) -> String {
    let home = TempDir::new().unwrap();
    let output = pondctl(&home, args, None);
    assert!(output.status.success(), "{:?} should succeed", args);
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let stdout = help(&["--help"]);

    assert!(stdout.contains("Pond Sentinel"), "Should show app name");
    for command in ["health", "alerts", "detector", "buckets", "send", "deliveries", "status"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let stdout = help(&["--version"]);
    assert!(stdout.contains("pondctl"), "Should show binary name");
}

#[test]
fn test_alerts_help() {
    let stdout = help(&["alerts", "--help"]);
    assert!(stdout.contains("--since"), "Should show since option");
    assert!(stdout.contains("--severity"), "Should show severity option");
}

#[test]
fn test_buckets_help() {
    let stdout = help(&["buckets", "--help"]);
    assert!(stdout.contains("--granularity"));
    assert!(stdout.contains("<SENSOR>"));
}

#[test]
fn test_send_help() {
    let stdout = help(&["send", "--help"]);
    assert!(stdout.contains("--unit"));
    assert!(stdout.contains("--timestamp"));
}

#[test]
fn test_missing_pond_argument_fails() {
    let home = TempDir::new().unwrap();
    let output = pondctl(&home, &["health"], None);
    assert!(!output.status.success());
}

#[test]
fn test_health_json_from_service() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/v1/ponds/3/health")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"pond_id":3,"timestamp":"2024-06-01T06:00:00Z","score":82.5,"grade":"good","status":"healthy","contributing_factors":[]}"#,
        )
        .create();

    let home = TempDir::new().unwrap();
    let output = pondctl(&home, &["--format", "json", "health", "3"], Some(&server.url()));

    mock.assert();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["score"], 82.5);
    assert_eq!(body["grade"], "good");
}

#[test]
fn test_rejected_reading_exits_with_error() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/v1/readings")
        .with_status(422)
        .with_body(r#"{"code":"out_of_bounds","message":"value 99 outside physical bounds [0, 14] for ph"}"#)
        .create();

    let home = TempDir::new().unwrap();
    let output = pondctl(&home, &["send", "1", "ph", "99"], Some(&server.url()));

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("out_of_bounds"), "stderr was: {}", stderr);
}

#[test]
fn test_unknown_sensor_is_rejected_locally() {
    let home = TempDir::new().unwrap();
    // Nothing listens on this port; the sensor is checked before any request
    let output = pondctl(
        &home,
        &["detector", "1", "salinity"],
        Some("http://127.0.0.1:9"),
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid sensor type"), "stderr was: {}", stderr);
}

#[test]
fn test_config_set_then_show() {
    let home = TempDir::new().unwrap();

    let output = pondctl(
        &home,
        &[
            "config",
            "set",
            "--api-url",
            "http://sentinel.farm:8080",
            "--default-format",
            "json",
        ],
        None,
    );
    assert!(output.status.success());

    let output = pondctl(&home, &["config", "show"], None);
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["api_url"], "http://sentinel.farm:8080");
    assert_eq!(body["default_format"], "json");
}
