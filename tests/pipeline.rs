//! Local pipeline integration tests.
//!
//! These tests run real subprocesses and need a Unix userland
//! (`echo`, `cat`, `tr`, `sort`, `wc`).

#![cfg(unix)]

use shell_courier::stream::CaptureBuffer;
use shell_courier::{eval, CourierError, IoConfig, SharedSink};

// ============================================================================
// Redirects
// ============================================================================

#[tokio::test]
async fn test_output_redirect_feeds_file_and_caller_sink() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.txt");
    let sink = CaptureBuffer::new();

    let out = eval(
        &format!("echo hi > {}", target.display()),
        IoConfig::new().stdout(SharedSink::from(sink.clone())),
    )
    .await
    .unwrap();

    assert_eq!(out, "");
    assert_eq!(sink.text(), "hi\n");
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hi\n");
}

#[tokio::test]
async fn test_output_redirect_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.txt");
    std::fs::write(&target, "a much longer previous content\n").unwrap();

    eval(&format!("echo new > {}", target.display()), IoConfig::new())
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "new\n");
}

#[tokio::test]
async fn test_input_redirect_feeds_stage() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("names.txt");
    std::fs::write(&source, "carol\nalice\nbob\n").unwrap();

    let out = eval(
        &format!("sort < {} | tr a-z A-Z", source.display()),
        IoConfig::new(),
    )
    .await
    .unwrap();

    assert_eq!(out, "ALICE\nBOB\nCAROL\n");
}

#[tokio::test]
async fn test_missing_input_file_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let missing = dir.path().join("missing.txt");

    let err = eval(
        &format!("touch {} | cat < {}", marker.display(), missing.display()),
        IoConfig::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CourierError::Redirect { .. }), "{:?}", err);
    assert!(!marker.exists());
}

// ============================================================================
// Quoting and chaining
// ============================================================================

#[tokio::test]
async fn test_quoted_operators_are_literal() {
    let out = eval("echo 'a | b > c'", IoConfig::new()).await.unwrap();
    assert_eq!(out, "a | b > c\n");
}

#[tokio::test]
async fn test_three_stage_pipeline() {
    let out = eval(
        "echo \"one two three\" | tr ' ' '\\n' | wc -l",
        IoConfig::new(),
    )
    .await
    .unwrap();
    assert_eq!(out.trim(), "3");
}

#[tokio::test]
async fn test_failing_middle_stage_stops_pipeline() {
    let err = eval("echo data | false | cat", IoConfig::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, CourierError::ExitStatus { ref command, .. } if command.contains("false")),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_caller_stdin_and_sinks() {
    let stdout = CaptureBuffer::new();
    let stderr = CaptureBuffer::new();
    let io = IoConfig::new()
        .stdin(std::io::Cursor::new(b"b\na\n".to_vec()))
        .stdout(SharedSink::from(stdout.clone()))
        .stderr(SharedSink::from(stderr.clone()));

    let out = eval("sort", io).await.unwrap();

    assert_eq!(out, "a\nb\n");
    assert_eq!(stdout.text(), "a\nb\n");
    assert!(stderr.is_empty());
}
