// tests/interposer_e2e.rs
// End-to-end runs with shell scripts standing in for the worker and resolver
//
// The worker script prints an AskUserQuestion turn, reads one answer line
// from its input and reports it back as a result record, so the transcript
// shows exactly what the interposer wrote.

#![cfg(unix)]

use interpose::config::{AnswerFormat, InterposerConfig, TransportKind};
use interpose::{InterposeError, Interposer};
use serde_json::Value;
use std::time::Duration;

// ============================================================================
// TEST SETUP UTILITIES
// ============================================================================

const ASK_LINE: &str = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Need a decision"},{"type":"tool_use","id":"t1","name":"AskUserQuestion","input":{"questions":[{"question":"Which database?","header":"Storage","multiSelect":false,"options":[{"label":"SQLite","description":"Embedded"},{"label":"Postgres","description":"Server"}]}]}}]}}"#;

/// Worker that runs `prelude`, asks `ask`, echoes the answer it got and
/// exits with `code`
fn worker_script(prelude: &str, ask: &str, code: i32) -> String {
    format!(
        "{prelude}\
         printf '%s\\n' '{{\"type\":\"system\",\"subtype\":\"init\"}}'\n\
         printf '%s\\n' '{ask}'\n\
         read -r ans\n\
         printf '{{\"type\":\"result\",\"received\":%s}}\\n' \"$ans\"\n\
         exit {code}\n"
    )
}

fn asking_worker(code: i32) -> String {
    worker_script("", ASK_LINE, code)
}

fn config(worker_script: &str, resolver_script: &str) -> InterposerConfig {
    InterposerConfig {
        worker_binary: "sh".to_string(),
        worker_args: vec!["-c".to_string(), worker_script.to_string()],
        resolver_binary: "sh".to_string(),
        resolver_args: vec!["-c".to_string(), resolver_script.to_string()],
        ..Default::default()
    }
}

fn transcript_lines(transcript: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(transcript)
        .lines()
        .map(String::from)
        .collect()
}

/// The answer the worker saw, taken from its final result record
fn received(transcript: &[u8]) -> Value {
    let lines = transcript_lines(transcript);
    let last = lines.last().expect("transcript is empty");
    let record: Value = serde_json::from_str(last).expect("result record is JSON");
    assert_eq!(record["type"], "result");
    record["received"].clone()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_resolver_choice_reaches_worker() {
    let interposer = Interposer::from_config(config(&asking_worker(0), "echo 2")).unwrap();
    let mut transcript = Vec::new();

    let summary = interposer.run("choose storage", &mut transcript).await.unwrap();

    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.questions_answered, 1);
    assert_eq!(summary.resolver_failures, 0);

    let answer = received(&transcript);
    assert_eq!(answer["type"], "user_input_result");
    assert_eq!(answer["answer"]["tool_use_id"], "t1");
    assert_eq!(answer["answer"]["answers"]["q0"], "1");

    // The question line itself is forwarded untouched
    let lines = transcript_lines(&transcript);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], ASK_LINE);
}

#[tokio::test]
async fn test_failing_resolver_selects_first_option() {
    let interposer = Interposer::from_config(config(&asking_worker(0), "echo 2; exit 1")).unwrap();
    let mut transcript = Vec::new();

    let summary = interposer.run("choose storage", &mut transcript).await.unwrap();

    assert_eq!(summary.questions_answered, 1);
    assert_eq!(summary.resolver_failures, 1);
    assert_eq!(received(&transcript)["answer"]["answers"]["q0"], "0");
}

#[tokio::test]
async fn test_resolver_receives_rendered_prompt() {
    // $0 is -p, $1 the prompt, $2 and $3 the tool restriction
    let resolver = r#"case "$1" in *"Which database?"*"2. Postgres"*) ;; *) exit 9;; esac
[ "$2" = "--allowedTools" ] || exit 9
case "$3" in *Write*|*Edit*|*Bash*) exit 9;; esac
echo 2"#;
    let interposer = Interposer::from_config(config(&asking_worker(0), resolver)).unwrap();
    let mut transcript = Vec::new();

    let summary = interposer.run("choose storage", &mut transcript).await.unwrap();

    assert_eq!(summary.resolver_failures, 0);
    assert_eq!(received(&transcript)["answer"]["answers"]["q0"], "1");
}

#[tokio::test]
async fn test_tool_result_format() {
    let mut cfg = config(&asking_worker(0), "echo 2");
    cfg.answer_format = AnswerFormat::ToolResult;
    let interposer = Interposer::from_config(cfg).unwrap();
    let mut transcript = Vec::new();

    interposer.run("choose storage", &mut transcript).await.unwrap();

    let answer = received(&transcript);
    assert_eq!(answer["type"], "user");
    let block = &answer["message"]["content"][0];
    assert_eq!(block["type"], "tool_result");
    assert_eq!(block["tool_use_id"], "t1");
    assert!(block["content"].as_str().unwrap().contains("\"Which database?\"=\"Postgres\""));
}

#[tokio::test]
async fn test_worker_exit_code_propagates() {
    let interposer = Interposer::from_config(config(&asking_worker(3), "echo 1")).unwrap();
    let mut transcript = Vec::new();

    let summary = interposer.run("choose storage", &mut transcript).await.unwrap();

    assert_eq!(summary.exit_code, 3);
    assert!(!summary.success());
    assert_eq!(summary.questions_answered, 1);
}

#[tokio::test]
async fn test_plain_run_passes_everything_through() {
    let worker = r#"printf '%s\n' '{"type":"system","subtype":"init"}'
printf '%s\n' 'not json at all'
printf '%s\n' '{"type":"result","subtype":"success"}'"#;
    let interposer = Interposer::from_config(config(worker, "exit 1")).unwrap();
    let mut transcript = Vec::new();

    let summary = interposer.run("just work", &mut transcript).await.unwrap();

    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.questions_answered, 0);
    assert_eq!(summary.lines_forwarded, 3);
    assert_eq!(
        transcript_lines(&transcript),
        vec![
            r#"{"type":"system","subtype":"init"}"#,
            "not json at all",
            r#"{"type":"result","subtype":"success"}"#,
        ]
    );
}

#[tokio::test]
async fn test_missing_worker_is_launch_error() {
    let mut cfg = config("true", "echo 1");
    cfg.worker_binary = "/nonexistent/worker-binary".to_string();
    let interposer = Interposer::from_config(cfg).unwrap();
    let mut transcript = Vec::new();

    let err = interposer.run("task", &mut transcript).await.unwrap_err();

    assert!(matches!(err, InterposeError::WorkerLaunch(_)));
    assert!(transcript.is_empty());
}

#[tokio::test]
async fn test_invalid_config_rejected_before_launch() {
    let mut cfg = config("true", "echo 1");
    cfg.resolver_binary = String::new();

    let err = Interposer::from_config(cfg).err().expect("config should be rejected");
    assert!(matches!(err, InterposeError::Config(_)));
}

#[tokio::test]
async fn test_pty_transport_discards_answer_echo() {
    let mut cfg = config(&asking_worker(0), "echo 2");
    cfg.transport = TransportKind::Pty;
    let interposer = Interposer::from_config(cfg).unwrap();
    let mut transcript = Vec::new();

    let summary = interposer.run("choose storage", &mut transcript).await.unwrap();

    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.questions_answered, 1);
    assert_eq!(summary.echoes_discarded, 1);
    assert_eq!(received(&transcript)["answer"]["answers"]["q0"], "1");

    // The terminal echo of our answer never reaches the transcript
    let answer_lines = transcript_lines(&transcript)
        .into_iter()
        .filter(|l| l.starts_with(r#"{"type":"user_input_result""#))
        .count();
    assert_eq!(answer_lines, 0);
}

#[tokio::test]
async fn test_pty_transport_delivers_long_answer() {
    // A tool_result answer repeats the question, so this answer line is far
    // longer than a terminal's line-editing buffer
    let question = format!("Which database {}?", "x".repeat(6000));
    let ask = ASK_LINE.replace("Which database?", &question);
    let mut cfg = config(&worker_script("", &ask, 0), "echo 2");
    cfg.transport = TransportKind::Pty;
    cfg.answer_format = AnswerFormat::ToolResult;
    let interposer = Interposer::from_config(cfg).unwrap();
    let mut transcript = Vec::new();

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        interposer.run("choose storage", &mut transcript),
    )
    .await
    .expect("run should finish")
    .unwrap();

    assert_eq!(summary.questions_answered, 1);
    assert_eq!(summary.echoes_discarded, 1);
    let answer = received(&transcript);
    let content = answer["message"]["content"][0]["content"].as_str().unwrap();
    assert!(content.contains(&format!("\"{}\"=\"Postgres\"", question)));
}

#[tokio::test]
async fn test_worker_stderr_flood_does_not_stall_run() {
    // Far more than a pipe buffer holds, written before the question
    let prelude = "head -c 262144 /dev/zero | tr '\\0' '.' >&2\n";
    let cfg = config(&worker_script(prelude, ASK_LINE, 0), "echo 2");
    let interposer = Interposer::from_config(cfg).unwrap();
    let mut transcript = Vec::new();

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        interposer.run("choose storage", &mut transcript),
    )
    .await
    .expect("run should finish")
    .unwrap();

    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.questions_answered, 1);
    assert_eq!(received(&transcript)["answer"]["answers"]["q0"], "1");
}

#[tokio::test]
async fn test_closed_transcript_still_answers_and_reports_exit() {
    let (transcript, observer) = tokio::io::duplex(64);
    drop(observer);
    let interposer = Interposer::from_config(config(&asking_worker(3), "echo 2")).unwrap();

    let summary = interposer.run("choose storage", transcript).await.unwrap();

    assert_eq!(summary.exit_code, 3);
    assert_eq!(summary.questions_answered, 1);
    assert_eq!(summary.lines_forwarded, 0);
    assert!(matches!(summary.exit_status(), Err(InterposeError::WorkerExit(3))));
}
