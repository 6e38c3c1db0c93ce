//! End-to-end session tests against a real `/bin/sh`.

use std::sync::Arc;
use std::time::Duration;

use vpsphere_core::activity::load_activity;
use vpsphere_core::escape::strip_code_block;
use vpsphere_core::session::ProcessHandle;
use vpsphere_core::sink::{Delivered, MemorySink};
use vpsphere_core::{
    Accepted, ActivityEvent, ActivityLog, ControllerConfig, OutgoingChunk, OutputSink, SessionKey,
    SessionRegistry, ShellSessionController, Submission, VpsError, VpsResult,
    WorkingDirectoryState,
};

const KEY: SessionKey = SessionKey(1001);
const TIMEOUT: Duration = Duration::from_secs(10);

fn controller_in(dir: &std::path::Path, config: ControllerConfig) -> ShellSessionController {
    ShellSessionController::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(WorkingDirectoryState::new(dir).unwrap()),
        config,
    )
}

async fn submit(
    controller: &ShellSessionController,
    text: &str,
    sink: &MemorySink,
) -> Result<Submission, VpsError> {
    tokio::time::timeout(TIMEOUT, controller.submit(KEY, text, sink))
        .await
        .expect("submission timed out")
}

#[tokio::test]
async fn echo_hello_streams_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = MemorySink::new();

    let submission = submit(&controller, "echo hello", &sink).await.unwrap();
    assert!(matches!(
        submission,
        Submission::Completed {
            exit_code: Some(0),
            ..
        }
    ));

    let texts = sink.texts();
    assert_eq!(texts.len(), 2, "{texts:?}");
    assert!(texts[0].contains("`echo hello`"));
    assert_eq!(strip_code_block(&texts[1]).as_deref(), Some("hello"));
    assert!(controller.registry().lookup(KEY).is_none());
}

#[tokio::test]
async fn follow_up_text_goes_to_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = MemorySink::new();

    let accepted = controller
        .accept(KEY, "read answer; echo got:$answer", &sink)
        .await
        .unwrap();
    let Accepted::Running(session) = accepted else {
        panic!("expected a running session");
    };
    assert!(controller.registry().contains(KEY));

    // Not spawned: written to stdin of the registered process.
    let second = controller.accept(KEY, "print(1+1)", &sink).await.unwrap();
    assert!(matches!(second, Accepted::Done(Submission::Forwarded)));
    assert_eq!(controller.registry().count(), 1);

    let done = tokio::time::timeout(TIMEOUT, session.drive(&sink))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(done, Submission::Completed { .. }));

    let texts = sink.texts();
    // Starting notice plus the output; no second starting notice.
    assert_eq!(texts.len(), 2, "{texts:?}");
    assert_eq!(
        strip_code_block(&texts[1]).as_deref(),
        Some("got:print(1+1)")
    );
    assert!(!controller.registry().contains(KEY));
}

#[tokio::test]
async fn directory_directive_changes_spawn_cwd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = MemorySink::new();
    let start = controller.workdir().current().await;

    let changed = submit(&controller, "CD sub", &sink).await.unwrap();
    assert_eq!(changed, Submission::DirectoryChanged(start.join("sub")));
    assert!(sink.texts()[0].contains("Moved to"));

    submit(&controller, "pwd", &sink).await.unwrap();
    let pwd = strip_code_block(sink.texts().last().unwrap()).unwrap();
    assert!(pwd.ends_with("/sub"), "{pwd}");

    submit(&controller, "cd ..", &sink).await.unwrap();
    assert_eq!(controller.workdir().current().await, start);
}

#[tokio::test]
async fn missing_directory_is_reported_and_state_kept() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = MemorySink::new();
    let before = controller.workdir().current().await;

    let rejected = submit(&controller, "cd doesnotexist123", &sink)
        .await
        .unwrap();
    assert!(matches!(rejected, Submission::DirectoryRejected(_)));
    assert_eq!(controller.workdir().current().await, before);

    let texts = sink.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Folder not found"));
    assert!(controller.registry().count() == 0);
}

#[tokio::test]
async fn spawn_failure_yields_error_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig {
        shell: "/nonexistent/vpsphere-shell".into(),
        ..ControllerConfig::default()
    };
    let controller = controller_in(dir.path(), config);
    let sink = MemorySink::new();

    let submission = submit(&controller, "true", &sink).await.unwrap();
    assert_eq!(submission, Submission::SpawnFailed);
    let texts = sink.texts();
    assert!(texts.last().unwrap().contains("Failed to run command"));
    assert!(!controller.registry().contains(KEY));
}

#[tokio::test]
async fn long_output_is_split_into_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = MemorySink::new();

    // 1000 lines of "line\n" = 5000 characters.
    submit(&controller, "yes line | head -n 1000", &sink)
        .await
        .unwrap();

    let outputs: Vec<String> = sink.texts()[1..]
        .iter()
        .map(|t| strip_code_block(t).unwrap())
        .collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].len(), 3505);
    assert_eq!(outputs.concat().matches("line").count(), 1000);
}

#[tokio::test]
async fn oversize_tail_spills_to_file_when_threshold_allows() {
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig {
        chunk_threshold: 10_000,
        ..ControllerConfig::default()
    };
    let controller = controller_in(dir.path(), config);

    let sink = MemorySink::new();
    submit(&controller, "head -c 3501 /dev/zero | tr '\\0' a", &sink)
        .await
        .unwrap();
    match sink.delivered().last() {
        Some(Delivered::File {
            file_name,
            contents,
        }) => {
            assert_eq!(file_name, "output.txt");
            assert_eq!(contents.len(), 3501);
        }
        other => panic!("expected file, got {other:?}"),
    }

    let sink = MemorySink::new();
    submit(&controller, "head -c 3500 /dev/zero | tr '\\0' a", &sink)
        .await
        .unwrap();
    let last = sink.texts().pop().unwrap();
    assert_eq!(strip_code_block(&last).unwrap(), "a".repeat(3500));
}

#[tokio::test]
async fn multibyte_character_split_by_long_line_survives() {
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig {
        chunk_threshold: 1_000_000,
        message_limit: 1_000_000,
        ..ControllerConfig::default()
    };
    let controller = controller_in(dir.path(), config);
    let sink = MemorySink::new();

    // One 65537-byte line: the read cut lands between the two bytes of 'é'.
    submit(
        &controller,
        "head -c 65535 /dev/zero | tr '\\0' a; printf '\\303\\251'",
        &sink,
    )
    .await
    .unwrap();
    let last = sink.texts().pop().unwrap();
    let text = strip_code_block(&last).unwrap();
    assert!(!text.contains('\u{fffd}'));
    assert_eq!(text, format!("{}é", "a".repeat(65535)));
}

/// Yields before recording so concurrent submissions interleave.
struct YieldingSink(MemorySink);

#[async_trait::async_trait]
impl OutputSink for YieldingSink {
    async fn deliver(&self, chunk: OutgoingChunk) -> VpsResult<()> {
        tokio::task::yield_now().await;
        self.0.deliver(chunk).await
    }
}

#[tokio::test]
async fn concurrent_start_keeps_one_process_and_kills_the_other() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = YieldingSink(MemorySink::new());

    let (a, b) = tokio::join!(
        controller.accept(KEY, "sleep 1 && touch a.done", &sink),
        controller.accept(KEY, "sleep 1 && touch b.done", &sink),
    );
    assert_eq!(controller.registry().count(), 1);
    let (winner, loser_marker) = match (a, b) {
        (Ok(Accepted::Running(session)), Err(VpsError::AlreadyActive(key))) => {
            assert_eq!(key, KEY);
            (session, "b.done")
        }
        (Err(VpsError::AlreadyActive(key)), Ok(Accepted::Running(session))) => {
            assert_eq!(key, KEY);
            (session, "a.done")
        }
        _ => panic!("expected one running and one rejected submission"),
    };
    assert!(sink
        .0
        .texts()
        .iter()
        .any(|t| t.contains("Another command is still running")));

    let done = tokio::time::timeout(TIMEOUT, winner.drive(&sink))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(done, Submission::Completed { exit_code: Some(0), .. }));
    assert!(!controller.registry().contains(KEY));

    // The rejected process was killed before it could reach `touch`.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let winner_marker = if loser_marker == "a.done" { "b.done" } else { "a.done" };
    assert!(dir.path().join(winner_marker).exists());
    assert!(!dir.path().join(loser_marker).exists());
}

#[tokio::test]
async fn input_to_closed_process_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = MemorySink::new();
    controller
        .registry()
        .register(KEY, ProcessHandle::detached("ghost"))
        .unwrap();

    let submission = submit(&controller, "hello", &sink).await.unwrap();
    assert_eq!(submission, Submission::InputRejected);
    assert!(sink.texts()[0].contains("Input not delivered"));
}

#[tokio::test]
async fn shutdown_kills_and_releases_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = Arc::new(MemorySink::new());

    let Accepted::Running(session) = controller
        .accept(KEY, "sleep 30", sink.as_ref())
        .await
        .unwrap()
    else {
        panic!("expected a running session");
    };
    controller.spawn_session(session, sink.clone());
    assert!(controller.registry().contains(KEY));

    tokio::time::timeout(TIMEOUT, controller.shutdown())
        .await
        .expect("shutdown timed out");
    assert!(!controller.registry().contains(KEY));
}

#[tokio::test]
async fn dropping_a_session_releases_its_key() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = MemorySink::new();

    let Accepted::Running(session) = controller.accept(KEY, "sleep 30", &sink).await.unwrap()
    else {
        panic!("expected a running session");
    };
    assert_eq!(session.key(), KEY);
    drop(session);
    assert!(!controller.registry().contains(KEY));

    // The slot is free again.
    let next = submit(&controller, "echo again", &sink).await.unwrap();
    assert!(matches!(next, Submission::Completed { .. }));
}

#[tokio::test]
async fn sessions_for_different_chats_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_in(dir.path(), ControllerConfig::default());
    let sink = MemorySink::new();

    let Accepted::Running(first) = controller.accept(KEY, "sleep 30", &sink).await.unwrap()
    else {
        panic!("expected a running session");
    };
    let other = SessionKey(2002);
    let result = tokio::time::timeout(TIMEOUT, controller.submit(other, "echo other", &sink))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Submission::Completed { .. }));
    assert!(controller.registry().contains(KEY));
    drop(first);
}

#[tokio::test]
async fn activity_log_records_command_and_exit() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("activity.log");
    let controller = controller_in(dir.path(), ControllerConfig::default())
        .with_activity_log(Arc::new(ActivityLog::new(log_path.clone())));
    let sink = MemorySink::new();

    submit(&controller, "exit 3", &sink).await.unwrap();

    let entries = load_activity(&log_path).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(matches!(
        &entries[0].event,
        ActivityEvent::Command { command, .. } if command == "exit 3"
    ));
    assert_eq!(entries[1].event, ActivityEvent::Exit { code: Some(3) });
}
