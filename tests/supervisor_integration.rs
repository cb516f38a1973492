//! Integration tests for the supervisor: unit loading, stage ordering,
//! dependency handling, and status reporting, using real unit files and
//! real child processes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vinit::supervisor::unit::Stage;
use vinit::supervisor::Supervisor;

fn write_unit(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).expect("write unit file");
}

async fn load(dir: &Path) -> Supervisor {
    let mut supervisor = Supervisor::new(None);
    supervisor.load_units(dir).await.expect("load units");
    supervisor
}

#[tokio::test]
async fn units_load_sorted_by_file_name() {
    let dir = tempfile::tempdir().unwrap();
    write_unit(
        dir.path(),
        "b.service",
        "[Service]\nStage=init\nType=oneshot\nExecStart=/bin/true\n",
    );
    write_unit(
        dir.path(),
        "a.service",
        "[Service]\nStage=init\nType=oneshot\nExecStart=/bin/true\n",
    );
    write_unit(dir.path(), "notes.txt", "not a unit");

    let supervisor = load(dir.path()).await;
    assert_eq!(supervisor.service_names(), vec!["a", "b"]);
}

#[tokio::test]
async fn templates_are_parsed_but_not_enrolled() {
    let dir = tempfile::tempdir().unwrap();
    write_unit(
        dir.path(),
        "getty@.service",
        "[Service]\nExecStart=/cmd/getty %i\n",
    );

    let supervisor = load(dir.path()).await;
    assert!(supervisor.service_names().is_empty());
}

#[tokio::test]
async fn bad_units_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_unit(
        dir.path(),
        "good.service",
        "[Service]\nType=oneshot\nExecStart=/bin/true\n",
    );
    write_unit(dir.path(), "broken.service", "[Service]\nStage=init\n");

    let supervisor = load(dir.path()).await;
    assert_eq!(supervisor.service_names(), vec!["good"]);
}

#[tokio::test]
async fn oneshot_exit_codes_map_to_states() {
    let dir = tempfile::tempdir().unwrap();
    write_unit(
        dir.path(),
        "ok.service",
        "[Service]\nStage=init\nType=oneshot\nExecStart=/bin/true\n",
    );
    write_unit(
        dir.path(),
        "bad.service",
        "[Service]\nStage=init\nType=oneshot\nExecStart=/bin/false\n",
    );

    let supervisor = Arc::new(load(dir.path()).await);
    assert_eq!(supervisor.status_of("ok"), "not-started");

    Arc::clone(&supervisor).run_stage(Stage::Init).await;
    assert_eq!(supervisor.status_of("ok"), "finished");
    assert_eq!(supervisor.status_of("bad"), "failed");
}

#[tokio::test]
async fn unknown_service_status_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = load(dir.path()).await;
    assert_eq!(supervisor.status_of("nonexistent"), "unknown");
}

#[tokio::test]
async fn later_stages_start_after_earlier_stages_settle() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("first");
    let witness = dir.path().join("second");

    write_unit(
        dir.path(),
        "early.service",
        &format!(
            "[Service]\nStage=init\nType=oneshot\nExecStart=/bin/sh -c \"sleep 0.2 && touch {}\"\n",
            marker.display()
        ),
    );
    // Only succeeds if the init stage fully completed first.
    write_unit(
        dir.path(),
        "late.service",
        &format!(
            "[Service]\nStage=service\nType=oneshot\nExecStart=/bin/sh -c \"test -f {} && touch {}\"\n",
            marker.display(),
            witness.display()
        ),
    );

    let supervisor = Arc::new(load(dir.path()).await);
    for stage in Stage::ALL {
        Arc::clone(&supervisor).run_stage(stage).await;
    }

    assert_eq!(supervisor.status_of("early"), "finished");
    assert_eq!(supervisor.status_of("late"), "finished");
    assert!(witness.exists());
}

#[tokio::test]
async fn missing_dependency_fails_immediately() {
    let dir = tempfile::tempdir().unwrap();
    write_unit(
        dir.path(),
        "needy.service",
        "[Unit]\nDepends=ghost\n\n[Service]\nStage=init\nType=oneshot\nExecStart=/bin/true\n",
    );

    let supervisor = Arc::new(load(dir.path()).await);
    let started = std::time::Instant::now();
    Arc::clone(&supervisor).run_stage(Stage::Init).await;

    assert_eq!(supervisor.status_of("needy"), "failed");
    // Missing dependencies must not sit out the 10 s poll timeout.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn dependency_within_a_stage_is_awaited() {
    let dir = tempfile::tempdir().unwrap();
    write_unit(
        dir.path(),
        "base.service",
        "[Service]\nStage=init\nType=oneshot\nExecStart=/bin/true\n",
    );
    write_unit(
        dir.path(),
        "dependent.service",
        "[Unit]\nDepends=base\n\n[Service]\nStage=init\nType=oneshot\nExecStart=/bin/true\n",
    );

    let supervisor = Arc::new(load(dir.path()).await);
    Arc::clone(&supervisor).run_stage(Stage::Init).await;

    assert_eq!(supervisor.status_of("base"), "finished");
    assert_eq!(supervisor.status_of("dependent"), "finished");
}

#[tokio::test]
async fn restarting_daemon_is_respawned_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("starts.log");

    write_unit(
        dir.path(),
        "flappy.service",
        &format!(
            "[Service]\nStage=init\nType=daemon\nRestart=yes\nExecStart=/bin/sh -c \"echo start >> {}\"\n",
            log.display()
        ),
    );

    let supervisor = Arc::new(load(dir.path()).await);
    Arc::clone(&supervisor).run_stage(Stage::Init).await;

    // The daemon exits immediately; the monitor restarts it roughly once
    // per second.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    supervisor.begin_shutdown();

    let starts = std::fs::read_to_string(&log).expect("daemon never started");
    let count = starts.lines().count();
    assert!(count >= 2, "expected at least 2 starts, saw {}", count);
    assert!(count <= 4, "restart backoff was not honored: {} starts", count);
}

#[test]
fn journal_rotation_keeps_the_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal");
    std::fs::write(&journal_path, "old contents").unwrap();

    let journal = Supervisor::open_journal(&journal_path);
    assert!(journal.is_some());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("journal.old")).unwrap(),
        "old contents"
    );
    assert!(journal_path.exists());
}
