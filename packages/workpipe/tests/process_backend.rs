//! Worker processes re-executing the workpipe binary.

use serde_json::json;
use std::fs;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use workpipe::config::{BackendKind, PerformanceSettings};
use workpipe::pipeline::{Options, SessionTicket, WorkItem};
use workpipe::pool::{Backend, PoolState, ProcessSpec, WorkerPool};

fn process_pool(name: &str) -> WorkerPool {
    let spec = ProcessSpec::new("copy").with_exe(env!("CARGO_BIN_EXE_workpipe"));
    let settings = PerformanceSettings {
        backend: BackendKind::Process,
        coroutines: 2,
        queue_size: 16,
        poll_interval_ms: 50,
        join_timeout_ms: 5000,
        terminate_grace_ms: 500,
        ..PerformanceSettings::default()
    };
    WorkerPool::new(name, Backend::Process(spec), settings)
}

#[test]
fn test_process_workers_copy_files() {
    let temp = TempDir::new().unwrap();
    let mut paths = Vec::new();
    for i in 0..6 {
        let path = temp.path().join(format!("f{i}.txt"));
        fs::write(&path, format!("line {i}\n")).unwrap();
        paths.push(path.to_string_lossy().into_owned());
    }
    let empty = temp.path().join("empty.txt");
    fs::write(&empty, "").unwrap();
    paths.push(empty.to_string_lossy().into_owned());

    let pool = process_pool("proc");
    pool.start(2).unwrap();
    let options = Options::from_iter([("outname_append".to_string(), json!(".copy"))]);
    let results = pool.map(&paths, &options);
    let report = pool.shutdown(None);

    assert_eq!(results.len(), 7);
    for (i, result) in results.iter().take(6).enumerate() {
        let output = result.output.as_deref().expect("copied output");
        assert!(output.ends_with(&format!("f{i}.copy.txt")));
        assert_eq!(fs::read_to_string(output).unwrap(), format!("line {i}\n"));
        assert_eq!(result.meta["lines"], json!(1));
    }
    assert!(results[6].is_dropped());
    assert!(!results[6].is_deferred());

    assert_eq!(report.joined, 2);
    assert_eq!(report.killed, 0);
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(pool.counters().get("items_received"), 7);
    assert_eq!(pool.counters().get("items_completed"), 6);
    assert_eq!(pool.counters().get("items_dropped"), 1);
}

#[test]
fn test_missing_input_is_dropped_not_fatal() {
    let temp = TempDir::new().unwrap();
    let present = temp.path().join("here.txt");
    fs::write(&present, "x\n").unwrap();
    let paths = vec![
        temp.path().join("missing.txt").to_string_lossy().into_owned(),
        present.to_string_lossy().into_owned(),
    ];

    let pool = process_pool("missing");
    pool.start(1).unwrap();
    let options = Options::from_iter([("outname_append".to_string(), json!(".copy"))]);
    let results = pool.map(&paths, &options);
    pool.shutdown(None);

    assert!(results[0].is_dropped());
    assert!(results[1].output.is_some());
    assert_eq!(pool.counters().get("items_failed"), 1);
}

/// SIGTERM cancels a worker process stuck in a long session, so the
/// escalation stops at terminate.
#[test]
fn test_terminate_unwinds_held_session() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("workpipe.toml");
    fs::write(&config, "[session]\nhold_ms = 30000\n").unwrap();

    let spec = ProcessSpec::new("copy")
        .with_exe(env!("CARGO_BIN_EXE_workpipe"))
        .with_config(Some(config));
    let settings = PerformanceSettings {
        backend: BackendKind::Process,
        coroutines: 1,
        queue_size: 8,
        poll_interval_ms: 50,
        join_timeout_ms: 300,
        terminate_grace_ms: 5000,
        ..PerformanceSettings::default()
    };
    let pool = WorkerPool::new("held", Backend::Process(spec), settings);
    pool.start(1).unwrap();
    let ticket = SessionTicket::new("fd:9", "log", "LogSession", 2525);
    assert!(pool.add_task(WorkItem::Session(ticket)));

    let deadline = Instant::now() + Duration::from_secs(10);
    while pool.counters().get("items_received") < 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(pool.counters().get("items_received"), 1);

    let started = Instant::now();
    let report = pool.shutdown(None);

    assert_eq!(report.joined, 0);
    assert!(report.terminated >= 1);
    assert_eq!(report.killed, 0);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(pool.counters().get("sessions_handled"), 0);
    assert_eq!(pool.state(), PoolState::Stopped);
}
