#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cellparse::daemon::DaemonicParserState;
use cellparse::{BuildTarget, ParseError, PerBuildState};

use crate::helpers::build_files::{app_build_file, config, repo_with_plugins, rule, session};
use crate::helpers::parsers::ScriptedParsers;

/// Three packages parsed concurrently so the pool creates three parsers.
fn busy_session(parsers: &Arc<ScriptedParsers>) -> PerBuildState {
    parsers.set_delay(Duration::from_millis(40));
    for package in ["a", "b", "c"] {
        parsers.file(&format!("/repo/{package}/BUCK"), vec![rule(package, "genrule")]);
    }
    let state = session(repo_with_plugins(config().with_threads(3)), parsers);
    let jobs: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|p| state.target_node_job(&BuildTarget::new("/repo", *p, *p)))
        .collect();
    for job in jobs {
        job.wait().unwrap();
    }
    state
}

#[test]
fn test_close_releases_every_parser_once() {
    let parsers = ScriptedParsers::new();
    let state = busy_session(&parsers);
    let created = parsers.created();
    assert!(created >= 1);

    state.close().unwrap();
    assert_eq!(parsers.closed(), created);
}

#[test]
fn test_close_aggregates_worker_failure() {
    let parsers = ScriptedParsers::new();
    let state = busy_session(&parsers);
    let created = parsers.created();
    parsers.fail_close_of(1);

    let err = state.close().unwrap_err();
    match &err {
        ParseError::Close { errors } => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].is_io());
        }
        other => panic!("unexpected error {other:?}"),
    }
    // The failure did not stop the remaining parsers from closing.
    assert_eq!(parsers.closed(), created);
    assert!(state.is_closed());
}

#[test]
fn test_operations_after_close_fail() {
    let parsers = ScriptedParsers::new();
    app_build_file(&parsers);
    let state = session(repo_with_plugins(config()), &parsers);
    let root = Arc::clone(&state.cells()[0]);
    let lib = BuildTarget::new("/repo", "app", "lib");
    state.target_node(&lib).unwrap();
    state.close().unwrap();

    assert!(matches!(state.target_node(&lib), Err(ParseError::SessionClosed)));
    assert!(matches!(state.resolve(&lib), Err(ParseError::SessionClosed)));
    assert!(matches!(
        state.all_raw_nodes(&root, Path::new("/repo/app/BUCK")),
        Err(ParseError::SessionClosed)
    ));
    assert!(matches!(
        state.all_target_nodes(&root, Path::new("/repo/app/BUCK")),
        Err(ParseError::SessionClosed)
    ));
    assert!(matches!(
        state.target_node_job(&lib).try_get(),
        Some(Err(ParseError::SessionClosed))
    ));
    assert!(matches!(
        state
            .all_target_nodes_job(&root, Path::new("/repo/app/BUCK"))
            .try_get(),
        Some(Err(ParseError::SessionClosed))
    ));
    assert!(matches!(state.close(), Err(ParseError::SessionClosed)));
}

#[test]
fn test_close_waits_for_in_flight_work() {
    let parsers = ScriptedParsers::new();
    parsers.set_delay(Duration::from_millis(150));
    app_build_file(&parsers);
    let state = session(repo_with_plugins(config()), &parsers);

    let job = state.target_node_job(&BuildTarget::new("/repo", "app", "lib"));
    std::thread::sleep(Duration::from_millis(20));
    state.close().unwrap();

    assert!(job.is_done());
    assert!(job.try_get().unwrap().is_ok());
    assert_eq!(parsers.closed(), parsers.created());
}

#[test]
fn test_close_wait_is_bounded() {
    let parsers = ScriptedParsers::new();
    parsers.set_delay(Duration::from_millis(600));
    app_build_file(&parsers);
    let bounded = config().with_close_timeout(Duration::from_millis(50));
    let state = session(repo_with_plugins(bounded), &parsers);

    let job = state.target_node_job(&BuildTarget::new("/repo", "app", "lib"));
    std::thread::sleep(Duration::from_millis(20));
    let start = Instant::now();
    let err = state.close().unwrap_err();
    assert!(start.elapsed() < Duration::from_millis(500));
    match &err {
        ParseError::Close { errors } => assert!(
            errors
                .iter()
                .any(|e| matches!(e, ParseError::InFlightAtClose { .. }))
        ),
        other => panic!("unexpected error {other:?}"),
    }

    // The straggler's parser is closed once it is given back.
    let _ = job.wait();
    assert_eq!(parsers.closed(), parsers.created());
}

#[test]
fn test_daemon_cache_spans_sessions() {
    let parsers = ScriptedParsers::new();
    app_build_file(&parsers);
    let daemon = Arc::new(DaemonicParserState::new());
    let lib = BuildTarget::new("/repo", "app", "lib");

    for _ in 0..2 {
        let state = PerBuildState::builder(repo_with_plugins(config()), parsers.factory())
            .daemon(Arc::clone(&daemon))
            .build()
            .unwrap();
        state.target_node(&lib).unwrap();
        state.close().unwrap();
    }
    assert_eq!(parsers.parses("/repo/app/BUCK"), 1);
    assert_eq!(daemon.target_node_count(), 1);

    assert!(daemon.invalidate_path(Path::new("/repo/app/BUCK")) > 0);
    let state = PerBuildState::builder(repo_with_plugins(config()), parsers.factory())
        .daemon(Arc::clone(&daemon))
        .build()
        .unwrap();
    state.target_node(&lib).unwrap();
    assert_eq!(parsers.parses("/repo/app/BUCK"), 2);
}

#[test]
fn test_unclosed_session_closes_on_drop() {
    let parsers = ScriptedParsers::new();
    app_build_file(&parsers);
    {
        let state = session(repo_with_plugins(config()), &parsers);
        state
            .target_node(&BuildTarget::new("/repo", "app", "lib"))
            .unwrap();
    }
    assert_eq!(parsers.created(), 1);
    assert_eq!(parsers.closed(), 1);
}
