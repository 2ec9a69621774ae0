#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use cellparse::marshal::{DefaultMarshaller, RuleTypes};
use cellparse::{BuildTarget, ParseError, PerBuildState};

use crate::helpers::build_files::{config, repo_with_plugins, rule, session};
use crate::helpers::parsers::ScriptedParsers;

#[test]
fn test_failed_parse_is_retried_not_cached() {
    let parsers = ScriptedParsers::new();
    parsers.malformed("/repo/app/BUCK", "unexpected `)`");
    let state = session(repo_with_plugins(config()), &parsers);
    let target = BuildTarget::new("/repo", "app", "lib");

    let err = state.target_node(&target).unwrap_err();
    match &err {
        ParseError::ParseFailure { path, line, .. } => {
            assert_eq!(path, Path::new("/repo/app/BUCK"));
            assert_eq!(*line, Some(1));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(state.target_node(&target).is_err());
    assert_eq!(parsers.parses("/repo/app/BUCK"), 2);

    parsers.file("/repo/app/BUCK", vec![rule("lib", "js_library")]);
    assert!(state.target_node(&target).is_ok());
    assert_eq!(parsers.parses("/repo/app/BUCK"), 3);
    state.close().unwrap();
}

#[test]
fn test_waiters_of_a_failed_parse_share_the_error() {
    let parsers = ScriptedParsers::new();
    parsers.set_delay(Duration::from_millis(50));
    parsers.malformed("/repo/app/BUCK", "bad");
    let state = session(repo_with_plugins(config()), &parsers);

    let barrier = Barrier::new(4);
    let errors: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|name| {
                let (barrier, state) = (&barrier, &state);
                scope.spawn(move || {
                    barrier.wait();
                    state
                        .target_node(&BuildTarget::new("/repo", "app", name))
                        .unwrap_err()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(errors.iter().all(|e| matches!(e, ParseError::ParseFailure { .. })));
    // Late arrivals may start a fresh attempt, but never one per caller.
    assert!(parsers.parses("/repo/app/BUCK") < 4);
    state.close().unwrap();
}

#[test]
fn test_target_errors_do_not_spread_to_siblings() {
    let parsers = ScriptedParsers::new();
    parsers.file(
        "/repo/app/BUCK",
        vec![rule("lib", "js_library"), rule("native", "cxx_library")],
    );
    let root = repo_with_plugins(config());
    let state = PerBuildState::builder(root, parsers.factory())
        .marshaller(Arc::new(DefaultMarshaller::new(RuleTypes::javascript().unwrap())))
        .build()
        .unwrap();

    let err = state
        .target_node(&BuildTarget::new("/repo", "app", "native"))
        .unwrap_err();
    assert!(matches!(err, ParseError::TargetDefinition { .. }));
    assert!(err.to_string().contains("//app:native"));

    let missing = state
        .target_node(&BuildTarget::new("/repo", "app", "ghost"))
        .unwrap_err();
    assert!(matches!(missing, ParseError::NoSuchTarget { .. }));

    assert!(state.target_node(&BuildTarget::new("/repo", "app", "lib")).is_ok());
    assert_eq!(parsers.parses("/repo/app/BUCK"), 1);
    state.close().unwrap();
}

#[test]
fn test_worker_exhaustion_times_out() {
    let parsers = ScriptedParsers::new();
    parsers.set_delay(Duration::from_millis(300));
    parsers.file("/repo/a/BUCK", vec![rule("a", "genrule")]);
    parsers.file("/repo/b/BUCK", vec![rule("b", "genrule")]);
    let limited = config()
        .with_threads(1)
        .with_borrow_timeout(Some(Duration::from_millis(20)));
    let state = session(repo_with_plugins(limited), &parsers);

    let slow = state.target_node_job(&BuildTarget::new("/repo", "a", "a"));
    std::thread::sleep(Duration::from_millis(50));
    let err = state
        .target_node(&BuildTarget::new("/repo", "b", "b"))
        .unwrap_err();
    assert!(matches!(err, ParseError::WorkerUnavailable { .. }));

    assert!(slow.wait().is_ok());
    assert!(state.target_node(&BuildTarget::new("/repo", "b", "b")).is_ok());
    assert_eq!(parsers.created(), 1);
    state.close().unwrap();
}

#[test]
fn test_missing_package_keeps_its_parser() {
    let parsers = ScriptedParsers::new();
    let state = session(repo_with_plugins(config().with_threads(1)), &parsers);
    let target = BuildTarget::new("/repo", "nope", "x");

    for _ in 0..3 {
        let err = state.target_node(&target).unwrap_err();
        match &err {
            ParseError::ParseFailure { path, .. } => {
                assert_eq!(path, Path::new("/repo/nope/BUCK"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(parsers.parses("/repo/nope/BUCK"), 3);
    assert_eq!(parsers.created(), 1);
    assert_eq!(parsers.closed(), 0);
    state.close().unwrap();
    assert_eq!(parsers.closed(), 1);
}
