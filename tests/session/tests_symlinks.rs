#![allow(clippy::unwrap_used, clippy::expect_used)]
#![cfg(unix)]

use std::os::unix::fs::symlink;

use cellparse::{BuildTarget, ParseError, ParserConfig, SymlinkPolicy};

use crate::helpers::build_files::{DiskRepo, relative_to};

const APP_BUCK: &str = r#"[
  { "name": "lib", "buck.type": "js_library", "srcs": ["index.js", "vendor/util.js"] },
  { "name": "plain", "buck.type": "js_library", "srcs": ["index.js"] }
]"#;

fn repo() -> DiskRepo {
    let repo = DiskRepo::new();
    repo.write("app/BUCK", APP_BUCK);
    repo.write("app/index.js", "");
    repo.write("third_party/util.js", "");
    symlink(repo.path("third_party"), repo.path("app/vendor")).unwrap();
    repo
}

#[test]
fn test_symlinked_input_recorded_once_per_file_and_path() {
    let repo = repo();
    let state = repo.session(ParserConfig::default().with_symlink_policy(SymlinkPolicy::Warn));
    let lib = BuildTarget::new(&repo.root, "app", "lib");

    for _ in 0..3 {
        state.target_node(&lib).unwrap();
    }
    state
        .all_target_nodes(&state.cells()[0], &repo.path("app/BUCK"))
        .unwrap();

    let records = state.symlink_records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.build_file, repo.path("app/BUCK"));
    assert_eq!(relative_to(&repo.root, &record.declared_path), std::path::Path::new("app/vendor/util.js"));
    assert_eq!(record.link_path, repo.path("app/vendor"));
    assert_eq!(record.real_path, repo.path("third_party/util.js"));
    state.close().unwrap();
}

#[test]
fn test_forbidden_symlink_fails_only_that_target() {
    let repo = repo();
    let state = repo.session(ParserConfig::default().with_symlink_policy(SymlinkPolicy::Forbid));

    let err = state
        .target_node(&BuildTarget::new(&repo.root, "app", "lib"))
        .unwrap_err();
    match &err {
        ParseError::InputUnderSymlink { target, path, .. } => {
            assert_eq!(target, "//app:lib");
            assert_eq!(path, &repo.path("app/vendor/util.js"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(state.target_node(&BuildTarget::new(&repo.root, "app", "plain")).is_ok());
    assert!(state.symlink_records().is_empty());
    state.close().unwrap();
}

#[test]
fn test_broken_symlink_surfaces_io_error() {
    let repo = DiskRepo::new();
    repo.write(
        "app/BUCK",
        r#"[{ "name": "lib", "buck.type": "js_library", "srcs": ["gone/a.js"] }]"#,
    );
    symlink(repo.path("nowhere"), repo.path("app/gone")).unwrap();
    let state = repo.session(ParserConfig::default().with_symlink_policy(SymlinkPolicy::Allow));

    let err = state
        .target_node(&BuildTarget::new(&repo.root, "app", "lib"))
        .unwrap_err();
    assert!(err.is_io());
    state.close().unwrap();
}

#[test]
fn test_json_parser_reports_syntax_line() {
    let repo = DiskRepo::new();
    repo.write("app/BUCK", "[\n  { \"name\": \"lib\" },\n  oops\n]");
    let state = repo.session(ParserConfig::default());

    let err = state
        .all_raw_nodes(&state.cells()[0], &repo.path("app/BUCK"))
        .unwrap_err();
    match err {
        ParseError::ParseFailure { line, .. } => assert_eq!(line, Some(3)),
        other => panic!("unexpected error {other:?}"),
    }
    state.close().unwrap();
}

#[test]
fn test_processed_bytes_follow_file_size() {
    let repo = repo();
    let state = repo.session(ParserConfig::default());
    state
        .all_raw_nodes(&state.cells()[0], &repo.path("app/BUCK"))
        .unwrap();
    assert_eq!(state.parse_processed_bytes(), APP_BUCK.len() as u64);
    state.close().unwrap();
}

#[test]
fn test_missing_build_file_on_disk_is_parse_failure() {
    let repo = DiskRepo::new();
    let state = repo.session(ParserConfig::default().with_threads(1));
    for _ in 0..3 {
        let err = state
            .target_node(&BuildTarget::new(&repo.root, "nope", "x"))
            .unwrap_err();
        assert!(matches!(err, ParseError::ParseFailure { .. }));
        assert_eq!(err.path(), Some(repo.path("nope/BUCK").as_path()));
    }
    state.close().unwrap();
}
