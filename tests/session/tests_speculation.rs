#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use cellparse::events::{EventSink, ParseEvent};
use cellparse::{BuildTarget, ParserConfig, PerBuildState, SpeculativeParsing};
use parking_lot::Mutex;

use crate::helpers::build_files::{repo_with_plugins, rule};
use crate::helpers::parsers::ScriptedParsers;

#[derive(Default)]
struct CreatedTargets(Mutex<Vec<String>>);

impl EventSink for CreatedTargets {
    fn post(&self, event: &ParseEvent) {
        if let ParseEvent::TargetNodeCreated { target } = event {
            self.0.lock().push(target.to_string());
        }
    }
}

impl CreatedTargets {
    fn sorted(&self) -> Vec<String> {
        let mut targets = self.0.lock().clone();
        targets.sort();
        targets
    }
}

fn run(config: ParserConfig) -> Vec<String> {
    let parsers = ScriptedParsers::new();
    parsers.file(
        "/repo/ui/BUCK",
        vec![
            rule("button", "js_library"),
            rule("menu", "js_library"),
            rule("dialog", "js_library"),
        ],
    );
    let sink = Arc::new(CreatedTargets::default());
    let state = PerBuildState::builder(repo_with_plugins(config), parsers.factory())
        .events(sink.clone())
        .build()
        .unwrap();

    state
        .target_node(&BuildTarget::new("/repo", "ui", "menu"))
        .unwrap();
    // Give background work a chance to run before shutting down.
    std::thread::sleep(Duration::from_millis(100));
    state.close().unwrap();
    assert_eq!(parsers.parses("/repo/ui/BUCK"), 1);
    sink.sorted()
}

#[test]
fn test_speculation_marshals_siblings() {
    let created = run(ParserConfig::default()
        .with_parallel_parsing(true)
        .with_speculative_parsing(SpeculativeParsing::Enabled));
    assert_eq!(created, ["//ui:button", "//ui:dialog", "//ui:menu"]);
}

#[test]
fn test_no_speculation_by_default() {
    let created = run(ParserConfig::default());
    assert_eq!(created, ["//ui:menu"]);
}

#[test]
fn test_speculation_requires_parallel_parsing() {
    let created = run(ParserConfig::default()
        .with_parallel_parsing(false)
        .with_speculative_parsing(SpeculativeParsing::Enabled));
    assert_eq!(created, ["//ui:menu"]);
}
