//! In-process executor behaviour.

use doc_supervisor::cancel::CancelFlag;
use doc_supervisor::inproc::InProcExecutor;
use doc_supervisor::models::ResultStatus;
use doc_supervisor::orchestrator::Executor;

use super::test_helpers::{collect, document, plugin_result, summaries, FixedRunner, MemoryStore};

const DOC: &str = "doc-inproc";

#[tokio::test]
async fn runs_all_plugins_and_summarises() {
    let runner = FixedRunner::succeeding();
    let store = MemoryStore::new(document(DOC, &["p1", "p2"]));

    let results = collect(InProcExecutor::new(runner.clone()).run(CancelFlag::new(), store.clone())).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].last_plugin.as_deref(), Some("p1"));
    assert_eq!(results[1].last_plugin.as_deref(), Some("p2"));
    assert_eq!(results[2].status, ResultStatus::Success);
    assert_eq!(runner.runs(), 2);
    assert_eq!(store.saved().status, ResultStatus::Success);
}

#[tokio::test]
async fn failing_plugin_fails_document() {
    let store = MemoryStore::new(document(DOC, &["p1", "p2"]));

    let results = collect(
        InProcExecutor::new(FixedRunner::failing("p1")).run(CancelFlag::new(), store.clone()),
    )
    .await;

    assert_eq!(summaries(&results)[0].status, ResultStatus::Failed);
    assert_eq!(store.saved().status, ResultStatus::Failed);
}

#[tokio::test]
async fn completed_plugins_are_skipped() {
    let runner = FixedRunner::succeeding();
    let mut doc = document(DOC, &["p1", "p2"]);
    doc.plugins[0].result = Some(plugin_result("p1", ResultStatus::Success));
    let store = MemoryStore::new(doc);

    let results = collect(InProcExecutor::new(runner.clone()).run(CancelFlag::new(), store.clone())).await;

    assert_eq!(runner.runs(), 1);
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].plugin_results.len(), 2);
}

#[tokio::test]
async fn cancel_stops_before_next_plugin() {
    let runner = FixedRunner::succeeding();
    let store = MemoryStore::new(document(DOC, &["p1", "p2"]));
    let cancel = CancelFlag::new();
    cancel.request_cancel();

    let results = collect(InProcExecutor::new(runner.clone()).run(cancel, store.clone())).await;

    assert_eq!(runner.runs(), 0);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Cancelled);
    assert_eq!(store.saved().status, ResultStatus::Cancelled);
}

#[tokio::test]
async fn shutdown_leaves_document_in_progress() {
    let runner = FixedRunner::succeeding();
    let store = MemoryStore::new(document(DOC, &["p1"]));
    let cancel = CancelFlag::new();
    cancel.request_shutdown();

    let results = collect(InProcExecutor::new(runner.clone()).run(cancel, store.clone())).await;

    assert!(results.is_empty());
    assert_eq!(runner.runs(), 0);
    assert_eq!(store.saved().status, ResultStatus::InProgress);
}

#[tokio::test]
async fn finished_document_only_reports_summary() {
    let runner = FixedRunner::succeeding();
    let mut doc = document(DOC, &["p1"]);
    doc.status = ResultStatus::Failed;
    let store = MemoryStore::new(doc);

    let results = collect(InProcExecutor::new(runner.clone()).run(CancelFlag::new(), store.clone())).await;

    assert_eq!(runner.runs(), 0);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Failed);
}
