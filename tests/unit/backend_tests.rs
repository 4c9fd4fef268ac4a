use chrono::Utc;
use tokio::sync::mpsc;

use doc_supervisor::cancel::CancelFlag;
use doc_supervisor::channel::Message;
use doc_supervisor::messaging::{Backend, ExecutorBackend, Outcome};
use doc_supervisor::models::{DocumentState, PluginResult, PluginState, ResultStatus};

fn document() -> DocumentState {
    let plugins = ["p1", "p2"]
        .into_iter()
        .map(|id| PluginState {
            id: id.to_owned(),
            name: "aws:runShellScript".to_owned(),
            parameters: serde_json::Value::Null,
            result: None,
        })
        .collect();
    DocumentState::new("doc-b", plugins)
}

fn result(id: &str, status: ResultStatus) -> Message {
    Message::PluginResult {
        result: PluginResult {
            plugin_id: id.to_owned(),
            plugin_name: "aws:runShellScript".to_owned(),
            status,
            code: 0,
            output: String::new(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
        },
    }
}

#[test]
fn quiet_until_cancel_is_requested() {
    let (tx, _rx) = mpsc::channel(3);
    let mut doc = document();

    let mut backend = ExecutorBackend::new(&tx, &mut doc, CancelFlag::new());
    assert!(backend.poll_outbound().is_none());
    assert!(backend.outcome().is_none());
}

#[test]
fn plugin_results_are_streamed_once() {
    let (tx, mut rx) = mpsc::channel(3);
    let mut doc = document();
    let mut backend = ExecutorBackend::new(&tx, &mut doc, CancelFlag::new());

    backend.accept(result("p1", ResultStatus::Success)).unwrap();
    backend.accept(result("p1", ResultStatus::Failed)).unwrap();
    backend.accept(result("unknown", ResultStatus::Success)).unwrap();
    assert_eq!(backend.document().status, ResultStatus::InProgress);
    drop(backend);

    let first = rx.try_recv().unwrap();
    assert_eq!(first.last_plugin.as_deref(), Some("p1"));
    assert!(rx.try_recv().is_err());
    assert_eq!(
        doc.plugins[0].result.as_ref().map(|r| r.status),
        Some(ResultStatus::Success),
        "first report wins"
    );
}

#[test]
fn complete_emits_exactly_one_summary() {
    let (tx, mut rx) = mpsc::channel(3);
    let mut doc = document();
    let mut backend = ExecutorBackend::new(&tx, &mut doc, CancelFlag::new());

    backend
        .accept(Message::Complete {
            status: ResultStatus::Success,
        })
        .unwrap();
    assert_eq!(backend.outcome(), Some(Outcome::Completed));
    backend.finish();
    backend.finish();
    drop(backend);

    let summary = rx.try_recv().unwrap();
    assert!(summary.is_summary());
    assert_eq!(summary.status, ResultStatus::Success);
    assert!(rx.try_recv().is_err());
}

#[test]
fn non_terminal_complete_is_a_protocol_error() {
    let (tx, _rx) = mpsc::channel(3);
    let mut doc = document();
    let mut backend = ExecutorBackend::new(&tx, &mut doc, CancelFlag::new());

    let err = backend
        .accept(Message::Complete {
            status: ResultStatus::InProgress,
        })
        .unwrap_err();
    assert!(err.to_string().starts_with("protocol:"));
    assert!(backend.outcome().is_none());
}

#[test]
fn master_messages_from_worker_are_rejected() {
    let (tx, _rx) = mpsc::channel(3);
    let mut doc = document();
    let mut backend = ExecutorBackend::new(&tx, &mut doc, CancelFlag::new());

    assert!(backend.accept(Message::Cancel).is_err());
}

#[test]
fn cancel_request_becomes_one_cancel_message() {
    let (tx, _rx) = mpsc::channel(3);
    let mut doc = document();
    let cancel = CancelFlag::new();
    let mut backend = ExecutorBackend::new(&tx, &mut doc, cancel.clone());

    assert!(backend.poll_outbound().is_none());
    cancel.request_cancel();
    assert_eq!(backend.poll_outbound(), Some(Message::Cancel));
    assert!(backend.poll_outbound().is_none());
    assert!(backend.outcome().is_none(), "still waiting for the worker");
}

#[test]
fn abnormal_end_fails_and_summarises() {
    let (tx, mut rx) = mpsc::channel(3);
    let mut doc = document();
    doc.status = ResultStatus::InProgress;
    let mut backend = ExecutorBackend::new(&tx, &mut doc, CancelFlag::new());

    backend.fail_if_in_progress();
    backend.finish();
    drop(backend);

    let summary = rx.try_recv().unwrap();
    assert_eq!(summary.status, ResultStatus::Failed);
    assert_eq!(doc.status, ResultStatus::Failed);
}

#[test]
fn shutdown_detaches_without_summary() {
    let (tx, mut rx) = mpsc::channel(3);
    let mut doc = document();
    let cancel = CancelFlag::new();
    cancel.request_shutdown();
    let mut backend = ExecutorBackend::new(&tx, &mut doc, cancel);

    assert!(backend.poll_outbound().is_none(), "worker is not messaged");
    assert_eq!(backend.outcome(), Some(Outcome::Detached));
    backend.finish();
    drop(backend);

    assert!(rx.try_recv().is_err());
}
