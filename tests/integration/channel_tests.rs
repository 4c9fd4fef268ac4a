//! File channel rendezvous, ordering, durability and close semantics.

use std::time::Duration;

use doc_supervisor::channel::{channel_dir, ChannelFactory, FileChannelFactory, Message, Role};
use doc_supervisor::models::ResultStatus;

use super::test_helpers::{abandoned_channel, document, plugin_result, receive};

const DOC: &str = "doc-channel";

#[tokio::test]
async fn second_open_reports_existing_channel() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());

    let first = factory.open(Role::Master, DOC).unwrap();
    assert!(!first.existed);

    let second = FileChannelFactory::new(root.path())
        .open(Role::Worker, DOC)
        .unwrap();
    assert!(second.existed);

    let dir = channel_dir(root.path(), DOC);
    assert_eq!(std::fs::read_to_string(dir.join("document_id")).unwrap(), DOC);
}

#[tokio::test]
async fn messages_flow_both_ways_in_order() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    let mut master = factory.open(Role::Master, DOC).unwrap().channel;
    let mut worker = factory.open(Role::Worker, DOC).unwrap().channel;

    master
        .send(&Message::Start {
            document: document(DOC, &["p1"]),
        })
        .unwrap();
    master.send(&Message::Cancel).unwrap();

    assert!(matches!(receive(worker.as_mut()).await, Message::Start { .. }));
    assert_eq!(receive(worker.as_mut()).await, Message::Cancel);

    for id in ["p1", "p2", "p3"] {
        worker
            .send(&Message::PluginResult {
                result: plugin_result(id, ResultStatus::Success),
            })
            .unwrap();
    }
    for id in ["p1", "p2", "p3"] {
        let Message::PluginResult { result } = receive(master.as_mut()).await else {
            panic!("expected plugin result");
        };
        assert_eq!(result.plugin_id, id);
    }
}

#[tokio::test]
async fn pending_receive_wakes_on_send() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    let mut master = factory.open(Role::Master, DOC).unwrap().channel;
    let mut worker = factory.open(Role::Worker, DOC).unwrap().channel;

    let waiter = tokio::spawn(async move { receive(worker.as_mut()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    master.send(&Message::Cancel).unwrap();

    assert_eq!(waiter.await.unwrap(), Message::Cancel);
}

#[tokio::test]
async fn messages_survive_reopen() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    abandoned_channel(root.path(), DOC);

    let mut worker = factory.open(Role::Worker, DOC).unwrap().channel;
    worker
        .send(&Message::Complete {
            status: ResultStatus::Success,
        })
        .unwrap();
    drop(worker);

    // A restarted supervisor finds what the worker wrote while it was away.
    let opened = factory.open(Role::Master, DOC).unwrap();
    assert!(opened.existed);
    let mut master = opened.channel;
    assert_eq!(
        receive(master.as_mut()).await,
        Message::Complete {
            status: ResultStatus::Success
        }
    );
}

#[tokio::test]
async fn sequence_continues_after_sender_restart() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    abandoned_channel(root.path(), DOC);

    let mut first = factory.open(Role::Worker, DOC).unwrap().channel;
    first
        .send(&Message::PluginResult {
            result: plugin_result("p1", ResultStatus::Success),
        })
        .unwrap();
    drop(first);

    let mut second = factory.open(Role::Worker, DOC).unwrap().channel;
    second
        .send(&Message::PluginResult {
            result: plugin_result("p2", ResultStatus::Success),
        })
        .unwrap();

    let mut master = factory.open(Role::Master, DOC).unwrap().channel;
    for id in ["p1", "p2"] {
        let Message::PluginResult { result } = receive(master.as_mut()).await else {
            panic!("expected plugin result");
        };
        assert_eq!(result.plugin_id, id);
    }
}

#[tokio::test]
async fn master_close_destroys_channel_and_fails_worker_receive() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    let mut master = factory.open(Role::Master, DOC).unwrap().channel;
    let mut worker = factory.open(Role::Worker, DOC).unwrap().channel;

    master.close().unwrap();
    master.close().unwrap();
    assert!(!channel_dir(root.path(), DOC).exists());

    let err = tokio::time::timeout(Duration::from_secs(5), worker.receive())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().starts_with("ipc:"));

    // Worker close after the master is gone is not an error.
    worker.close().unwrap();
    assert!(!channel_dir(root.path(), DOC).exists());

    let reopened = factory.open(Role::Master, DOC).unwrap();
    assert!(!reopened.existed, "destroyed channel reopens fresh");
}

#[tokio::test]
async fn worker_close_is_seen_after_draining() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    let mut master = factory.open(Role::Master, DOC).unwrap().channel;
    let mut worker = factory.open(Role::Worker, DOC).unwrap().channel;

    worker
        .send(&Message::Complete {
            status: ResultStatus::Failed,
        })
        .unwrap();
    worker.close().unwrap();
    worker.close().unwrap();

    assert!(matches!(
        receive(master.as_mut()).await,
        Message::Complete { .. }
    ));
    let err = tokio::time::timeout(Duration::from_secs(5), master.receive())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("peer closed"));
}

#[tokio::test]
async fn role_may_not_send_peer_messages() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    let mut master = factory.open(Role::Master, DOC).unwrap().channel;

    let err = master
        .send(&Message::Complete {
            status: ResultStatus::Success,
        })
        .unwrap_err();
    assert!(err.to_string().starts_with("protocol:"));
}

#[tokio::test]
async fn closed_channel_rejects_send() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    abandoned_channel(root.path(), DOC);
    let mut worker = factory.open(Role::Worker, DOC).unwrap().channel;
    worker.close().unwrap();

    let err = worker
        .send(&Message::Complete {
            status: ResultStatus::Success,
        })
        .unwrap_err();
    assert!(err.to_string().starts_with("ipc:"));
}

#[tokio::test]
async fn undecodable_message_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());
    let mut master = factory.open(Role::Master, DOC).unwrap().channel;

    let inbox = channel_dir(root.path(), DOC).join("to_master");
    std::fs::write(
        inbox.join("00000000000000000001.msg"),
        br#"{"version":2,"id":"00000000-0000-0000-0000-000000000000","payload":{"type":"cancel"}}"#,
    )
    .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), master.receive())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().starts_with("codec:"));
}

#[test]
fn empty_document_id_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let err = FileChannelFactory::new(root.path())
        .open(Role::Master, "  ")
        .unwrap_err();
    assert!(err.to_string().starts_with("ipc:"));
}

#[test]
fn worker_cannot_create_a_channel() {
    let root = tempfile::tempdir().unwrap();
    let factory = FileChannelFactory::new(root.path());

    let err = factory.open(Role::Worker, DOC).unwrap_err();
    assert!(err.to_string().contains("no channel prepared"));
    assert!(!channel_dir(root.path(), DOC).exists());

    let master = factory.open(Role::Master, DOC).unwrap();
    assert!(!master.existed, "a failed worker open leaves nothing behind");
}

#[test]
fn channel_dir_is_hex_sha256_of_document_id() {
    let dir = channel_dir(std::path::Path::new("/srv/channels"), "abc");
    assert_eq!(
        dir,
        std::path::Path::new(
            "/srv/channels/ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        )
    );
}
