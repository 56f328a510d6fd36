use pulse_sync::transport::mock::MockConnector;
use pulse_sync::{Connector, SyncError};

// ── MockConnector ────────────────────────────────────────────────

#[tokio::test]
async fn connect_records_attempts() {
    let connector = MockConnector::new();
    let _link = connector.connect("ws://a.test").await.unwrap();

    assert_eq!(connector.attempts(), 1);
    assert_eq!(connector.connections(), 1);
    assert_eq!(connector.endpoints(), vec!["ws://a.test"]);
}

#[tokio::test]
async fn refusals_are_consumed_in_order() {
    let connector = MockConnector::new();
    connector.refuse_next("first");
    connector.refuse_next("second");

    let err = connector.connect("ws://a.test").await.err().unwrap();
    assert!(matches!(err, SyncError::ConnectionRefused(ref r) if r == "first"));
    let err = connector.connect("ws://a.test").await.err().unwrap();
    assert!(matches!(err, SyncError::ConnectionRefused(ref r) if r == "second"));
    assert!(connector.connect("ws://a.test").await.is_ok());

    assert_eq!(connector.attempts(), 3);
    assert_eq!(connector.connections(), 1);
}

// ── Link ─────────────────────────────────────────────────────────

#[tokio::test]
async fn frames_flow_both_ways() {
    let connector = MockConnector::new();
    let mut link = connector.connect("ws://a.test").await.unwrap();
    let remote = connector.last_remote().unwrap();

    link.sink.send("+ex:1=0,-ex:2".into()).await.unwrap();
    assert_eq!(remote.sent_frames(), vec!["+ex:1=0,-ex:2"]);
    assert_eq!(remote.sent_fragments(), vec!["+ex:1=0", "-ex:2"]);

    remote.push("ex:1=3");
    assert_eq!(link.stream.next_frame().await.unwrap().unwrap(), "ex:1=3");
}

#[tokio::test]
async fn remote_close_ends_stream() {
    let connector = MockConnector::new();
    let mut link = connector.connect("ws://a.test").await.unwrap();
    let remote = connector.last_remote().unwrap();

    remote.close();
    assert!(!remote.is_open());
    assert!(link.stream.next_frame().await.is_none());
    assert!(matches!(
        link.sink.send("-ex:1".into()).await,
        Err(SyncError::ChannelClosed)
    ));
}

#[tokio::test]
async fn remote_failure_is_reported_then_closed() {
    let connector = MockConnector::new();
    let mut link = connector.connect("ws://a.test").await.unwrap();
    connector.last_remote().unwrap().fail("reset");

    assert!(matches!(
        link.stream.next_frame().await,
        Some(Err(SyncError::Network(_)))
    ));
    assert!(link.stream.next_frame().await.is_none());
}

#[tokio::test]
async fn client_close_is_visible_to_remote() {
    let connector = MockConnector::new();
    let mut link = connector.connect("ws://a.test").await.unwrap();
    let remote = connector.last_remote().unwrap();

    link.sink.close().await.unwrap();
    assert!(remote.closed_by_client());
    assert!(!remote.is_open());
}
