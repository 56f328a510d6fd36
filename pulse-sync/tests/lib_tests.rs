use pulse_sync::{ChannelConfig, Connector, Fragment, SyncError, WsConnector, DEFAULT_ENDPOINT};
use pulse_types::EntityId;

#[test]
fn default_endpoint_is_websocket() {
    assert!(DEFAULT_ENDPOINT.starts_with("ws://"));
    assert!(ChannelConfig::new(DEFAULT_ENDPOINT).validate().is_ok());
}

#[test]
fn fragment_reexported() {
    let fragment = Fragment::unsubscribe(EntityId::new("ex:1"));
    assert_eq!(fragment.to_string(), "-ex:1");
}

#[test]
fn error_display() {
    let err = SyncError::ConnectionRefused("timed out".into());
    assert!(err.to_string().contains("timed out"));
    assert!(!SyncError::ChannelClosed.to_string().is_empty());
}

#[test]
fn serde_error_converts() {
    let err: SyncError = serde_json::from_str::<ChannelConfig>("{").unwrap_err().into();
    assert!(matches!(err, SyncError::Serialization(_)));
}

#[tokio::test]
async fn ws_connect_to_closed_port_is_refused() {
    // A port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoint = format!("ws://127.0.0.1:{port}/ccus");
    let err = match WsConnector.connect(&endpoint).await {
        Ok(_) => panic!("connected to a closed port"),
        Err(e) => e,
    };
    assert!(matches!(err, SyncError::ConnectionRefused(_)));
    assert!(err.to_string().contains(&endpoint));
}
