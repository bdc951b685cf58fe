//! Integration tests for starting the bridge when the broker is down
//!
//! An unreachable broker must end the service with an error rather than
//! silently dropping frames.


use std::sync::Arc;
use std::time::Duration;
use tcp2mqtt::config::{BrokerSection, SessionMode};
use tcp2mqtt::transport::mqtt::MqttError;
use tcp2mqtt::{serve, BridgeError, Listener, MqttPublisher};
use test_helpers::{closed_port, test_config};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

fn unreachable_broker() -> BrokerSection {
    BrokerSection {
        url: format!("tcp://127.0.0.1:{}", closed_port()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_first_frame_with_broker_down_stops_listener() {
    let mut config = test_config(true);
    config.broker = unreachable_broker();
    let publisher = Arc::new(MqttPublisher::from_config(config.broker.clone()).await.unwrap());

    let listener = Listener::bind(Arc::new(config)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(listener.run(publisher, Arc::new(tcp2mqtt::JsonEncoder)));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello\n").await.unwrap();

    let result = timeout(Duration::from_secs(10), server)
        .await
        .expect("listener should stop within the connect timeout")
        .unwrap();

    let error = result.unwrap_err();
    assert!(matches!(error, BridgeError::Broker(_)));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn test_serve_fails_when_port_is_taken() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config(true);
    config.listen.port = blocker.local_addr().unwrap().port();
    let publisher = Arc::new(MqttPublisher::per_publish(unreachable_broker()).unwrap());

    let result = serve(Arc::new(config), publisher).await;
    assert!(matches!(result, Err(BridgeError::Bind { .. })));
}

#[tokio::test]
async fn test_shared_session_fails_at_startup() {
    let broker = BrokerSection {
        session: SessionMode::Shared,
        connect_timeout_secs: 1,
        ..unreachable_broker()
    };

    let result = MqttPublisher::from_config(broker).await;
    assert!(matches!(
        result,
        Err(MqttError::ConnectionFailed(_)) | Err(MqttError::ConnectTimeout(_))
    ));
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_publish_against_local_broker() {
    use tcp2mqtt::Publisher;

    let publisher = MqttPublisher::per_publish(BrokerSection::default()).unwrap();
    publisher
        .publish(
            "tcp2mqtt/integration",
            br#"{"body":"hi","ipFrom":"127.0.0.1","port":"1"}"#.to_vec().into(),
        )
        .await
        .expect("publish to local broker");
}
