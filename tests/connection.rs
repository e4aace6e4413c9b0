//! Connection behaviour against a mocked byte source

use async_trait::async_trait;
use bytes::Bytes;
use gnsslink_core::core::protocol::asv::{AsvMessage, AsvParser, AsvPayload, Heartbeat};
use gnsslink_core::core::protocol::comnav::{BestPos, ComNavAsciiMessage, ComNavAsciiPayload};
use gnsslink_core::core::protocol::nmea::NmeaParser;
use gnsslink_core::core::protocol::ubx::{UbxId, UbxMessage, UbxParser};
use gnsslink_core::{
    ByteCounters, ByteSource, Connection, ConnectionError, GnssMessage, TransportError,
};
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

mock! {
    pub Source {}

    #[async_trait]
    impl ByteSource for Source {
        fn name(&self) -> String;
        fn subscribe(&self) -> broadcast::Receiver<Bytes>;
        async fn write(&self, data: Bytes) -> Result<usize, TransportError>;
        async fn close(&self);
    }
}

fn mock_source(tx: &broadcast::Sender<Bytes>) -> MockSource {
    let tx = tx.clone();
    let mut source = MockSource::new();
    source.expect_name().return_const("mock:rx".to_string());
    source.expect_subscribe().returning(move || tx.subscribe());
    source
}

#[tokio::test]
async fn send_writes_encoded_frame() {
    let (tx, _) = broadcast::channel(16);
    let mut source = mock_source(&tx);
    source
        .expect_write()
        .withf(|data: &Bytes| data.starts_with(&[0xB5, 0x62, 0x0A, 0x04]))
        .times(1)
        .returning(|data| Ok(data.len()));

    let connection = Connection::open(Arc::new(source), vec![Box::new(UbxParser::new())]).unwrap();
    let mut sent = connection.subscribe_sent();

    let poll = GnssMessage::from(UbxMessage::poll(UbxId::MON_VER));
    let written = connection.send(&poll).await.unwrap();

    assert_eq!(written, 8);
    assert_eq!(sent.try_recv().unwrap().message_id(), poll.message_id());
    assert_eq!(
        connection.counters(),
        ByteCounters {
            rx_bytes: 0,
            tx_bytes: 8,
            tx_messages: 1,
        }
    );
}

#[tokio::test]
async fn write_failure_leaves_counters_untouched() {
    let (tx, _) = broadcast::channel(16);
    let mut source = mock_source(&tx);
    source
        .expect_write()
        .times(1)
        .returning(|_| Err(TransportError::Disconnected));

    let connection = Connection::open(Arc::new(source), vec![Box::new(AsvParser::new())]).unwrap();
    let heartbeat = GnssMessage::from(AsvMessage::new(AsvPayload::Heartbeat(Heartbeat)));

    let err = connection.send(&heartbeat).await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Transport(TransportError::Disconnected)
    ));
    assert_eq!(connection.counters(), ByteCounters::default());
}

#[tokio::test]
async fn receive_only_message_is_never_written() {
    let (tx, _) = broadcast::channel(16);
    let mut source = mock_source(&tx);
    source.expect_write().never();

    let connection = Connection::open(Arc::new(source), Vec::new()).unwrap();
    let log = GnssMessage::from(ComNavAsciiMessage::new(ComNavAsciiPayload::BestPos(
        BestPos::default(),
    )));

    let err = connection.send(&log).await.unwrap_err();
    assert!(matches!(err, ConnectionError::Codec { .. }));
}

#[tokio::test]
async fn close_is_idempotent() {
    let (tx, _) = broadcast::channel(16);
    let mut source = mock_source(&tx);
    source.expect_close().times(1).returning(|| ());

    let connection = Connection::open(Arc::new(source), vec![Box::new(NmeaParser::new())]).unwrap();
    connection.close().await;
    connection.close().await;

    assert!(connection.is_closed());
    assert!(matches!(
        connection.send_raw(Bytes::from_static(b"$")).await,
        Err(ConnectionError::Closed)
    ));
}

#[tokio::test]
async fn received_chunks_are_decoded_and_counted() {
    let (tx, _) = broadcast::channel(16);
    let source = mock_source(&tx);
    let connection = Connection::open(Arc::new(source), vec![Box::new(NmeaParser::new())]).unwrap();
    let mut messages = connection.subscribe_messages();
    let mut counters = connection.watch_counters();

    let sentence = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
    let (head, tail) = sentence.split_at(20);
    tx.send(Bytes::from_static(head)).unwrap();
    tx.send(Bytes::from_static(tail)).unwrap();

    let message = tokio::time::timeout(Duration::from_secs(1), messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.name(), "GGA");

    tokio::time::timeout(Duration::from_secs(1), async {
        while counters.borrow_and_update().rx_bytes < sentence.len() as u64 {
            counters.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}
