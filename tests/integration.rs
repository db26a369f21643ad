//! Integration tests for umb-ingest.
//!
//! These tests run a real listener on an ephemeral port and talk to it the
//! way a station does.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use umb_ingest::protocol::{crc, ReadingValue, StationIdentity, TIMESTAMP_FIELD};
use umb_ingest::session::DEFAULT_ACK_PAYLOAD;
use umb_ingest::sink::{spawn_store_task, JsonLinesStore};
use umb_ingest::{
    ChannelSink, FieldCatalog, IngestContext, IngestListener, ProtocolRegistry, SessionConfig,
    StationBatch,
};

/// Frame captured from a road-weather station (device 9, seven channels).
const CAPTURED_FRAME: [u8; 61] = [
    0x01, 0x10, 0x01, 0xf0, 0x01, 0x90, 0x31, 0x02, 0x2f, 0x11, 0x00, 0x07, 0x08, 0x00, 0x65,
    0x00, 0x16, 0x53, 0x06, 0x05, 0x42, 0x03, 0x55, 0x97, 0x00, 0x08, 0x00, 0x59, 0x02, 0x16,
    0x00, 0x00, 0x00, 0x00, 0x03, 0x55, 0x21, 0x03, 0x03, 0x55, 0x2a, 0x03, 0x08, 0x00, 0x34,
    0x03, 0x16, 0x85, 0xeb, 0x51, 0x3f, 0x05, 0x00, 0x84, 0x03, 0x10, 0x0a, 0x03, 0x4d, 0xcd,
    0x04,
];

const TIMEOUT: Duration = Duration::from_secs(5);

/// Start a server with the built-in catalog; returns its address and the
/// storage receiver.
async fn start_server() -> (std::net::SocketAddr, mpsc::Receiver<StationBatch>) {
    let catalog = Arc::new(FieldCatalog::builtin().unwrap());
    let (sink, rx) = ChannelSink::channel(16);
    let ctx = Arc::new(IngestContext::new(
        SessionConfig::default(),
        ProtocolRegistry::with_defaults(catalog),
        Arc::new(sink),
    ));

    let listener = IngestListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr();
    tokio::spawn(listener.serve(ctx));

    (addr, rx)
}

/// Connect and send a registration padded to the full packet size.
async fn connect(addr: std::net::SocketAddr, registration: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut packet = registration.as_bytes().to_vec();
    packet.resize(128, b' ');
    stream.write_all(&packet).await.unwrap();
    stream
}

async fn read_ack(stream: &mut TcpStream) {
    let mut ack = vec![0u8; DEFAULT_ACK_PAYLOAD.len()];
    tokio::time::timeout(TIMEOUT, stream.read_exact(&mut ack))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack, DEFAULT_ACK_PAYLOAD);
}

/// Test a captured UMB frame travelling from socket to storage.
#[tokio::test]
async fn test_umb_frame_end_to_end() {
    let (addr, mut rx) = start_server().await;
    let mut stream = connect(addr, "AABB001UMB").await;

    stream.write_all(&CAPTURED_FRAME).await.unwrap();
    read_ack(&mut stream).await;

    let batch = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(batch.station, StationIdentity::new("AA", "BB", "001"));
    assert_eq!(batch.protocol.as_str(), "UMB");
    assert_eq!(batch.device_id, 9);

    let fields: Vec<&str> = batch.readings.iter().map(|r| r.field.as_str()).collect();
    assert_eq!(
        fields,
        vec![
            TIMESTAMP_FIELD,
            "RoadSurfaceTemperature",
            "FreezingTemperature",
            "WaterFilmHeight",
            "SaltConcentration",
            "IceLayerThickness",
            "IcePercentage",
            "RoadCondition",
        ]
    );

    assert!(matches!(batch.readings[0].value, ReadingValue::Timestamp(_)));
    assert_eq!(batch.readings[1].value.as_f64(), Some(33.26));
    assert_eq!(batch.readings[2].value, ReadingValue::ErrorCode(0x55));
    assert_eq!(batch.readings[3].value.as_f64(), Some(0.0));
    assert_eq!(batch.readings[6].value.as_f64(), Some(0.82));
    assert_eq!(batch.readings[7].value.to_string(), "Unknown");
}

/// Test that a corrupted frame is dropped without closing the connection.
#[tokio::test]
async fn test_tampered_frame_then_valid_frame() {
    let (addr, mut rx) = start_server().await;
    let mut stream = connect(addr, "AABB002UMB").await;

    let mut tampered = CAPTURED_FRAME;
    tampered[20] ^= 0x01;
    assert!(!crc::validate(&tampered));
    stream.write_all(&tampered).await.unwrap();

    // Give the server time to consume the bad frame on its own.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    stream.write_all(&CAPTURED_FRAME).await.unwrap();
    read_ack(&mut stream).await;

    let batch = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(batch.station.station_number, "002");
    assert_eq!(batch.readings[1].value.as_f64(), Some(33.26));
}

/// Test a JSON station sharing the server with the UMB decoder.
#[tokio::test]
async fn test_json_frame_end_to_end() {
    let (addr, mut rx) = start_server().await;
    let mut stream = connect(addr, "CCDD010json").await;

    stream
        .write_all(
            br#"{"device_id": 7, "readings": [
                {"channel": 100, "value": 4.567},
                {"field": "Visibility", "value": 1200},
                {"channel": 200, "error": 85}
            ]}"#,
        )
        .await
        .unwrap();
    read_ack(&mut stream).await;

    let batch = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(batch.protocol.as_str(), "JSON");
    assert_eq!(batch.device_id, 7);
    assert_eq!(batch.readings[1].field, "AirTemperature");
    assert_eq!(batch.readings[1].value.as_f64(), Some(4.57));
    assert_eq!(batch.readings[2].field, "Visibility");
    assert_eq!(batch.readings[3].field, "RelativeHumidity");
    assert_eq!(batch.readings[3].value, ReadingValue::ErrorCode(85));
}

/// Test that an unknown protocol is rejected and the connection closed.
#[tokio::test]
async fn test_unknown_protocol_closes_connection() {
    let (addr, mut rx) = start_server().await;
    let mut stream = connect(addr, "AABB001MODBUS").await;

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(TIMEOUT, stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(rx.try_recv().is_err());
}

/// Test several stations connected at the same time.
#[tokio::test]
async fn test_concurrent_stations() {
    let (addr, mut rx) = start_server().await;

    let mut clients = Vec::new();
    for number in 1..=3 {
        clients.push(tokio::spawn(async move {
            let mut stream = connect(addr, &format!("AABB{:03}UMB", number)).await;
            stream.write_all(&CAPTURED_FRAME).await.unwrap();
            read_ack(&mut stream).await;
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let batch = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        numbers.push(batch.station.station_number);
    }
    numbers.sort();
    assert_eq!(numbers, vec!["001", "002", "003"]);
}

/// Test the JSON lines store receiving batches from the channel.
#[tokio::test]
async fn test_json_lines_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("readings.jsonl");

    let (sink, rx) = ChannelSink::channel(4);
    let store = JsonLinesStore::open(&path).await.unwrap();
    let handle = spawn_store_task(rx, store);

    let catalog = FieldCatalog::builtin().unwrap();
    let decoded = umb_ingest::protocol::decode_umb(&CAPTURED_FRAME, &catalog).unwrap();
    umb_ingest::ReadingSink::store(
        &sink,
        StationBatch {
            station: StationIdentity::new("AA", "BB", "001"),
            peer: "127.0.0.1:50000".to_string(),
            protocol: umb_ingest::protocol::ProtocolTag::new("UMB").unwrap(),
            device_id: decoded.device_id,
            readings: decoded.readings,
        },
    );
    drop(sink);
    handle.join().await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);

    let doc: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(doc["device_id"], 9);
    assert_eq!(doc["readings"][1]["field"], "RoadSurfaceTemperature");
    assert_eq!(doc["readings"][1]["value"], 33.26);
    assert_eq!(doc["readings"][2]["value"], "errorcode85");
}
