//! Integration tests for the server over real sockets
//!
//! These tests talk to a spawned `RpcServer` with a plain framed connection,
//! so they exercise exactly what a client puts on the wire.

use bytes::BytesMut;
use relayrpc_common::filter::{Filter, FilterChain, FilterChains, FilterContext};
use relayrpc_common::transport::{
    split_framed, FrameCodec, FrameDecoder, FrameReader, FrameSink, IdleConfig,
};
use relayrpc_common::{
    Call, Frame, Message, MessageType, Param, Reply, Result, RpcError, MAGIC, STATUS_FAILURE,
    STATUS_OK, VERSION,
};
use relayrpc_server::{
    Dispatcher, RpcServer, ServerConfig, ServerHandle, ServiceDefinition, ServiceProvider,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct CountingFilter {
    calls: Arc<AtomicUsize>,
}

impl Filter for CountingFilter {
    fn name(&self) -> &str {
        "counting"
    }

    fn apply(&self, _ctx: &mut FilterContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn provider() -> Arc<ServiceProvider> {
    let provider = Arc::new(ServiceProvider::new());
    provider.add_service_provider(
        ServiceDefinition::new("Calculator")
            .method2("add", ["i64", "i64"], |a: i64, b: i64| Ok::<_, String>(a + b))
            .method1("sleep", "u64", |ms: u64| {
                std::thread::sleep(Duration::from_millis(ms));
                Ok::<_, String>(ms)
            }),
    );
    provider
}

async fn start(filters: FilterChains, read_idle: Option<Duration>) -> ServerHandle {
    let config = ServerConfig::new("127.0.0.1:0").with_read_idle(read_idle);
    RpcServer::bind(config, provider(), filters)
        .await
        .unwrap()
        .spawn()
}

async fn connect(handle: &ServerHandle) -> (FrameReader, FrameSink) {
    let stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let (reader, sink, _writer) =
        split_framed(stream, Arc::new(FrameCodec::new()), IdleConfig::default());
    (reader, sink)
}

async fn next(reader: &mut FrameReader) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), reader.next_frame())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .expect("connection closed")
}

fn reply_of(frame: Frame) -> Reply {
    match frame.message {
        Message::Response(reply) => reply,
        other => panic!("expected a response, got {:?}", other),
    }
}

fn add(a: i64, b: i64) -> Call {
    Call::new("Calculator", "add", vec![Param::from(a), Param::from(b)])
}

#[tokio::test]
async fn test_heartbeat_skips_filters_and_services() {
    let calls = Arc::new(AtomicUsize::new(0));
    let filters = FilterChains {
        server_before: FilterChain::new().with(CountingFilter { calls: calls.clone() }),
        ..Default::default()
    };
    let dispatcher = Dispatcher::new(Arc::new(ServiceProvider::new()), filters);

    let out = dispatcher.dispatch(Frame::heartbeat_request(2)).await;

    assert_eq!(out, Some(Frame::heartbeat_response(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_heartbeat_over_socket_yields_one_pong() {
    let calls = Arc::new(AtomicUsize::new(0));
    let filters = FilterChains {
        server_before: FilterChain::new().with(CountingFilter { calls: calls.clone() }),
        ..Default::default()
    };
    let handle = start(filters, None).await;
    let (mut reader, sink) = connect(&handle).await;

    sink.send(Frame::heartbeat_request(2)).await.unwrap();
    assert_eq!(next(&mut reader).await, Frame::heartbeat_response(2));

    // A call afterwards is the next frame, so no second PONG was queued
    sink.send(Frame::request(2, add(1, 1))).await.unwrap();
    let reply = reply_of(next(&mut reader).await);
    assert_eq!(reply.payload, Some(json!(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reply_uses_request_serializer() {
    let handle = start(FilterChains::new(), None).await;
    let (mut reader, sink) = connect(&handle).await;

    for code in [1u8, 2u8] {
        let call = add(20, 22);
        let id = call.request_id.clone();
        sink.send(Frame::request(code, call)).await.unwrap();

        let frame = next(&mut reader).await;
        assert_eq!(frame.serializer_code, code);
        let reply = reply_of(frame);
        assert_eq!(reply.request_id, id);
        assert_eq!(reply.status, STATUS_OK);
        assert_eq!(reply.payload, Some(json!(42)));
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_call_does_not_block_connection() {
    let handle = start(FilterChains::new(), None).await;
    let (mut reader, sink) = connect(&handle).await;

    let slow = Call::new("Calculator", "sleep", vec![Param::from(300u64)]);
    let slow_id = slow.request_id.clone();
    sink.send(Frame::request(2, slow)).await.unwrap();
    sink.send(Frame::request(2, add(1, 2))).await.unwrap();

    let first = reply_of(next(&mut reader).await);
    assert_eq!(first.payload, Some(json!(3)));
    let second = reply_of(next(&mut reader).await);
    assert_eq!(second.request_id, slow_id);

    handle.shutdown().await.unwrap();
}

/// Reads from a raw stream until `count` frames have been decoded.
async fn read_frames(stream: &mut TcpStream, count: usize) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new(Arc::new(FrameCodec::new()));
    let mut frames = Vec::new();
    while frames.len() < count {
        while let Some(frame) = decoder.decode().unwrap() {
            frames.push(frame);
        }
        if frames.len() >= count {
            break;
        }
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read_buf(decoder.buffer_mut()))
            .await
            .expect("timed out waiting for frames")
            .unwrap();
        assert!(n > 0, "server closed the connection");
    }
    frames
}

#[tokio::test]
async fn test_frames_split_and_batched() {
    let handle = start(FilterChains::new(), None).await;
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let codec = FrameCodec::new();

    // One frame delivered in two writes
    let bytes = codec.encode(&Frame::request(2, add(1, 2))).unwrap();
    let (head, tail) = bytes.split_at(5);
    stream.write_all(head).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(tail).await.unwrap();

    // Two frames delivered in one write
    let mut batch = BytesMut::new();
    codec.encode_into(&Frame::request(2, add(2, 2)), &mut batch).unwrap();
    codec.encode_into(&Frame::heartbeat_request(2), &mut batch).unwrap();
    stream.write_all(&batch).await.unwrap();

    let frames = read_frames(&mut stream, 3).await;

    let mut payloads: Vec<i64> = Vec::new();
    let mut pongs = 0;
    for frame in frames {
        match frame.message {
            Message::Response(reply) => {
                payloads.push(reply.payload.and_then(|v| v.as_i64()).unwrap());
            }
            Message::HeartbeatResponse => pongs += 1,
            other => panic!("unexpected frame {:?}", other),
        }
    }
    payloads.sort();
    assert_eq!(payloads, vec![3, 4]);
    assert_eq!(pongs, 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_body_is_skipped() {
    let handle = start(FilterChains::new(), None).await;
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();

    // Valid header, undecodable request body
    let body = [0xc1u8, 0xc1, 0xc1];
    let mut raw = BytesMut::new();
    raw.extend_from_slice(&MAGIC);
    raw.extend_from_slice(&[VERSION, 2, MessageType::Request as u8]);
    raw.extend_from_slice(&(body.len() as u32).to_be_bytes());
    raw.extend_from_slice(&body);
    FrameCodec::new()
        .encode_into(&Frame::request(2, add(3, 4)), &mut raw)
        .unwrap();
    stream.write_all(&raw).await.unwrap();

    let frames = read_frames(&mut stream, 1).await;
    let reply = reply_of(frames.into_iter().next().unwrap());
    assert_eq!(reply.payload, Some(json!(7)));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_protocol_violation_closes_connection() {
    let handle = start(FilterChains::new(), None).await;
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();

    stream.write_all(b"HTTP/1.1 GET /\r\n\r\n").await.unwrap();

    let mut buf = BytesMut::new();
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read_buf(&mut buf))
        .await
        .expect("server kept the connection open")
        .unwrap_or(0);
    assert_eq!(n, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_reply() {
    let handle = start(FilterChains::new(), None).await;
    let (mut reader, sink) = connect(&handle).await;

    sink.send(Frame::request(2, Call::new("Nope", "add", vec![])))
        .await
        .unwrap();
    let reply = reply_of(next(&mut reader).await);
    assert_eq!(reply.status, STATUS_FAILURE);
    assert_eq!(reply.message, RpcError::ServiceNotFound("Nope".to_string()).to_string());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_idle_closes_connection() {
    let handle = start(FilterChains::new(), Some(Duration::from_millis(100))).await;
    let (mut reader, _sink) = connect(&handle).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), reader.next_frame())
        .await
        .expect("server did not close the idle connection");
    assert!(matches!(closed, Ok(None)));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let handle = start(FilterChains::new(), None).await;
    let (mut reader, _sink) = connect(&handle).await;

    // Let the server register the connection
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.shutdown().await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), reader.next_frame())
        .await
        .expect("connection still open after shutdown");
    assert!(matches!(closed, Ok(None)));
}
