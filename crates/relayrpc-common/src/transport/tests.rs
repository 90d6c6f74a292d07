//! Tests for framed TCP connections
//!
//! These tests run both ends of a connection over loopback and check
//! heartbeats, idle timeouts and shutdown behavior.

#[cfg(test)]
mod tests {
    use crate::protocol::{Call, Frame, Message, Reply, RpcError};
    use crate::transport::{connect, split_framed, FrameCodec, IdleConfig};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn pair() -> (tokio::net::TcpStream, tokio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, accepted) = tokio::join!(
            connect(&addr, Duration::from_secs(1)),
            listener.accept()
        );
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_frames_cross_the_wire() {
        let codec = Arc::new(FrameCodec::new());
        let (a, b) = pair().await;
        let (_ra, sink_a, _wa) = split_framed(a, codec.clone(), IdleConfig::default());
        let (mut rb, _sink_b, _wb) = split_framed(b, codec, IdleConfig::default());

        let call = Call::new("Echo", "echo", vec!["hello".into()]);
        sink_a.send(Frame::request(1, call.clone())).await.unwrap();
        sink_a
            .send(Frame::response(2, Reply::success("x", Some(json!(1)))))
            .await
            .unwrap();

        let first = rb.next_frame().await.unwrap().unwrap();
        assert_eq!(first.message, Message::Request(call));
        let second = rb.next_frame().await.unwrap().unwrap();
        assert_eq!(second.serializer_code, 2);
    }

    #[tokio::test]
    async fn test_write_idle_sends_heartbeat() {
        let codec = Arc::new(FrameCodec::new());
        let (a, b) = pair().await;
        let idle = IdleConfig {
            read_idle: None,
            write_idle: Some(Duration::from_millis(50)),
            heartbeat_serializer_code: 2,
        };
        let (_ra, _sink_a, _wa) = split_framed(a, codec.clone(), idle);
        let (mut rb, _sink_b, _wb) = split_framed(b, codec, IdleConfig::default());

        let frame = tokio::time::timeout(Duration::from_secs(2), rb.next_frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Frame::heartbeat_request(2));
    }

    #[tokio::test]
    async fn test_read_idle_times_out() {
        let codec = Arc::new(FrameCodec::new());
        let (a, _b) = pair().await;
        let idle = IdleConfig {
            read_idle: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (mut ra, _sink_a, _wa) = split_framed(a, codec, idle);

        assert!(matches!(ra.next_frame().await, Err(RpcError::Timeout(50))));
    }

    #[tokio::test]
    async fn test_peer_close_is_clean_eof() {
        let codec = Arc::new(FrameCodec::new());
        let (a, b) = pair().await;
        let (mut ra, _sink_a, _wa) = split_framed(a, codec.clone(), IdleConfig::default());
        let (_rb, sink_b, wb) = split_framed(b, codec, IdleConfig::default());

        // Dropping the only sink stops the writer, which shuts down the write half
        drop(sink_b);
        wb.await.unwrap();

        assert!(ra.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect(&addr, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(RpcError::Connection(_))));
    }
}
