use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::frame::{
    Frame, Message, MessageType, HEADER_LEN, MAGIC, MAX_BODY_SIZE, PING, PONG, VERSION,
};
use crate::serialization::{builtin_serializers, Serializer};

/// Encodes frames to bytes and decodes frame bodies.
///
/// Holds every serializer the runtime understands, keyed by wire code. The
/// serializer used for a frame is always the one named in its header, so a
/// single codec can serve peers that picked different serializers.
///
/// # Example
///
/// ```
/// use relayrpc_common::protocol::{Call, Frame};
/// use relayrpc_common::transport::{FrameCodec, FrameDecoder};
/// use std::sync::Arc;
///
/// let codec = Arc::new(FrameCodec::new());
/// let frame = Frame::request(2, Call::new("Echo", "echo", vec!["hi".into()]));
///
/// let encoded = codec.encode(&frame).unwrap();
///
/// let mut decoder = FrameDecoder::new(codec);
/// let frames = decoder.push(&encoded).unwrap();
/// assert_eq!(frames, vec![frame]);
/// ```
#[derive(Clone)]
pub struct FrameCodec {
    serializers: HashMap<u8, Arc<dyn Serializer>>,
    max_body_size: usize,
}

impl FrameCodec {
    /// Creates a codec that understands every built-in serializer.
    pub fn new() -> Self {
        let mut codec = FrameCodec::empty();
        for serializer in builtin_serializers() {
            codec = codec.with_serializer(serializer);
        }
        codec
    }

    /// Creates a codec with no serializers; only heartbeats can be encoded.
    pub fn empty() -> Self {
        FrameCodec {
            serializers: HashMap::new(),
            max_body_size: MAX_BODY_SIZE,
        }
    }

    /// Adds a serializer, replacing any previous one with the same code.
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.insert(serializer.code(), serializer);
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn serializer(&self, code: u8) -> Option<&Arc<dyn Serializer>> {
        self.serializers.get(&code)
    }

    fn require_serializer(&self, code: u8) -> Result<&Arc<dyn Serializer>> {
        self.serializers
            .get(&code)
            .ok_or_else(|| RpcError::Protocol(format!("unknown serializer code {}", code)))
    }

    /// Encodes a frame into a freshly allocated buffer.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode_into(frame, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Appends the encoded frame to `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame names an unknown serializer, if the body
    /// cannot be serialized, or if the body exceeds the maximum size.
    pub fn encode_into(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        let body = match &frame.message {
            Message::HeartbeatRequest => PING.to_vec(),
            Message::HeartbeatResponse => PONG.to_vec(),
            Message::Request(call) => self
                .require_serializer(frame.serializer_code)?
                .serialize_call(call)?,
            Message::Response(reply) => self
                .require_serializer(frame.serializer_code)?
                .serialize_reply(reply)?,
        };

        if body.len() > self.max_body_size {
            return Err(RpcError::Protocol(format!(
                "Body size {} exceeds maximum {}",
                body.len(),
                self.max_body_size
            )));
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_slice(&MAGIC);
        dst.put_u8(frame.version);
        dst.put_u8(frame.serializer_code);
        dst.put_u8(frame.message_type() as u8);
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }

    fn decode_body(&self, header: &Header, body: &[u8]) -> Result<Message> {
        let serializer = self.require_serializer(header.serializer_code)?;
        let message = match header.message_type {
            MessageType::HeartbeatRequest => Message::HeartbeatRequest,
            MessageType::HeartbeatResponse => Message::HeartbeatResponse,
            MessageType::Request => serializer
                .deserialize_call(body)
                .map(Message::Request)
                .map_err(|e| RpcError::Serialization(format!("bad request body: {}", e)))?,
            MessageType::Response => serializer
                .deserialize_reply(body)
                .map(Message::Response)
                .map_err(|e| RpcError::Serialization(format!("bad response body: {}", e)))?,
        };
        Ok(message)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Header fields that have been validated but not yet consumed.
#[derive(Debug, Clone, Copy)]
struct Header {
    version: u8,
    serializer_code: u8,
    message_type: MessageType,
    body_len: usize,
}

/// Streaming frame decoder.
///
/// Accumulates bytes from the socket and yields complete frames. A frame is
/// only consumed once its whole body has arrived: when the header is present
/// but the body is not, the buffer is left untouched and decoding resumes from
/// the same header after the next read.
///
/// Errors come in two kinds:
/// - [`RpcError::Protocol`] (bad magic, version, message type, serializer
///   code, or an oversize body) means the stream can no longer be trusted and
///   the connection must be closed.
/// - [`RpcError::Serialization`] means one body was unreadable. Its bytes have
///   already been consumed, so the stream stays aligned and decoding may
///   continue.
pub struct FrameDecoder {
    buffer: BytesMut,
    codec: Arc<FrameCodec>,
}

impl FrameDecoder {
    pub fn new(codec: Arc<FrameCodec>) -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(8 * 1024),
            codec,
        }
    }

    /// Appends `data` and drains every complete frame.
    ///
    /// Stops at the first error. Callers that want to keep going after an
    /// unreadable body should drive [`decode`](Self::decode) themselves.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.decode()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Tries to decode one frame from the buffered bytes.
    ///
    /// Returns `Ok(None)` if more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        let header = match self.peek_header()? {
            Some(header) => header,
            None => return Ok(None),
        };

        if self.buffer.len() < HEADER_LEN + header.body_len {
            // Header stays in the buffer until the whole body is here.
            self.buffer.reserve(HEADER_LEN + header.body_len - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(HEADER_LEN);
        let body = self.buffer.split_to(header.body_len).freeze();

        let message = self.codec.decode_body(&header, &body)?;
        Ok(Some(Frame {
            version: header.version,
            serializer_code: header.serializer_code,
            message,
        }))
    }

    fn peek_header(&self) -> Result<Option<Header>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut head = &self.buffer[..HEADER_LEN];

        let mut magic = [0u8; 4];
        head.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(RpcError::Protocol(format!("bad magic {:02x?}", magic)));
        }

        let version = head.get_u8();
        if version != VERSION {
            return Err(RpcError::Protocol(format!("unsupported version {}", version)));
        }

        let serializer_code = head.get_u8();
        if self.codec.serializer(serializer_code).is_none() {
            return Err(RpcError::Protocol(format!(
                "unknown serializer code {}",
                serializer_code
            )));
        }

        let message_type = MessageType::try_from(head.get_u8())?;

        let body_len = head.get_u32() as usize;
        if body_len > self.codec.max_body_size() {
            return Err(RpcError::Protocol(format!(
                "Body size {} exceeds maximum {}",
                body_len,
                self.codec.max_body_size()
            )));
        }

        Ok(Some(Header {
            version,
            serializer_code,
            message_type,
            body_len,
        }))
    }

    /// Number of buffered, not yet decoded bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Direct access to the receive buffer, for reading straight from a socket.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}
