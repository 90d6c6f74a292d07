//! RelayRPC Transport Layer
//!
//! This module turns TCP byte streams into frames and back.
//!
//! # Components
//!
//! - **[`FrameCodec`]**: encodes frames and deserializes bodies with the
//!   serializer named in each frame header
//! - **[`FrameDecoder`]**: streaming decoder that tolerates arbitrary
//!   fragmentation of the byte stream
//! - **[`split_framed`]**: splits a TCP stream into a [`FrameReader`] and a
//!   cloneable [`FrameSink`], with read-idle and write-idle timers
//!
//! # Message Size Limits
//!
//! Bodies are limited to 100 MB by default to prevent memory exhaustion.

pub mod codec;
pub mod tcp;

pub use codec::{FrameCodec, FrameDecoder};
pub use tcp::{connect, split_framed, FrameReader, FrameSink, IdleConfig, DEFAULT_CONNECT_TIMEOUT};

#[cfg(test)]
mod tests;
