use super::frame::{CallRequest, CallResponse};
use crate::error::{RpcError, TransportError};
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::marker::PhantomData;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// True when the bytes on the wire were readable but not a valid frame.
    pub fn is_malformed(&self) -> bool {
        match self {
            CodecError::Json(_) => true,
            // LengthDelimitedCodec reports oversized frames as InvalidData.
            CodecError::Io(e) => e.kind() == io::ErrorKind::InvalidData,
        }
    }
}

impl From<CodecError> for TransportError {
    fn from(e: CodecError) -> Self {
        if e.is_malformed() {
            TransportError::Frame(e.to_string())
        } else {
            TransportError::Call(e.to_string())
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        RpcError::Transport(e.into())
    }
}

/// Length-prefixed JSON frames: decodes `D`, encodes `E`.
pub struct JsonFrameCodec<D, E> {
    inner: LengthDelimitedCodec,
    _marker: PhantomData<fn(E) -> D>,
}

/// Plugin side: reads requests, writes responses.
pub type PluginCodec = JsonFrameCodec<CallRequest, CallResponse>;

/// Host side: reads responses, writes requests.
pub type HostCodec = JsonFrameCodec<CallResponse, CallRequest>;

impl<D, E> JsonFrameCodec<D, E> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_bytes)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<D, E> Default for JsonFrameCodec<D, E> {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<D: DeserializeOwned, E> Decoder for JsonFrameCodec<D, E> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>, CodecError> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

impl<D, E: Serialize> Encoder<E> for JsonFrameCodec<D, E> {
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(&item)?;
        self.inner.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
