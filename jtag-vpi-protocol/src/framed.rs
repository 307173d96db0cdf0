//! [`tokio_util::codec`] adapters for asynchronous hosts.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::ReadError,
    protocol::{FULL_FRAME_SIZE, STATUS_SIZE, StatusResponse, VpiFrame},
};

/// Frames a byte stream into fixed-size OpenOCD frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct VpiFrameCodec;

impl Decoder for VpiFrameCodec {
    type Item = VpiFrame;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FULL_FRAME_SIZE {
            src.reserve(FULL_FRAME_SIZE - src.len());
            return Ok(None);
        }
        let frame = VpiFrame::from_bytes(&src[..FULL_FRAME_SIZE])?;
        src.advance(FULL_FRAME_SIZE);
        Ok(Some(frame))
    }
}

impl Encoder<VpiFrame> for VpiFrameCodec {
    type Error = ReadError;

    fn encode(&mut self, frame: VpiFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(FULL_FRAME_SIZE);
        dst.put_slice(&frame.to_bytes());
        Ok(())
    }
}

/// Decodes the 4-byte status responses of the minimal and legacy dialects.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusCodec;

impl Decoder for StatusCodec {
    type Item = StatusResponse;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < STATUS_SIZE {
            return Ok(None);
        }
        let mut bytes = [0u8; STATUS_SIZE];
        src.copy_to_slice(&mut bytes);
        Ok(Some(StatusResponse::from_bytes(bytes)))
    }
}
