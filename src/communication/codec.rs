use std::marker::PhantomData;

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::communication::CodecError;

const LENGTH_SIZE: usize = 4;
/// Control messages are small; larger frames are rejected before buffering them.
pub(crate) const MAX_FRAME_SIZE: usize = 1 << 20;

/// Frames control messages as a big-endian `u32` length followed by the
/// bincode-serialized message.
///
/// `T` is the type of message sent on the connection, `U` the type received.
pub(crate) struct ControlPlaneCodec<T, U>
where
    T: Serialize,
    U: for<'a> Deserialize<'a>,
{
    msg_size: Option<usize>,
    phantom: PhantomData<(T, U)>,
}

impl<T, U> ControlPlaneCodec<T, U>
where
    T: Serialize,
    U: for<'a> Deserialize<'a>,
{
    pub fn new() -> Self {
        Self {
            msg_size: None,
            phantom: PhantomData,
        }
    }

    fn try_read_message(&mut self, buf: &mut BytesMut, msg_size: usize) -> Result<Option<U>, CodecError> {
        if buf.len() >= msg_size {
            let msg_bytes = buf.split_to(msg_size);
            self.msg_size = None;
            bincode::deserialize(&msg_bytes)
                .map(Some)
                .map_err(CodecError::from)
        } else {
            // Reserve space for the rest of the message.
            buf.reserve(msg_size - buf.len());
            Ok(None)
        }
    }

    fn try_read_msg_size(&self, buf: &mut BytesMut) -> Option<usize> {
        if buf.len() >= LENGTH_SIZE {
            let msg_size_bytes = buf.split_to(LENGTH_SIZE);
            let msg_size = NetworkEndian::read_u32(&msg_size_bytes);
            Some(msg_size as usize)
        } else {
            None
        }
    }
}

impl<T, U> Default for ControlPlaneCodec<T, U>
where
    T: Serialize,
    U: for<'a> Deserialize<'a>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, U> Decoder for ControlPlaneCodec<T, U>
where
    T: Serialize,
    U: for<'a> Deserialize<'a>,
{
    type Item = U;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, CodecError> {
        if let Some(msg_size) = self.msg_size {
            // We already have a message size, decode the message.
            self.try_read_message(buf, msg_size)
        } else if let Some(msg_size) = self.try_read_msg_size(buf) {
            if msg_size > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge {
                    size: msg_size,
                    limit: MAX_FRAME_SIZE,
                });
            }
            self.msg_size = Some(msg_size);
            self.try_read_message(buf, msg_size)
        } else {
            // We need more bytes before we can read the message size.
            Ok(None)
        }
    }
}

impl<T, U> Encoder<T> for ControlPlaneCodec<T, U>
where
    T: Serialize,
    U: for<'a> Deserialize<'a>,
{
    type Error = CodecError;

    fn encode(&mut self, msg: T, buf: &mut BytesMut) -> Result<(), CodecError> {
        let msg_size = bincode::serialized_size(&msg).map_err(CodecError::from)? as usize;
        if msg_size > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge {
                size: msg_size,
                limit: MAX_FRAME_SIZE,
            });
        }
        // Write the size of the serialized message.
        let mut size_buffer: Vec<u8> = Vec::with_capacity(LENGTH_SIZE);
        size_buffer.write_u32::<NetworkEndian>(msg_size as u32)?;
        buf.extend_from_slice(&size_buffer);
        // Serialize and write the message.
        let serialized_msg = bincode::serialize(&msg).map_err(CodecError::from)?;
        buf.extend_from_slice(&serialized_msg);
        Ok(())
    }
}
