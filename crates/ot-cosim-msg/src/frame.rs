//! ---
//! cosim_section: "02-messaging-ipc-data-model"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Message bus envelopes, frames and transports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
//! Two-part frame codec: `[u32 BE topic len][topic][u32 BE payload len][payload]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{MessagingError, Result};

/// Upper bound on a single frame part.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// A `(topic, payload)` pair as carried by the transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Routing topic.
    pub topic: String,
    /// Opaque payload, usually an encoded envelope.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload interpreted as UTF-8, lossily.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Encode the frame into a contiguous buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        check_len(self.topic.len())?;
        check_len(self.payload.len())?;
        let mut buf =
            BytesMut::with_capacity(2 * LEN_PREFIX + self.topic.len() + self.payload.len());
        buf.put_u32(self.topic.len() as u32);
        buf.put_slice(self.topic.as_bytes());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode a frame previously produced by [`Frame::to_bytes`].
    pub fn from_bytes(mut buf: Bytes) -> Result<Self> {
        let topic = take_part(&mut buf)?;
        let payload = take_part(&mut buf)?;
        if buf.has_remaining() {
            return Err(MessagingError::MalformedEnvelope(format!(
                "{} trailing bytes after frame",
                buf.remaining()
            )));
        }
        Ok(Self {
            topic: topic_from(topic)?,
            payload,
        })
    }
}

fn topic_from(part: Bytes) -> Result<String> {
    String::from_utf8(part.to_vec())
        .map_err(|err| MessagingError::MalformedEnvelope(format!("topic is not UTF-8: {err}")))
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(MessagingError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_LEN,
        });
    }
    Ok(())
}

fn take_part(buf: &mut Bytes) -> Result<Bytes> {
    if buf.remaining() < LEN_PREFIX {
        return Err(MessagingError::MalformedEnvelope("truncated frame".into()));
    }
    let len = buf.get_u32() as usize;
    check_len(len)?;
    if buf.remaining() < len {
        return Err(MessagingError::MalformedEnvelope("truncated frame".into()));
    }
    Ok(buf.split_to(len))
}

/// Write one frame to `writer`.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from `reader`. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let topic_len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let topic = read_part(reader, topic_len).await?;
    let payload_len = reader.read_u32().await? as usize;
    let payload = read_part(reader, payload_len).await?;
    Ok(Some(Frame {
        topic: topic_from(topic)?,
        payload,
    }))
}

async fn read_part<R>(reader: &mut R, len: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    check_len(len)?;
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(buf.freeze())
}
