//! [`Transport`] over any byte stream, using the frame format in [`crate::wire`].

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use strand_core::{
    CloseFrame, Incoming, MessageCodec, PreparedMessage, Transport, TransportError,
    TransportResult,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use super::{
    FrameKind, WireError, decode_close_payload, encode_close_payload, encode_frame,
    try_decode_frame,
};

impl From<WireError> for TransportError {
    fn from(err: WireError) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// Read side: the stream half plus whatever bytes arrived past the last frame.
///
/// The buffer lives here rather than on the stack of `receive`, so a receive
/// dropped mid-frame loses nothing.
struct FrameReader<S> {
    half: ReadHalf<S>,
    buffer: BytesMut,
}

impl<S: AsyncRead> FrameReader<S> {
    async fn next_frame(&mut self) -> TransportResult<Option<(FrameKind, Vec<u8>)>> {
        loop {
            if let Some((kind, payload, consumed)) = try_decode_frame(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(Some((kind, payload)));
            }

            let read = self.half.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::Protocol(format!(
                    "stream ended inside a frame ({} bytes buffered)",
                    self.buffer.len()
                )));
            }
        }
    }
}

/// Length-prefixed, checksummed frames over a byte stream (TCP socket,
/// in-memory duplex, TLS stream).
///
/// `Out` messages are encoded with the codec into [`FrameKind::Data`] frames;
/// inbound data frames are decoded into `In`.
pub struct FramedTransport<S, C, In, Out> {
    reader: Mutex<FrameReader<S>>,
    writer: Mutex<WriteHalf<S>>,
    codec: C,
    closed: AtomicBool,
    _messages: PhantomData<fn(Out) -> In>,
}

impl<S, C, In, Out> FramedTransport<S, C, In, Out>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    C: MessageCodec,
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    /// Wrap a byte stream.
    pub fn new(stream: S, codec: C) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(FrameReader {
                half: read_half,
                buffer: BytesMut::with_capacity(8 * 1024),
            }),
            writer: Mutex::new(write_half),
            codec,
            closed: AtomicBool::new(false),
            _messages: PhantomData,
        }
    }

    /// Send a keep-alive probe. The peer's engine answers with a pong.
    pub async fn send_ping(&self, payload: Bytes) -> TransportResult<()> {
        self.write_frame(FrameKind::Ping, &payload).await
    }

    async fn write_frame(&self, kind: FrameKind, payload: &[u8]) -> TransportResult<()> {
        let frame = encode_frame(kind, payload)?;
        self.write_raw(&frame).await
    }

    async fn write_raw(&self, bytes: &[u8]) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<S, C, In, Out> Transport for FramedTransport<S, C, In, Out>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    C: MessageCodec,
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    type Outbound = Out;
    type Inbound = In;

    async fn send(&self, message: Out) -> TransportResult<()> {
        let payload = self.codec.encode(&message)?;
        self.write_frame(FrameKind::Data, &payload).await
    }

    async fn send_prepared(&self, prepared: &PreparedMessage) -> TransportResult<()> {
        self.write_raw(prepared.as_bytes()).await
    }

    async fn send_pong(&self, payload: Bytes) -> TransportResult<()> {
        self.write_frame(FrameKind::Pong, &payload).await
    }

    async fn receive(&self) -> TransportResult<Incoming<In>> {
        let mut reader = self.reader.lock().await;
        match reader.next_frame().await? {
            None => Err(TransportError::EndOfStream(None)),
            Some((FrameKind::Data, payload)) => {
                Ok(Incoming::Message(self.codec.decode(&payload)?))
            }
            Some((FrameKind::Ping, payload)) => Ok(Incoming::Ping(Bytes::from(payload))),
            Some((FrameKind::Pong, payload)) => Ok(Incoming::Pong(Bytes::from(payload))),
            Some((FrameKind::Close, payload)) => Err(TransportError::EndOfStream(Some(
                decode_close_payload(&payload)?,
            ))),
            Some((FrameKind::Header, _)) => Err(TransportError::Protocol(
                "header frame after handshake".to_string(),
            )),
        }
    }

    async fn send_header(&self, header: Bytes) -> TransportResult<()> {
        self.write_frame(FrameKind::Header, &header).await
    }

    async fn receive_header(&self) -> TransportResult<Bytes> {
        let mut reader = self.reader.lock().await;
        match reader.next_frame().await? {
            Some((FrameKind::Header, payload)) => Ok(Bytes::from(payload)),
            None => Err(TransportError::EndOfStream(None)),
            Some((FrameKind::Close, payload)) => Err(TransportError::EndOfStream(Some(
                decode_close_payload(&payload)?,
            ))),
            Some((kind, _)) => Err(TransportError::Protocol(format!(
                "expected header frame, got {kind:?}"
            ))),
        }
    }

    async fn close(&self, frame: Option<CloseFrame>) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        if let Some(frame) = frame {
            let close = encode_frame(FrameKind::Close, &encode_close_payload(&frame))?;
            // The peer may already be gone; shutdown below still releases the stream.
            if let Err(err) = writer.write_all(&close).await {
                tracing::debug!("close frame not delivered: {}", err);
            }
        }
        writer.shutdown().await?;
        Ok(())
    }

    fn prepare(payload: &[u8]) -> TransportResult<PreparedMessage> {
        Ok(PreparedMessage::new(encode_frame(FrameKind::Data, payload)?))
    }
}
