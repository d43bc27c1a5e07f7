//! pktline framing over a [`Duplex`]: buffered packet reads with a per-frame
//! timeout and cooperative cancellation, plus raw writes for pack payloads.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::cancel::CancelToken;

use super::types::{Duplex, ProtocolError};

/// One framed unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(Bytes),
    /// `0000`
    Flush,
    /// `0001`
    Delim,
    /// `0002`
    ResponseEnd,
    /// The peer half-closed.
    Eof,
}

/// Framed view over a duplex.
pub struct PktLink<D: Duplex> {
    duplex: D,
    buffer: BytesMut,
    read_timeout: Duration,
    cancel: CancelToken,
    eof: bool,
}

impl<D: Duplex> PktLink<D> {
    pub fn new(duplex: D, read_timeout: Duration, cancel: CancelToken) -> Self {
        PktLink {
            duplex,
            buffer: BytesMut::new(),
            read_timeout,
            cancel,
            eof: false,
        }
    }

    fn check_cancel(&self) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            Err(ProtocolError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Pull one chunk from the duplex into the buffer; `false` on EOF.
    async fn fill(&mut self) -> Result<bool, ProtocolError> {
        if self.eof {
            return Ok(false);
        }
        self.check_cancel()?;
        let chunk = tokio::time::timeout(self.read_timeout, self.duplex.recv())
            .await
            .map_err(|_| ProtocolError::Timeout(self.read_timeout))??;
        match chunk {
            Some(chunk) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(true)
            }
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    /// Attempt to slice one complete packet out of the buffer.
    fn take_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let header = std::str::from_utf8(&self.buffer[..4])
            .map_err(|_| ProtocolError::invalid_request("pktline length is not UTF-8"))?;
        let length = usize::from_str_radix(header, 16)
            .map_err(|_| ProtocolError::invalid_request("pktline length is not hex"))?;

        if length <= 2 {
            let _ = self.buffer.split_to(4);
            return Ok(Some(match length {
                0 => Packet::Flush,
                1 => Packet::Delim,
                _ => Packet::ResponseEnd,
            }));
        }
        if length < 4 {
            return Err(ProtocolError::invalid_request("pktline length below 4"));
        }
        if self.buffer.len() < length {
            return Ok(None);
        }
        let mut frame = self.buffer.split_to(length);
        let payload = frame.split_off(4);
        Ok(Some(Packet::Data(payload.freeze())))
    }

    /// The next packet; [`Packet::Eof`] once the peer half-closed cleanly.
    pub async fn read_packet(&mut self) -> Result<Packet, ProtocolError> {
        loop {
            if let Some(packet) = self.take_packet()? {
                tracing::debug!("pkt in: {:?}", packet);
                return Ok(packet);
            }
            if !self.fill().await? {
                if self.buffer.is_empty() {
                    return Ok(Packet::Eof);
                }
                return Err(ProtocolError::Closed);
            }
        }
    }

    /// A data packet's payload, erroring on anything else.
    pub async fn expect_data(&mut self) -> Result<Bytes, ProtocolError> {
        match self.read_packet().await? {
            Packet::Data(data) => Ok(data),
            other => Err(ProtocolError::invalid_request(&format!(
                "expected a data pkt, got {other:?}"
            ))),
        }
    }

    /// Collect raw (unframed) bytes until the peer half-closes; the buffered
    /// residue is included.
    pub async fn read_raw_to_end(&mut self) -> Result<Bytes, ProtocolError> {
        let mut out = self.buffer.split().to_vec();
        while self.fill().await? {
            out.extend_from_slice(&self.buffer.split());
        }
        Ok(Bytes::from(out))
    }

    pub async fn write_packet(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.check_cancel()?;
        let mut frame = BytesMut::with_capacity(payload.len() + 4);
        super::utils::add_pkt_line_bytes(&mut frame, payload);
        self.duplex.send(frame.freeze()).await
    }

    pub async fn write_line(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.write_packet(text.as_bytes()).await
    }

    pub async fn write_flush(&mut self) -> Result<(), ProtocolError> {
        self.check_cancel()?;
        self.duplex
            .send(Bytes::from_static(super::types::PKT_LINE_END_MARKER))
            .await
    }

    pub async fn write_delim(&mut self) -> Result<(), ProtocolError> {
        self.duplex
            .send(Bytes::from_static(super::types::PKT_DELIM_MARKER))
            .await
    }

    pub async fn write_response_end(&mut self) -> Result<(), ProtocolError> {
        self.duplex
            .send(Bytes::from_static(super::types::PKT_RESPONSE_END_MARKER))
            .await
    }

    /// Unframed write, used for pack bytes outside side-band mode.
    pub async fn write_raw(&mut self, data: Bytes) -> Result<(), ProtocolError> {
        self.check_cancel()?;
        self.duplex.send(data).await
    }

    /// Half-close the outgoing direction.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        self.duplex.close().await
    }
}
