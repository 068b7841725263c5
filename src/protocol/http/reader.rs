//! HTTP message reader

use std::sync::Arc;

use log::trace;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::common::Result;
use crate::connection::Connection;
use crate::pdu::{Pdu, PduDestination};

use super::framing::{BodyDecoder, FramingError, MAX_LINE_LENGTH};
use super::message::{HttpHead, HttpMessage, CHUNK_TAG, LAST_CHUNK_TAG};

/// Body of a split message still being read
struct PendingBody {
    decoder: BodyDecoder,
    charset: String,
}

/// Reads requests or responses from a buffered byte stream
///
/// Bodies longer than `max_length` come out as several parts so every part stays small
/// enough to be edited on its own.
pub struct HttpReader<R> {
    inner: R,
    max_length: usize,
    default_charset: String,
    pending: Option<PendingBody>,
}

impl<R> HttpReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R, max_length: usize, default_charset: impl Into<String>) -> Self {
        Self {
            inner,
            max_length: max_length.max(1),
            default_charset: default_charset.into(),
            pending: None,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Whether the previous part left a body unfinished
    pub fn in_message(&self) -> bool {
        self.pending.is_some()
    }

    /// Read the next message or message part
    ///
    /// Returns `Ok(None)` when the stream ends between messages.
    ///
    /// # Errors
    ///
    /// Framing errors abort the current message. End of stream inside a message is
    /// `FramingError::Truncated`.
    pub async fn read(&mut self) -> Result<Option<HttpMessage>> {
        let (mut head, mut decoder, charset) = match self.pending.take() {
            Some(pending) => (None, pending.decoder, pending.charset),
            None => {
                let Some(head) = self.read_head().await? else {
                    return Ok(None);
                };
                let decoder = BodyDecoder::new(head.body_framing()?);
                let charset = head.charset().unwrap_or_else(|| self.default_charset.clone());
                (Some(head), decoder, charset)
            }
        };
        let continued = head.is_none();

        let body = self.read_body(&mut decoder).await?;
        trace!("Read HTTP part of {} bytes, body step {}", body.len(), decoder.step());

        let mut tags = Vec::new();
        if decoder.is_done() {
            if continued {
                tags.push(LAST_CHUNK_TAG);
            }
        } else {
            if let Some(head) = head.as_mut() {
                // The rest of the body follows as separate parts
                head.remove("Content-Length");
                if !head.is_chunked() {
                    head.set("Transfer-Encoding", "chunked");
                }
            }
            tags.push(CHUNK_TAG);
            self.pending = Some(PendingBody {
                decoder,
                charset: charset.clone(),
            });
        }

        let mut message = HttpMessage::new(head, body, charset);
        message.tags.extend(tags.into_iter().map(String::from));
        Ok(Some(message))
    }

    /// Read the next part as a PDU for `connection`
    pub async fn read_pdu(&mut self, connection: &Arc<Connection>, destination: PduDestination) -> Result<Option<Pdu>> {
        Ok(self
            .read()
            .await?
            .map(|message| message.into_pdu(Arc::clone(connection), destination)))
    }

    async fn read_head(&mut self) -> Result<Option<HttpHead>> {
        // Blank lines between messages are tolerated
        let start = loop {
            match self.read_line().await? {
                None => return Ok(None),
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
            }
        };

        let mut head = HttpHead::new(String::from_utf8_lossy(&start).into_owned());
        loop {
            let line = self.read_line().await?.ok_or(FramingError::Truncated)?;
            if line.is_empty() {
                return Ok(Some(head));
            }
            let line = String::from_utf8_lossy(&line);
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FramingError::InvalidHeader(line.to_string()))?;
            head.append(name.trim(), value.trim());
        }
    }

    /// Read one line without its terminator; `None` at end of stream before any byte
    async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(FramingError::Truncated.into());
            }

            let (used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            };
            line.extend_from_slice(&available[..used]);
            self.inner.consume(used);

            if line.len() > MAX_LINE_LENGTH + 2 {
                return Err(FramingError::LineTooLong(MAX_LINE_LENGTH).into());
            }
            if complete {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
        }
    }

    async fn read_body(&mut self, decoder: &mut BodyDecoder) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        while !decoder.is_done() && body.len() < self.max_length {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Err(FramingError::Truncated.into());
            }
            let limit = self.max_length - body.len();
            let used = decoder.decode(available, &mut body, limit)?;
            self.inner.consume(used);
        }
        Ok(body)
    }
}
