//! HTTP message writer

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::common::Result;
use crate::pdu::Pdu;

use super::message::HttpMessage;

/// Writes messages and message parts back to a byte stream
pub struct HttpWriter<W> {
    inner: W,
}

impl<W> HttpWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub async fn write(&mut self, message: &HttpMessage) -> Result<()> {
        self.inner.write_all(&message.to_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a PDU produced by `HttpMessage::into_pdu`; its data is already wire form
    pub async fn write_pdu(&mut self, pdu: &Pdu) -> Result<()> {
        self.inner.write_all(pdu.data()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
