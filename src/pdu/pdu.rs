//! Protocol data unit
//!
//! A PDU is one unit of captured traffic plus the metadata interceptors work with.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::{ProxyError, Result};
use crate::connection::Connection;
use crate::interceptor::InterceptorRef;

/// Charset stamped on PDUs when nothing else is configured
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Side of the connection a PDU is travelling to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PduDestination {
    /// Travelling towards the client (S2C)
    Client,
    /// Travelling towards the server (C2S)
    Server,
}

impl PduDestination {
    /// The other side
    pub fn opposite(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for PduDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "S2C"),
            Self::Server => write!(f, "C2S"),
        }
    }
}

/// Protocol data unit
///
/// The buffer may be larger than the data it carries: `size` bytes are meaningful and
/// `size <= capacity()` always holds. The connection reference is shared; everything
/// else is owned by the PDU, so [`Pdu::copy`] yields a fully independent unit.
#[derive(Clone)]
pub struct Pdu {
    connection: Arc<Connection>,
    destination: PduDestination,
    buffer: Vec<u8>,
    size: usize,
    charset: String,
    tags: HashSet<String>,
    last_interceptor: Option<InterceptorRef>,
}

impl Pdu {
    /// Create a PDU whose buffer is exactly its data
    pub fn new(connection: Arc<Connection>, destination: PduDestination, data: Vec<u8>) -> Self {
        let size = data.len();
        Self {
            connection,
            destination,
            buffer: data,
            size,
            charset: DEFAULT_CHARSET.to_string(),
            tags: HashSet::new(),
            last_interceptor: None,
        }
    }

    /// Create a PDU carrying the first `size` bytes of `buffer`
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::InvalidPdu` when `size` exceeds the buffer length.
    pub fn with_buffer(
        connection: Arc<Connection>,
        destination: PduDestination,
        buffer: Vec<u8>,
        size: usize,
    ) -> Result<Self> {
        let mut pdu = Self::new(connection, destination, Vec::new());
        pdu.set_buffer(buffer, size)?;
        Ok(pdu)
    }

    /// Connection this PDU belongs to
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Code of the proxy that captured this PDU
    pub fn proxy(&self) -> &str {
        self.connection.proxy()
    }

    pub fn destination(&self) -> PduDestination {
        self.destination
    }

    pub fn set_destination(&mut self, destination: PduDestination) {
        self.destination = destination;
    }

    /// Whole buffer, including bytes past `size`
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Mutable access to the whole buffer
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Meaningful bytes of the buffer
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Replace the buffer and the logical size
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::InvalidPdu` when `size` exceeds the buffer length; the PDU is left
    /// untouched in that case.
    pub fn set_buffer(&mut self, buffer: Vec<u8>, size: usize) -> Result<()> {
        if size > buffer.len() {
            return Err(ProxyError::InvalidPdu(format!(
                "size {} exceeds buffer capacity {}",
                size,
                buffer.len()
            )));
        }
        self.buffer = buffer;
        self.size = size;
        Ok(())
    }

    /// Replace the data; the buffer becomes exactly `data`
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.size = data.len();
        self.buffer = data;
    }

    /// Change the logical size within the current capacity
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::InvalidPdu` when `size` exceeds the capacity.
    pub fn set_size(&mut self, size: usize) -> Result<()> {
        if size > self.buffer.len() {
            return Err(ProxyError::InvalidPdu(format!(
                "size {} exceeds buffer capacity {}",
                size,
                self.buffer.len()
            )));
        }
        self.size = size;
        Ok(())
    }

    /// Grow the buffer to at least `capacity` bytes
    ///
    /// Never shrinks. When the buffer grows, exactly the first `size` bytes are carried over
    /// and the rest of the new buffer is zeroed.
    pub fn resize(&mut self, capacity: usize) {
        if capacity <= self.buffer.len() {
            return;
        }

        let mut buffer = vec![0u8; capacity];
        buffer[..self.size].copy_from_slice(&self.buffer[..self.size]);
        self.buffer = buffer;
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn set_charset(&mut self, charset: impl Into<String>) {
        self.charset = charset.into();
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Last interceptor that let this PDU through, if any
    pub fn last_interceptor(&self) -> Option<&InterceptorRef> {
        self.last_interceptor.as_ref()
    }

    pub fn set_last_interceptor(&mut self, interceptor: Option<InterceptorRef>) {
        self.last_interceptor = interceptor;
    }

    /// Deep copy: the buffer and the tag set are cloned, the connection is shared
    pub fn copy(&self) -> Self {
        self.clone()
    }
}

impl fmt::Debug for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pdu")
            .field("proxy", &self.proxy())
            .field("connection", &self.connection.id())
            .field("destination", &self.destination)
            .field("size", &self.size)
            .field("capacity", &self.buffer.len())
            .field("charset", &self.charset)
            .field("tags", &self.tags)
            .field("last_interceptor", &self.last_interceptor)
            .finish()
    }
}
