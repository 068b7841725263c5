//! HTTP message model

use std::collections::HashSet;
use std::sync::Arc;

use crate::connection::Connection;
use crate::pdu::{Pdu, PduDestination};

use super::framing::{parse_content_length, BodyFraming, FramingError};

/// Tag of every part of a re-framed body except the last
pub const CHUNK_TAG: &str = "chunk";
/// Tag of the final part of a re-framed body
pub const LAST_CHUNK_TAG: &str = "last_chunk";

/// Start line and headers of a request or response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHead {
    start_line: String,
    headers: Vec<(String, String)>,
}

impl HttpHead {
    pub fn new(start_line: impl Into<String>) -> Self {
        Self {
            start_line: start_line.into(),
            headers: Vec::new(),
        }
    }

    pub fn start_line(&self) -> &str {
        &self.start_line
    }

    /// Responses start with the protocol version
    pub fn is_response(&self) -> bool {
        self.start_line.starts_with("HTTP/")
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Add a header, folding repeated names into one comma-separated value
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => self.headers.push((name, value)),
        }
    }

    /// Replace a header value, keeping its position when present
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => *existing = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.headers.iter().position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.headers.remove(index).1)
    }

    /// `Transfer-Encoding` ends with `chunked`
    pub fn is_chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .and_then(|value| value.rsplit(',').next())
            .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
    }

    pub fn content_length(&self) -> Result<Option<u64>, FramingError> {
        self.get("Content-Length").map(parse_content_length).transpose()
    }

    /// Framing of the body that follows this head; chunked wins over a length
    pub fn body_framing(&self) -> Result<BodyFraming, FramingError> {
        if self.is_chunked() {
            return Ok(BodyFraming::Chunked);
        }
        Ok(match self.content_length()? {
            Some(length) => BodyFraming::ContentLength(length),
            None => BodyFraming::Empty,
        })
    }

    /// Charset named by `Content-Type`, if any
    pub fn charset(&self) -> Option<String> {
        let content_type = self.get("Content-Type")?;
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_string())
                .filter(|charset| !charset.is_empty())
        })
    }

    /// Serialize start line, headers and the blank line
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.start_line.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
    }
}

/// One part read from an HTTP stream
///
/// A whole message has a head and its full body. A long body is split into several
/// parts: the first carries the head, every part but the last is tagged `chunk` and the
/// last is tagged `last_chunk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    pub head: Option<HttpHead>,
    pub body: Vec<u8>,
    pub charset: String,
    pub tags: HashSet<String>,
}

impl HttpMessage {
    pub fn new(head: Option<HttpHead>, body: Vec<u8>, charset: impl Into<String>) -> Self {
        Self {
            head,
            body,
            charset: charset.into(),
            tags: HashSet::new(),
        }
    }

    pub fn is_chunk(&self) -> bool {
        self.tags.contains(CHUNK_TAG)
    }

    pub fn is_last_chunk(&self) -> bool {
        self.tags.contains(LAST_CHUNK_TAG)
    }

    /// Wire form, as `HttpWriter` would write it
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        let chunked = self.is_chunk() || self.is_last_chunk();

        if let Some(head) = &self.head {
            if chunked {
                head.write_to(&mut out);
            } else {
                let mut head = head.clone();
                if !self.body.is_empty() || head.is_chunked() || head.get("Content-Length").is_some() {
                    head.remove("Transfer-Encoding");
                    head.set("Content-Length", self.body.len().to_string());
                }
                head.write_to(&mut out);
            }
        }

        if chunked {
            if !self.body.is_empty() {
                out.extend_from_slice(format!("{:x}\r\n", self.body.len()).as_bytes());
                out.extend_from_slice(&self.body);
                out.extend_from_slice(b"\r\n");
            }
            if self.is_last_chunk() {
                out.extend_from_slice(b"0\r\n\r\n");
            }
        } else {
            out.extend_from_slice(&self.body);
        }
        out
    }

    /// PDU carrying the wire form, charset and tags of this part
    pub fn into_pdu(self, connection: Arc<Connection>, destination: PduDestination) -> Pdu {
        let mut pdu = Pdu::new(connection, destination, self.to_bytes());
        pdu.set_charset(self.charset);
        pdu.add_tags(self.tags);
        pdu
    }
}
