//! HTTP body framing
//!
//! Works out where a message body ends so the next message can be found in the stream.
//! The decoder is push based: feed it whatever bytes are at hand, it consumes what belongs
//! to the body and reports how far it got.

use std::fmt;

use thiserror::Error;

/// Longest chunk-size or trailer line accepted
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Errors raised while framing one HTTP message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("Invalid chunk size: {0:?}")]
    InvalidChunkSize(String),

    #[error("Invalid content length: {0:?}")]
    InvalidContentLength(String),

    #[error("Invalid header line: {0:?}")]
    InvalidHeader(String),

    #[error("Line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("Stream ended inside a message")]
    Truncated,

    #[error("Expected CRLF after chunk data")]
    InvalidCrlf,
}

/// How the body of a message is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body
    Empty,
    /// `Content-Length` bytes
    ContentLength(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
}

/// Coarse position of the decoder, as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Reading a chunk-size line (or trailers after the last chunk)
    Length,
    /// Reading chunk data, or content-length body bytes
    Chunk,
    /// Body finished
    Done,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Length => write!(f, "LENGTH"),
            Step::Chunk => write!(f, "CHUNK"),
            Step::Done => write!(f, "DONE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Length { remaining: u64 },
    ChunkSize { line: Vec<u8> },
    ChunkData { remaining: u64 },
    ChunkEnd { seen: usize },
    Trailer { line: Vec<u8> },
    Done,
}

/// Incremental body decoder for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyDecoder {
    state: State,
    chunk_size: u64,
}

impl BodyDecoder {
    pub fn new(framing: BodyFraming) -> Self {
        let state = match framing {
            BodyFraming::Empty | BodyFraming::ContentLength(0) => State::Done,
            BodyFraming::ContentLength(length) => State::Length { remaining: length },
            BodyFraming::Chunked => State::ChunkSize { line: Vec::new() },
        };
        Self { state, chunk_size: 0 }
    }

    pub fn content_length(length: u64) -> Self {
        Self::new(BodyFraming::ContentLength(length))
    }

    pub fn chunked() -> Self {
        Self::new(BodyFraming::Chunked)
    }

    pub fn step(&self) -> Step {
        match self.state {
            State::ChunkSize { .. } | State::Trailer { .. } => Step::Length,
            State::Length { .. } | State::ChunkData { .. } | State::ChunkEnd { .. } => Step::Chunk,
            State::Done => Step::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Body bytes still expected in content-length mode
    pub fn remaining(&self) -> u64 {
        match self.state {
            State::Length { remaining } => remaining,
            _ => 0,
        }
    }

    /// Size of the chunk being read, or the last one read
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Data bytes left in the current chunk
    pub fn chunk_remaining(&self) -> u64 {
        match self.state {
            State::ChunkData { remaining } => remaining,
            _ => 0,
        }
    }

    /// Consume framing and body bytes from `input`
    ///
    /// Body bytes are appended to `out`, never more than `limit` of them. Returns the number
    /// of input bytes consumed. Stops early once the body is done or `limit` is reached, so
    /// the caller keeps the rest of `input` for the next message.
    ///
    /// # Errors
    ///
    /// Malformed chunk framing aborts the message; the decoder must not be used afterwards.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>, limit: usize) -> Result<usize, FramingError> {
        let mut consumed = 0;
        let mut written = 0;

        while consumed < input.len() {
            let rest = &input[consumed..];
            match &mut self.state {
                State::Done => break,
                State::Length { remaining } => {
                    let n = take(*remaining, rest.len(), limit - written);
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&rest[..n]);
                    consumed += n;
                    written += n;
                    *remaining -= n as u64;
                    if *remaining == 0 {
                        self.state = State::Done;
                    }
                }
                State::ChunkSize { line } => {
                    let (used, complete) = fill_line(line, rest)?;
                    consumed += used;
                    if complete {
                        let size = parse_chunk_size(line)?;
                        self.chunk_size = size;
                        self.state = if size == 0 {
                            State::Trailer { line: Vec::new() }
                        } else {
                            State::ChunkData { remaining: size }
                        };
                    }
                }
                State::ChunkData { remaining } => {
                    let n = take(*remaining, rest.len(), limit - written);
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&rest[..n]);
                    consumed += n;
                    written += n;
                    *remaining -= n as u64;
                    if *remaining == 0 {
                        self.state = State::ChunkEnd { seen: 0 };
                    }
                }
                State::ChunkEnd { seen } => {
                    let expected = b"\r\n"[*seen];
                    if rest[0] != expected {
                        return Err(FramingError::InvalidCrlf);
                    }
                    consumed += 1;
                    *seen += 1;
                    if *seen == 2 {
                        self.state = State::ChunkSize { line: Vec::new() };
                    }
                }
                State::Trailer { line } => {
                    let (used, complete) = fill_line(line, rest)?;
                    consumed += used;
                    if complete {
                        // Trailer fields are skipped; an empty line ends the body
                        if line.is_empty() {
                            self.state = State::Done;
                        } else {
                            line.clear();
                        }
                    }
                }
            }
        }

        Ok(consumed)
    }

    /// Signal end of stream
    ///
    /// # Errors
    ///
    /// `FramingError::Truncated` unless the body is complete.
    pub fn finish(&self) -> Result<(), FramingError> {
        if self.is_done() {
            Ok(())
        } else {
            Err(FramingError::Truncated)
        }
    }
}

fn take(remaining: u64, available: usize, limit: usize) -> usize {
    let n = available.min(limit);
    usize::try_from(remaining).map_or(n, |remaining| remaining.min(n))
}

/// Append bytes to `line` up to and including LF; the CR LF terminator is stripped
fn fill_line(line: &mut Vec<u8>, input: &[u8]) -> Result<(usize, bool), FramingError> {
    let (used, complete) = match input.iter().position(|&b| b == b'\n') {
        Some(pos) => (pos + 1, true),
        None => (input.len(), false),
    };
    line.extend_from_slice(&input[..used]);
    if line.len() > MAX_LINE_LENGTH + 2 {
        return Err(FramingError::LineTooLong(MAX_LINE_LENGTH));
    }

    if complete {
        line.pop();
        if line.pop() != Some(b'\r') {
            return Err(FramingError::InvalidCrlf);
        }
    }
    Ok((used, complete))
}

/// Parse `1a;name=value` into 26
pub fn parse_chunk_size(line: &[u8]) -> Result<u64, FramingError> {
    let text = String::from_utf8_lossy(line);
    let size = text.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FramingError::InvalidChunkSize(text.into_owned()));
    }
    u64::from_str_radix(size, 16).map_err(|_| FramingError::InvalidChunkSize(text.into_owned()))
}

/// Parse a `Content-Length` header value
pub fn parse_content_length(value: &str) -> Result<u64, FramingError> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FramingError::InvalidContentLength(value.to_string()));
    }
    value
        .parse()
        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))
}
