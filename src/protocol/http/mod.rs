//! HTTP/1.x framing
//!
//! Splits a byte stream into messages (or bounded message parts) and writes them back.

mod framing;
mod message;
mod reader;
mod writer;

pub use framing::{
    parse_chunk_size, parse_content_length, BodyDecoder, BodyFraming, FramingError, Step, MAX_LINE_LENGTH,
};
pub use message::{HttpHead, HttpMessage, CHUNK_TAG, LAST_CHUNK_TAG};
pub use reader::HttpReader;
pub use writer::HttpWriter;
