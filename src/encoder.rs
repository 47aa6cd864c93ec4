//! Framing bytes for multipart/form-data bodies
use bytes::{Bytes, BytesMut};
use log::debug;
use rand::{distributions::Alphanumeric, thread_rng, Rng};

use crate::error::{Result, UploadError};

/// Writes multipart/form-data framing into an internal buffer
///
/// The encoder never sees bulk content: parts write their headers here, then
/// drain the buffer with [`take`](#method.take) and stream their payload
/// themselves.  The CRLF that terminates a part's payload is emitted as the
/// start of the next delimiter, so a file's bytes can be streamed between two
/// drains without the encoder knowing its length.
pub struct MultipartEncoder {
    boundary: String,
    buffer: BytesMut,
    started: bool,
    finished: bool,
}

impl MultipartEncoder {
    /// Construct a new encoder with a given boundary
    ///
    /// If you want a boundary generated automatically, then you can use `MultipartEncoder::default()`
    pub fn new<I: Into<String>>(boundary: I) -> Self {
        MultipartEncoder {
            boundary: boundary.into(),
            buffer: BytesMut::new(),
            started: false,
            finished: false,
        }
    }

    /// Gets the boundary for the encoder
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The value to use for the `Content-Type` header of the request
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Number of framing bytes waiting to be drained
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drain everything written since the last call
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    fn write_delimiter(&mut self) -> Result<()> {
        if self.finished {
            return Err(UploadError::EncoderFinished);
        }

        if self.started {
            self.buffer.extend_from_slice(b"\r\n");
        }
        self.started = true;

        self.buffer.extend_from_slice(b"--");
        self.buffer.extend_from_slice(self.boundary.as_bytes());
        self.buffer.extend_from_slice(b"\r\n");

        Ok(())
    }

    /// Write a complete text field
    pub fn write_field(&mut self, name: &str, value: &str) -> Result<()> {
        debug!("Framing Field: {}", name);
        self.write_delimiter()?;

        self.buffer.extend_from_slice(b"Content-Disposition: form-data; name=\"");
        self.buffer.extend_from_slice(escape_quotes(name).as_bytes());
        self.buffer.extend_from_slice(b"\"\r\n");

        self.buffer.extend_from_slice(b"\r\n");

        self.buffer.extend_from_slice(value.as_bytes());

        Ok(())
    }

    /// Write the headers of a file part, leaving the content to the caller
    pub fn write_file_header(
        &mut self,
        name: &str,
        filename: &str,
        content_type: &str,
    ) -> Result<()> {
        debug!("Framing File Header for:{}", filename);
        self.write_delimiter()?;

        self.buffer.extend_from_slice(b"Content-Disposition: form-data; name=\"");
        self.buffer.extend_from_slice(escape_quotes(name).as_bytes());
        self.buffer.extend_from_slice(b"\"; filename=\"");
        self.buffer.extend_from_slice(escape_quotes(filename).as_bytes());
        self.buffer.extend_from_slice(b"\"\r\n");
        self.buffer.extend_from_slice(b"Content-Type: ");
        self.buffer.extend_from_slice(content_type.as_bytes());
        self.buffer.extend_from_slice(b"\r\n");

        self.buffer.extend_from_slice(b"\r\n");

        Ok(())
    }

    /// Write the closing boundary. No more parts can be written afterwards
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(UploadError::EncoderFinished);
        }
        self.finished = true;

        if self.started {
            self.buffer.extend_from_slice(b"\r\n");
        }

        self.buffer.extend_from_slice(b"--");
        self.buffer.extend_from_slice(self.boundary.as_bytes());
        self.buffer.extend_from_slice(b"--\r\n");

        Ok(())
    }
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        MultipartEncoder::new(random_boundary())
    }
}

fn random_boundary() -> String {
    let mut rng = thread_rng();

    (&mut rng)
        .sample_iter(Alphanumeric)
        .take(60)
        .map(char::from)
        .collect()
}

fn escape_quotes(input: &str) -> String {
    input.replace('\\', "\\\\").replace('"', "\\\"")
}
