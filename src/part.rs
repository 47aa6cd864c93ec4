//! The field, file and end parts a body is assembled from
use bytes::Bytes;
use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::encoder::MultipartEncoder;
use crate::error::{Result, UploadError};
use crate::pipe::PipeWriter;

/// One unit of a multipart body, streamed in the order it was prepared
///
/// Every part is prepared once against a shared [`MultipartEncoder`], which
/// fixes its framing and its exact length, and is then streamed into the
/// request body.
pub enum Part {
    /// A literal text field
    Field(FieldPart),
    /// Content streamed from a file on disk
    File(FilePart),
    /// The closing boundary
    End(EndPart),
}

impl Part {
    /// Frame this part and return the number of bytes it will stream
    pub async fn prepare(&mut self, encoder: &mut MultipartEncoder) -> Result<u64> {
        match self {
            Part::Field(field) => field.prepare(encoder),
            Part::File(file) => file.prepare(encoder).await,
            Part::End(end) => end.prepare(encoder),
        }
    }

    /// Write this part into `writer`, using `chunk` as the copy buffer for file content
    pub async fn stream(&mut self, chunk: &mut [u8], writer: &mut PipeWriter) -> Result<()> {
        match self {
            Part::Field(field) => {
                debug!("Writing Field: {}", &field.name);
                writer.write(field.framed.clone()).await
            }
            Part::File(file) => file.stream(chunk, writer).await,
            Part::End(end) => {
                debug!("Writing Stream Finished");
                writer.write(end.framed.clone()).await
            }
        }
    }

    /// Release any resource held by the part. Safe to call more than once
    pub fn release(&mut self) {
        if let Part::File(file) = self {
            file.release();
        }
    }
}

/// A MultipartField which is part of an upload and used to add a standard text field
#[derive(Clone, Debug)]
pub struct FieldPart {
    name: String,
    value: String,
    framed: Bytes,
}

impl FieldPart {
    /// Construct a new FieldPart given a name and value
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        FieldPart {
            name: name.into(),
            value: value.into(),
            framed: Bytes::new(),
        }
    }

    /// The field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field value
    pub fn value(&self) -> &str {
        &self.value
    }

    fn prepare(&mut self, encoder: &mut MultipartEncoder) -> Result<u64> {
        encoder.write_field(&self.name, &self.value)?;
        self.framed = encoder.take();

        Ok(self.framed.len() as u64)
    }
}

/// A file recorded by `add_files`, not yet opened
#[derive(Clone, Debug)]
pub struct FileEntry {
    field_name: String,
    path: PathBuf,
    display_name: String,
}

impl FileEntry {
    /// `path` should already be absolute
    pub fn new<N, D>(field_name: N, path: PathBuf, display_name: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        FileEntry {
            field_name: field_name.into(),
            path,
            display_name: display_name.into(),
        }
    }

    /// Name of the form field the file is sent under
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Absolute path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The filename sent in `Content-Disposition`
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// File content streamed from disk
///
/// The handle is opened while preparing and held until the part is released.
pub struct FilePart {
    entry: FileEntry,
    content_type: String,
    size: u64,
    prefix: Bytes,
    file: Option<File>,
}

impl FilePart {
    /// Construct an unopened FilePart
    ///
    /// This will guess the Content Type based upon the path (i.e, .jpg will be `image/jpeg`)
    pub fn new(entry: FileEntry) -> Self {
        let content_type = mime_guess::MimeGuess::from_path(&entry.path)
            .first_or_octet_stream()
            .to_string();

        FilePart {
            entry,
            content_type,
            size: 0,
            prefix: Bytes::new(),
            file: None,
        }
    }

    /// The add-time record this part was built from
    pub fn entry(&self) -> &FileEntry {
        &self.entry
    }

    /// The guessed content type
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// File size recorded while preparing
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the part currently holds an open file handle
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    async fn prepare(&mut self, encoder: &mut MultipartEncoder) -> Result<u64> {
        self.release();

        let path = &self.entry.path;

        let file = File::open(path).await.map_err(|source| UploadError::Open {
            path: path.clone(),
            source,
        })?;

        let metadata = file
            .metadata()
            .await
            .map_err(|source| UploadError::Metadata {
                path: path.clone(),
                source,
            })?;

        if !metadata.is_file() {
            return Err(UploadError::Metadata {
                path: path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        self.size = metadata.len();
        self.file = Some(file);

        encoder.write_file_header(
            &self.entry.field_name,
            &self.entry.display_name,
            &self.content_type,
        )?;
        self.prefix = encoder.take();

        Ok(self.prefix.len() as u64 + self.size)
    }

    async fn stream(&mut self, chunk: &mut [u8], writer: &mut PipeWriter) -> Result<()> {
        debug!("Writing File Header for:{}", &self.entry.display_name);
        writer.write(self.prefix.clone()).await?;

        let path = &self.entry.path;
        let expected = self.size;

        let file = self.file.as_mut().ok_or_else(|| UploadError::Read {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::Other, "file part was not prepared"),
        })?;

        let mut copied: u64 = 0;

        loop {
            let read = file.read(chunk).await.map_err(|source| UploadError::Read {
                path: path.clone(),
                source,
            })?;

            if read == 0 {
                break;
            }

            // never push more than the declared length into the body
            if copied + read as u64 > expected {
                return Err(UploadError::SizeMismatch {
                    path: path.clone(),
                    expected,
                    actual: copied + read as u64,
                });
            }

            writer.write_all(&chunk[..read]).await?;
            copied += read as u64;
        }

        if copied != expected {
            return Err(UploadError::SizeMismatch {
                path: path.clone(),
                expected,
                actual: copied,
            });
        }

        debug!("Writing File Body Finished, {} bytes", copied);

        Ok(())
    }

    /// Close the file handle if it is still held
    pub fn release(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed {:?}", &self.entry.path);
        }
    }
}

/// The closing boundary of the body
#[derive(Default)]
pub struct EndPart {
    framed: Bytes,
}

impl EndPart {
    /// Construct an EndPart. Its bytes are produced when prepared
    pub fn new() -> Self {
        EndPart::default()
    }

    fn prepare(&mut self, encoder: &mut MultipartEncoder) -> Result<u64> {
        encoder.finish()?;
        self.framed = encoder.take();

        Ok(self.framed.len() as u64)
    }
}
