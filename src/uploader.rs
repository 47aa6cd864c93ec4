use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Request, Response};
use log::{debug, warn};
use std::collections::HashSet;
use std::path::Path;

use crate::encoder::MultipartEncoder;
use crate::error::{Result, UploadError};
use crate::part::{EndPart, FieldPart, FileEntry, FilePart, Part};
use crate::pipe::{pipe, PipeWriter, PIPE_DEPTH};
use crate::transport::Transport;

/// Size of the buffer used to copy file content into the body
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024;

/// How many `_NNN_` prefixed names are tried before a filename is rejected
pub const MAX_NAME_COLLISIONS: usize = 999;

/// The main `Uploader` struct for sending multipart/form-data submissions to servers
///
/// Fields and files are recorded up front.  On submission every file is
/// opened and measured so the exact `Content-Length` is known, then the body is
/// written by a background task into a pipe which the transport reads from, so
/// file content is never held in memory as a whole.
///
/// ```no_run
/// # use mpart_upload::Uploader;
/// # #[tokio::main]
/// # async fn main() -> mpart_upload::Result<()> {
/// let mut uploader = Uploader::new();
///
/// uploader.add_field("id", "1234");
/// uploader.add_files("files", ["Cargo.toml", "README.md"])?;
///
/// let response = uploader.post("http://localhost:3000/upload").await?;
/// println!("Status: {}", response.status());
/// # Ok(())
/// # }
/// ```
pub struct Uploader {
    chunk_size: usize,
    boundary: Option<String>,
    fields: Vec<FieldPart>,
    files: Vec<FileEntry>,
}

impl Uploader {
    /// Construct an empty Uploader which generates a random boundary for every submission
    pub fn new() -> Self {
        Uploader {
            chunk_size: DEFAULT_CHUNK_SIZE,
            boundary: None,
            fields: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Construct an empty Uploader which always uses the given boundary
    pub fn with_boundary<I: Into<String>>(boundary: I) -> Self {
        Uploader {
            boundary: Some(boundary.into()),
            ..Uploader::new()
        }
    }

    /// Add a Field to the form
    pub fn add_field<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) -> &mut Self {
        self.fields.push(FieldPart::new(name, value));
        self
    }

    /// Add every `(name, value)` pair to the form, in iteration order
    pub fn add_fields<I, N, V>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        for (name, value) in fields {
            self.add_field(name, value);
        }
        self
    }

    /// Values of every field called `name`, in the order they were added
    pub fn fields(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|field| field.name() == name)
            .map(|field| field.value())
            .collect()
    }

    /// Add files to the form under `field_name`
    ///
    /// Paths are made absolute but not opened.  Within one call, files sharing a
    /// base name are renamed `_001_name`, `_002_name` and so on.  Stops at the
    /// first path that cannot be resolved; files added before it are kept.
    pub fn add_files<N, I, P>(&mut self, field_name: N, paths: I) -> Result<&mut Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let field_name = field_name.into();
        let mut base_names = HashSet::new();

        for path in paths {
            let path = path.as_ref();

            let path = std::path::absolute(path).map_err(|source| UploadError::AbsolutePath {
                path: path.to_path_buf(),
                source,
            })?;

            let base_name = path
                .file_name()
                .ok_or_else(|| UploadError::NoFileName(path.clone()))?
                .to_string_lossy()
                .into_owned();

            let display_name = unique_name(&mut base_names, &base_name)?;

            debug!("Adding file {:?} as `{}`", path, display_name);
            self.files.push(FileEntry::new(field_name.clone(), path, display_name));
        }

        Ok(self)
    }

    /// Absolute paths of every file added, in the order they were added
    pub fn files(&self) -> Vec<&Path> {
        self.files.iter().map(|entry| entry.path()).collect()
    }

    /// Set the size of the buffer used to copy file content. Must be positive
    pub fn set_chunk_size(&mut self, size: usize) -> Result<&mut Self> {
        if size == 0 {
            return Err(UploadError::InvalidChunkSize(size));
        }
        self.chunk_size = size;
        Ok(self)
    }

    /// Size of the buffer used to copy file content
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// POST the form using the default transport
    #[cfg(feature = "client")]
    pub async fn post(&self, url: &str) -> Result<Response<hyper::body::Incoming>> {
        self.post_with(&crate::transport::HyperTransport::new(), url).await
    }

    /// PUT the form using the default transport
    #[cfg(feature = "client")]
    pub async fn put(&self, url: &str) -> Result<Response<hyper::body::Incoming>> {
        self.put_with(&crate::transport::HyperTransport::new(), url).await
    }

    /// POST the form using the given transport
    pub async fn post_with<T: Transport>(
        &self,
        transport: &T,
        url: &str,
    ) -> Result<Response<T::Body>> {
        self.submit(Method::POST, url, transport).await
    }

    /// PUT the form using the given transport
    pub async fn put_with<T: Transport>(
        &self,
        transport: &T,
        url: &str,
    ) -> Result<Response<T::Body>> {
        self.submit(Method::PUT, url, transport).await
    }

    /// Send the form to `url`
    ///
    /// Every file is opened and measured before the transport is called, so a
    /// missing file fails here without any network I/O.  Errors raised while
    /// writing the body are returned after the transport finishes.  A transport
    /// error wins, unless the transport was handed the body error and failed
    /// on it, in which case the body error is returned.
    pub async fn submit<T: Transport>(
        &self,
        method: Method,
        url: &str,
        transport: &T,
    ) -> Result<Response<T::Body>> {
        let mut encoder = match self.boundary {
            Some(ref boundary) => MultipartEncoder::new(boundary.as_str()),
            None => MultipartEncoder::default(),
        };

        let mut parts = self.parts();

        let content_length = match prepare_parts(&mut parts, &mut encoder).await {
            Ok(length) => length,
            Err(err) => {
                release_all(&mut parts);
                return Err(err);
            }
        };

        debug!(
            "Prepared {} parts, content length: {}",
            parts.len(),
            content_length
        );

        let (writer, reader) = pipe(PIPE_DEPTH);
        let reader = reader.with_length(content_length);
        let closer = reader.closer();

        let request = Request::builder()
            .method(method)
            .uri(url)
            .header(CONTENT_TYPE, encoder.content_type())
            .header(CONTENT_LENGTH, content_length)
            .body(reader);

        let request = match request {
            Ok(request) => request,
            Err(err) => {
                release_all(&mut parts);
                return Err(err.into());
            }
        };

        let producer = tokio::spawn(produce(parts, writer, self.chunk_size));

        let response = transport
            .send(request)
            .await
            .map_err(UploadError::transport);

        // a producer still waiting on the pipe has no reader left
        closer.close();
        let produced = producer.await;

        match (response, produced) {
            (_, Ok(Produced::Delivered(err))) => Err(err),
            (Err(err), _) => Err(err),
            (Ok(_), Err(join_err)) => Err(join_err.into()),
            (Ok(_), Ok(Produced::Failed(err))) => Err(err),
            (Ok(response), Ok(Produced::Done)) => Ok(response),
        }
    }

    fn parts(&self) -> Vec<Part> {
        let mut parts = Vec::with_capacity(self.fields.len() + self.files.len() + 1);

        parts.extend(self.fields.iter().cloned().map(Part::Field));
        parts.extend(
            self.files
                .iter()
                .cloned()
                .map(|entry| Part::File(FilePart::new(entry))),
        );
        parts.push(Part::End(EndPart::new()));

        parts
    }
}

impl Default for Uploader {
    fn default() -> Self {
        Uploader::new()
    }
}

fn unique_name(taken: &mut HashSet<String>, base_name: &str) -> Result<String> {
    if taken.insert(base_name.to_owned()) {
        return Ok(base_name.to_owned());
    }

    for n in 1..=MAX_NAME_COLLISIONS {
        let candidate = format!("_{:03}_{}", n, base_name);
        if taken.insert(candidate.clone()) {
            return Ok(candidate);
        }
    }

    Err(UploadError::NameCollision(base_name.to_owned()))
}

async fn prepare_parts(parts: &mut [Part], encoder: &mut MultipartEncoder) -> Result<u64> {
    let mut total = 0;

    for part in parts.iter_mut() {
        total += part.prepare(encoder).await?;
    }

    Ok(total)
}

fn release_all(parts: &mut [Part]) {
    for part in parts.iter_mut() {
        part.release();
    }
}

/// How the producer task ended
enum Produced {
    Done,
    /// Stopped on an error which was passed on to the reader
    Delivered(UploadError),
    /// Stopped on an error after the reader was gone
    Failed(UploadError),
}

async fn produce(mut parts: Vec<Part>, mut writer: PipeWriter, chunk_size: usize) -> Produced {
    let mut chunk = vec![0u8; chunk_size];
    let mut result = Ok(());

    for part in parts.iter_mut() {
        if let Err(err) = part.stream(&mut chunk, &mut writer).await {
            result = Err(err);
            break;
        }
    }

    release_all(&mut parts);

    match result {
        Ok(()) => {
            debug!(
                "No bytes to write, finished stream, total bytes:{}",
                writer.written()
            );
            Produced::Done
        }
        Err(err) => {
            warn!(
                "Stopped writing body after {} bytes: {}",
                writer.written(),
                err
            );
            if writer.close_with_error(&err).await {
                Produced::Delivered(err)
            } else {
                Produced::Failed(err)
            }
        }
    }
}
