#![deny(missing_docs)]
//! # Streaming multipart/form-data uploads
//!
//! This crate sends forms made of text fields and files on disk without
//! holding the files in memory, while still declaring an exact
//! `Content-Length` so the request is not chunk encoded.
//!
//! Submitting a form happens in two passes.  The first frames every part and
//! measures every file, adding up the length of the body.  The second runs in
//! a background task which writes the framing and file content, in the same
//! order, into a bounded pipe that the HTTP transport reads as the request
//! body.
//!
//! ## Example
//!
//! ```no_run
//! use mpart_upload::Uploader;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut uploader = Uploader::new();
//!
//! uploader
//!     .add_field("id", "File and custom files")
//!     .add_field("description", "Custom information");
//!
//! uploader.add_files("files", ["image01.jpg", "file01.txt", "conflict/file01.txt"])?;
//!
//! let response = uploader.post("http://localhost:8080/upload").await?;
//!
//! println!("Status: {}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! Any HTTP client can be used by implementing [`Transport`]; the default,
//! available with the `client` feature, is a hyper client.

pub mod encoder;
mod error;
pub mod part;
pub mod pipe;
pub mod transport;
mod uploader;

pub use encoder::MultipartEncoder;
pub use error::{Result, UploadError};
pub use pipe::PipeReader;
#[cfg(feature = "client")]
pub use transport::HyperTransport;
pub use transport::Transport;
pub use uploader::{Uploader, DEFAULT_CHUNK_SIZE, MAX_NAME_COLLISIONS};
