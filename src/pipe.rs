//! A bounded in-process pipe connecting the body producer to the transport
//!
//! The write end is owned by the producer task, the read end becomes the body
//! of the outbound request.  Writes suspend while the pipe is full and fail as
//! soon as the read end is dropped or closed, so a producer can never outlive
//! the consumer it is feeding.
use bytes::Bytes;
use futures_core::Stream;
use futures_util::ready;
use http_body::{Body, Frame, SizeHint};
use log::debug;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, UploadError};

/// Number of chunks that can be in flight between producer and consumer
pub const PIPE_DEPTH: usize = 4;

/// Create a pipe holding at most `depth` chunks
pub fn pipe(depth: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let cancel = CancellationToken::new();

    let writer = PipeWriter {
        tx,
        cancel: cancel.clone(),
        written: 0,
    };

    let reader = PipeReader {
        rx,
        cancel,
        length: None,
        read: 0,
    };

    (writer, reader)
}

/// The producing end of a [`pipe`]
///
/// Dropping the writer signals end of stream to the reader.
pub struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    cancel: CancellationToken,
    written: u64,
}

impl PipeWriter {
    /// Hand a chunk to the reader, waiting while the pipe is full
    pub async fn write(&mut self, bytes: Bytes) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let len = bytes.len() as u64;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::PipeClosed),
            sent = self.tx.send(Ok(bytes)) => sent.map_err(|_| UploadError::PipeClosed),
        }?;

        self.written += len;

        Ok(())
    }

    /// Copy a borrowed slice into the pipe
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.write(Bytes::copy_from_slice(data)).await
    }

    /// Total bytes accepted by the pipe so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Close the pipe so the reader observes `err` instead of a clean end of stream
    ///
    /// Returns `false` if the reader was already gone and never sees the error.
    pub async fn close_with_error(self, err: &UploadError) -> bool {
        let err = io::Error::new(io::ErrorKind::Other, err.to_string());

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(Err(err)) => {
                if sent.is_err() {
                    debug!("Reader went away before the error could be delivered");
                }
                sent.is_ok()
            }
        }
    }
}

/// A handle that closes a [`PipeReader`] while the reader itself is owned elsewhere
#[derive(Clone)]
pub struct PipeCloser {
    cancel: CancellationToken,
}

impl PipeCloser {
    /// Close the read end. Pending and future writes fail with `PipeClosed`
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// The consuming end of a [`pipe`], usable as an HTTP request body
pub struct PipeReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    cancel: CancellationToken,
    length: Option<u64>,
    read: u64,
}

impl PipeReader {
    /// Declare the exact number of bytes the writer is going to produce
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// The declared length, if any
    pub fn content_length(&self) -> Option<u64> {
        self.length
    }

    /// Total bytes read from the pipe so far
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// A handle which can close this reader from another owner
    pub fn closer(&self) -> PipeCloser {
        PipeCloser {
            cancel: self.cancel.clone(),
        }
    }

    /// Close the read end, failing any pending write on the other side
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }
}

impl Stream for PipeReader {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "read on closed pipe",
            ))));
        }

        let item = ready!(self.rx.poll_recv(cx));

        if let Some(Ok(ref bytes)) = item {
            self.read += bytes.len() as u64;
        }

        Poll::Ready(item)
    }
}

impl Body for PipeReader {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx)
            .map(|item| item.map(|chunk| chunk.map(Frame::data)))
    }

    fn size_hint(&self) -> SizeHint {
        match self.length {
            Some(length) => SizeHint::with_exact(length.saturating_sub(self.read)),
            None => SizeHint::default(),
        }
    }
}
