use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use mpart_upload::{PipeReader, Transport, UploadError, Uploader};
use std::convert::Infallible;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// What a transport saw of a request
struct Seen {
    method: Method,
    content_type: String,
    content_length: u64,
    body_length_hint: Option<u64>,
    body: Bytes,
}

/// Reads the whole body and answers 200
#[derive(Default)]
struct DrainTransport {
    seen: Mutex<Option<Seen>>,
}

impl DrainTransport {
    fn take(&self) -> Seen {
        self.seen.lock().unwrap().take().expect("transport was not called")
    }
}

impl Transport for DrainTransport {
    type Body = ();
    type Error = io::Error;

    async fn send(&self, request: Request<PipeReader>) -> Result<Response<()>, io::Error> {
        let (head, mut reader) = request.into_parts();

        let mut body = BytesMut::new();
        while let Some(chunk) = reader.next().await {
            body.extend_from_slice(&chunk?);
        }

        let header = |name: http::header::HeaderName| {
            head.headers
                .get(name)
                .and_then(|val| val.to_str().ok())
                .map(str::to_owned)
                .unwrap_or_default()
        };

        *self.seen.lock().unwrap() = Some(Seen {
            method: head.method.clone(),
            content_type: header(CONTENT_TYPE),
            content_length: header(CONTENT_LENGTH).parse().unwrap(),
            body_length_hint: reader.content_length(),
            body: body.freeze(),
        });

        Ok(Response::new(()))
    }
}

/// Records whether a request reached it
#[derive(Default)]
struct NeverTransport {
    called: AtomicBool,
}

impl Transport for NeverTransport {
    type Body = ();
    type Error = io::Error;

    async fn send(&self, _request: Request<PipeReader>) -> Result<Response<()>, io::Error> {
        self.called.store(true, Ordering::SeqCst);
        Ok(Response::new(()))
    }
}

/// Reads one chunk, then hangs up
struct AbortTransport;

impl Transport for AbortTransport {
    type Body = ();
    type Error = io::Error;

    async fn send(&self, request: Request<PipeReader>) -> Result<Response<()>, io::Error> {
        let mut reader = request.into_body();
        reader.next().await;
        drop(reader);

        Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"))
    }
}

/// Answers straight away and keeps the unread body alive
#[derive(Default)]
struct EarlyResponseTransport {
    stash: Mutex<Option<PipeReader>>,
}

impl Transport for EarlyResponseTransport {
    type Body = ();
    type Error = io::Error;

    async fn send(&self, request: Request<PipeReader>) -> Result<Response<()>, io::Error> {
        *self.stash.lock().unwrap() = Some(request.into_body());

        let mut response = Response::new(());
        *response.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
        Ok(response)
    }
}

/// Truncates a file after it was measured, then drains the body and fails on a
/// body error the way an HTTP client does
struct TruncateTransport<'a> {
    path: &'a Path,
}

impl Transport for TruncateTransport<'_> {
    type Body = ();
    type Error = io::Error;

    async fn send(&self, request: Request<PipeReader>) -> Result<Response<()>, io::Error> {
        OpenOptions::new().write(true).open(self.path)?.set_len(1)?;

        let mut reader = request.into_body();
        while let Some(chunk) = reader.next().await {
            chunk?;
        }

        Ok(Response::new(()))
    }
}

async fn parse(content_type: &str, body: Bytes) -> Vec<(String, Option<String>, Bytes)> {
    let boundary = multer::parse_boundary(content_type).unwrap();
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap().to_owned();
        let file_name = field.file_name().map(str::to_owned);
        let data = field.bytes().await.unwrap();
        fields.push((name, file_name, data));
    }

    fields
}

fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn writes_fields() {
    let mut uploader = Uploader::with_boundary("AaB03x");
    uploader.add_field("name1", "value1").add_field("name2", "value2");

    let transport = DrainTransport::default();
    uploader
        .post_with(&transport, "http://localhost/upload")
        .await
        .unwrap();

    let seen = transport.take();

    let input: &[u8] = b"--AaB03x\r\n\
            Content-Disposition: form-data; name=\"name1\"\r\n\
            \r\n\
            value1\r\n\
            --AaB03x\r\n\
            Content-Disposition: form-data; name=\"name2\"\r\n\
            \r\n\
            value2\r\n\
            --AaB03x--\r\n";

    assert_eq!(&seen.body[..], input);
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.content_type, "multipart/form-data; boundary=AaB03x");
    assert_eq!(seen.content_length, input.len() as u64);
}

#[tokio::test]
async fn writes_fields_and_files() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "test.txt", b"Lorem Ipsum\n");

    let mut uploader = Uploader::with_boundary("AaB03x");
    uploader.add_files("file", [&file]).unwrap();
    uploader.add_field("name1", "value1");

    let transport = DrainTransport::default();
    uploader
        .post_with(&transport, "http://localhost/upload")
        .await
        .unwrap();

    // fields always go before files
    let input: &[u8] = b"--AaB03x\r\n\
            Content-Disposition: form-data; name=\"name1\"\r\n\
            \r\n\
            value1\r\n\
            --AaB03x\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"test.txt\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            Lorem Ipsum\n\r\n\
            --AaB03x--\r\n";

    assert_eq!(&transport.take().body[..], input);
}

#[tokio::test]
async fn writes_empty_form() {
    let uploader = Uploader::with_boundary("AaB03x");

    let transport = DrainTransport::default();
    uploader
        .post_with(&transport, "http://localhost/upload")
        .await
        .unwrap();

    let seen = transport.take();
    assert_eq!(&seen.body[..], b"--AaB03x--\r\n");
    assert_eq!(seen.content_length, 12);
}

#[tokio::test]
async fn declared_length_matches_body() {
    let dir = TempDir::new().unwrap();
    let image: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();

    let files = [
        write_file(&dir, "image01.jpg", &image),
        write_file(&dir, "file01.txt", b"first"),
        write_file(&dir, "conflict/file01.txt", b"second"),
        write_file(&dir, "empty.pdf", b""),
    ];

    let mut uploader = Uploader::new();
    uploader
        .add_field("id", "File and custom files")
        .add_field("description", "Custom information");
    uploader.add_files("files", &files).unwrap();
    uploader.set_chunk_size(1000).unwrap();

    let transport = DrainTransport::default();
    uploader
        .post_with(&transport, "http://localhost/upload")
        .await
        .unwrap();

    let seen = transport.take();

    let file_bytes = image.len() as u64 + 5 + 6;

    assert_eq!(seen.body.len() as u64, seen.content_length);
    assert_eq!(seen.body_length_hint, Some(seen.content_length));
    assert!(seen.content_length > file_bytes);
}

#[tokio::test]
async fn round_trips_through_a_parser() {
    let dir = TempDir::new().unwrap();
    let image: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();

    let files = [
        write_file(&dir, "image01.jpg", &image),
        write_file(&dir, "file01.txt", b"first"),
        write_file(&dir, "conflict/file01.txt", b"second"),
    ];

    let mut uploader = Uploader::new();
    uploader
        .add_field("id", "Field-only-upload")
        .add_field("id", "Second ID")
        .add_field("time", "2020-01-01T00:00:00Z");
    uploader.add_files("files", &files).unwrap();
    uploader.set_chunk_size(4096).unwrap();

    let transport = DrainTransport::default();
    uploader
        .put_with(&transport, "http://localhost/upload")
        .await
        .unwrap();

    let seen = transport.take();
    assert_eq!(seen.method, Method::PUT);

    let fields = parse(&seen.content_type, seen.body).await;

    let names: Vec<_> = fields
        .iter()
        .map(|(name, file_name, _)| (name.as_str(), file_name.as_deref()))
        .collect();

    assert_eq!(
        names,
        vec![
            ("id", None),
            ("id", None),
            ("time", None),
            ("files", Some("image01.jpg")),
            ("files", Some("file01.txt")),
            ("files", Some("_001_file01.txt")),
        ]
    );

    assert_eq!(&fields[0].2[..], b"Field-only-upload");
    assert_eq!(&fields[1].2[..], b"Second ID");
    assert_eq!(&fields[3].2[..], &image[..]);
    assert_eq!(&fields[4].2[..], b"first");
    assert_eq!(&fields[5].2[..], b"second");
}

#[tokio::test]
async fn chunk_size_does_not_change_the_body() {
    let dir = TempDir::new().unwrap();
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 13) as u8).collect();
    let file = write_file(&dir, "data.bin", &data);

    let mut bodies = Vec::new();

    for chunk_size in [1, 7, 4096, 1 << 20] {
        let mut uploader = Uploader::with_boundary("AaB03x");
        uploader.add_files("file", [&file]).unwrap();
        uploader.set_chunk_size(chunk_size).unwrap();

        let transport = DrainTransport::default();
        uploader
            .post_with(&transport, "http://localhost/upload")
            .await
            .unwrap();

        bodies.push(transport.take().body);
    }

    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn missing_file_never_reaches_transport() {
    let dir = TempDir::new().unwrap();
    let present = write_file(&dir, "file01.txt", b"first");

    let mut uploader = Uploader::new();
    uploader
        .add_files("files", [present, dir.path().join("doesnotexist.txt")])
        .unwrap();

    let transport = NeverTransport::default();
    let err = uploader
        .post_with(&transport, "http://localhost/upload")
        .await
        .unwrap_err();

    assert!(
        matches!(err, UploadError::Open { ref path, .. } if path.ends_with("doesnotexist.txt"))
    );
    assert!(!transport.called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn transport_abort_stops_the_producer() {
    let dir = TempDir::new().unwrap();
    let big = vec![0u8; 4 * 1024 * 1024];
    let file = write_file(&dir, "big.bin", &big);

    let mut uploader = Uploader::new();
    uploader.add_files("file", [&file]).unwrap();
    uploader.set_chunk_size(1024).unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        uploader.post_with(&AbortTransport, "http://localhost/upload"),
    )
    .await
    .expect("submission should not hang");

    match result {
        Err(UploadError::Transport(err)) => assert_eq!(err.to_string(), "connection reset"),
        other => panic!("Expected a transport error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn early_response_closes_the_pipe() {
    let dir = TempDir::new().unwrap();
    let big = vec![0u8; 1024 * 1024];
    let file = write_file(&dir, "big.bin", &big);

    let mut uploader = Uploader::new();
    uploader.add_files("file", [&file]).unwrap();
    uploader.set_chunk_size(1024).unwrap();

    let transport = EarlyResponseTransport::default();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        uploader.post_with(&transport, "http://localhost/upload"),
    )
    .await
    .expect("submission should not hang");

    assert!(matches!(result, Err(UploadError::PipeClosed)));
    assert!(transport.stash.lock().unwrap().is_some());
}

#[tokio::test]
async fn size_change_wins_over_transport_error() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "shrinks.txt", b"0123456789");

    let mut uploader = Uploader::new();
    uploader.add_files("file", [&file]).unwrap();

    let transport = TruncateTransport { path: &file };
    let err = uploader
        .post_with(&transport, "http://localhost/upload")
        .await
        .unwrap_err();

    match err {
        UploadError::SizeMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, 10);
            assert_eq!(actual, 1);
        }
        other => panic!("Expected a size mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_url_is_a_request_error() {
    let uploader = Uploader::new();

    let transport = NeverTransport::default();
    let err = uploader
        .post_with(&transport, "not a url")
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Request(_)));
    assert!(!transport.called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn uploader_can_submit_twice() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "test.txt", b"Lorem Ipsum\n");

    let mut uploader = Uploader::with_boundary("AaB03x");
    uploader.add_field("id", "1");
    uploader.add_files("file", [&file]).unwrap();

    let first = DrainTransport::default();
    let second = DrainTransport::default();

    uploader
        .post_with(&first, "http://localhost/upload")
        .await
        .unwrap();
    uploader
        .post_with(&second, "http://localhost/upload")
        .await
        .unwrap();

    assert_eq!(first.take().body, second.take().body);
}

async fn upload_in_background<T>(uploader: Uploader, transport: T) -> Result<(), UploadError>
where
    T: Transport + Send + Sync + 'static,
{
    tokio::spawn(async move {
        uploader
            .post_with(&transport, "http://localhost/upload")
            .await
            .map(|_| ())
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn submission_can_be_spawned_for_any_transport() {
    let mut uploader = Uploader::with_boundary("AaB03x");
    uploader.add_field("id", "1");

    upload_in_background(uploader, DrainTransport::default())
        .await
        .unwrap();
}
