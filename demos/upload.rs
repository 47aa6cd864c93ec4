use std::convert::Infallible;
use std::str;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use mpart_upload::Uploader;

async fn handler(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    println!("Handle {:#?}", req);

    if let Ok(body) = req.into_body().collect().await {
        let body = body.to_bytes();
        println!("{}", str::from_utf8(&body).unwrap_or("<binary body>"));
    }

    Ok(Response::new(Full::new(Bytes::from("Ok"))))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Create and spawn http server
    let listener = TcpListener::bind(("127.0.0.1", 3000)).await?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(handler))
                    .await
                {
                    eprintln!("server error: {}", err);
                }
            });
        }
    });

    // Upload `Cargo.toml` with a field alongside it
    let mut uploader = Uploader::new();
    uploader.add_field("foo", "bar");
    uploader.add_files("foofile", ["Cargo.toml"])?;

    let response = uploader.post("http://localhost:3000").await?;

    let body = response.into_body().collect().await?.to_bytes();
    if let Ok(data) = str::from_utf8(&body) {
        println!("Response: {}", data);
    }

    Ok(())
}
