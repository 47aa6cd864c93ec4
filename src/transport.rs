//! The HTTP client seam
use http::{Request, Response};
use std::error::Error as StdError;
use std::future::Future;

use crate::pipe::PipeReader;

/// An HTTP client able to send a request whose body is read from a [`PipeReader`]
///
/// The transport must read the body until it ends or fails, and return once
/// a response has been received.  Non-2xx statuses are responses, not errors:
/// only failures to complete the exchange should be returned as `Err`.
///
/// The returned future must be `Send` so submissions can be spawned onto a
/// multi-threaded runtime.
pub trait Transport {
    /// The body type of returned responses
    type Body: Send;
    /// The error returned when the exchange fails
    type Error: Into<Box<dyn StdError + Send + Sync + 'static>>;

    /// Send the request and wait for the response
    fn send(
        &self,
        request: Request<PipeReader>,
    ) -> impl Future<Output = Result<Response<Self::Body>, Self::Error>> + Send;
}

#[cfg(feature = "client")]
pub use self::hyper_client::HyperTransport;

#[cfg(feature = "client")]
mod hyper_client {
    use http::{Request, Response};
    use hyper::body::Incoming;
    use hyper_util::client::legacy::{connect::HttpConnector, Client, Error};
    use hyper_util::rt::TokioExecutor;
    use std::future::Future;

    use super::Transport;
    use crate::pipe::PipeReader;

    /// The default transport, a plain HTTP/1 hyper client
    #[derive(Clone)]
    pub struct HyperTransport {
        client: Client<HttpConnector, PipeReader>,
    }

    impl HyperTransport {
        /// Construct a transport with a fresh connection pool
        pub fn new() -> Self {
            HyperTransport {
                client: Client::builder(TokioExecutor::new()).build_http(),
            }
        }

        /// Wrap an existing, possibly customised, client
        pub fn from_client(client: Client<HttpConnector, PipeReader>) -> Self {
            HyperTransport { client }
        }
    }

    impl Default for HyperTransport {
        fn default() -> Self {
            HyperTransport::new()
        }
    }

    impl Transport for HyperTransport {
        type Body = Incoming;
        type Error = Error;

        fn send(
            &self,
            request: Request<PipeReader>,
        ) -> impl Future<Output = Result<Response<Incoming>, Error>> + Send {
            self.client.request(request)
        }
    }
}
