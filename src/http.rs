use core::fmt;
use std::{cmp, io, str};

use hyper::body::HttpBody;
use serde::de::DeserializeOwned;

use crate::error::ServeError;

pub use hyper::body::Bytes;

/// An HTTP request with its body already buffered.
///
/// Handlers are plain synchronous functions, so the server collects the whole
/// body before the request reaches the router.
pub type Request = hyper::Request<Body>;

/// An HTTP response as produced by the router.
pub type Response = hyper::Response<hyper::Body>;

/// A builder for responses returned directly from a [`Service`](crate::Service).
///
/// ```rust
/// use bitroute::ResponseBuilder;
///
/// let response = ResponseBuilder::new()
///     .status(404)
///     .header("X-Custom-Foo", "Bar")
///     .body(bitroute::hyper::Body::from("Page not found."))
///     .unwrap();
/// ```
pub type ResponseBuilder = hyper::http::response::Builder;

/// A buffered request body.
///
/// # Examples
///
/// ```rust
/// # use bitroute::Body;
/// # use std::io::Read;
/// let body = Body::new(r#"{"name": "Tom"}"#);
///
/// let mut text = String::new();
/// body.reader().read_to_string(&mut text).unwrap();
/// assert_eq!(text, r#"{"name": "Tom"}"#);
///
/// let values: std::collections::HashMap<String, String> = body.json().unwrap();
/// assert_eq!(values["name"], "Tom");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Body(Bytes);

impl Body {
    /// Create a body from a string or bytes.
    pub fn new(data: impl Into<Bytes>) -> Body {
        Body(data.into())
    }

    /// Create an empty body.
    pub fn empty() -> Body {
        Body(Bytes::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Views the body as UTF-8 text.
    pub fn text(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.0)
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.0)
    }

    /// Creates a [`BodyReader`] that implements [`std::io::Read`].
    ///
    /// Useful for APIs that consume a reader, such as `serde_json::from_reader`.
    pub fn reader(&self) -> BodyReader {
        BodyReader {
            remaining: self.0.clone(),
        }
    }

    /// Collects a streaming hyper body, refusing anything over `limit` bytes.
    pub(crate) async fn collect(mut body: hyper::Body, limit: usize) -> Result<Body, ServeError> {
        if let Some(declared) = body.size_hint().upper() {
            if declared > limit as u64 {
                return Err(ServeError::PayloadTooLarge { limit });
            }
        }

        let mut buf = Vec::new();
        while let Some(chunk) = body.data().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > limit {
                return Err(ServeError::PayloadTooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(Body(Bytes::from(buf)))
    }
}

impl<T> From<T> for Body
where
    Bytes: From<T>,
{
    fn from(data: T) -> Body {
        Body::new(data)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Body").field(&self.0).finish()
    }
}

/// A synchronous reader over a [`Body`].
///
/// Cloning the underlying bytes is cheap, so any number of readers can be
/// taken from the same body.
pub struct BodyReader {
    remaining: Bytes,
}

impl io::Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = cmp::min(buf.len(), self.remaining.len());
        let chunk = self.remaining.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}
