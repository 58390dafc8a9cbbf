use std::borrow::Cow;
use std::io::{self, Write};
use std::mem;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::StatusCode;
use serde::Serialize;

use crate::http::{Bytes, Request, Response};
use crate::registry::Param;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// Data accepted by [`Control::write`].
///
/// Text and raw bytes are written as they are. Text that opens with an HTML
/// doctype or `<html>` tag defaults to `text/html`, other text to
/// `text/plain`. Anything wrapped in [`Json`] (or a `serde_json::Value`) is
/// serialized as JSON.
pub trait Payload {
    /// Encodes the payload, returning the body and its default content type.
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)>;
}

impl Payload for &str {
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)> {
        Ok((Bytes::copy_from_slice(self.as_bytes()), text_type(self)))
    }
}

impl Payload for String {
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)> {
        let content_type = text_type(&self);
        Ok((Bytes::from(self), content_type))
    }
}

impl Payload for &String {
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)> {
        self.as_str().encode()
    }
}

impl Payload for Cow<'_, str> {
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)> {
        self.into_owned().encode()
    }
}

impl Payload for Bytes {
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)> {
        Ok((self, OCTET_STREAM))
    }
}

impl Payload for Vec<u8> {
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)> {
        Ok((Bytes::from(self), OCTET_STREAM))
    }
}

impl Payload for serde_json::Value {
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)> {
        Json(self).encode()
    }
}

/// Marks a value to be written as JSON.
///
/// ```
/// # use bitroute::{Body, Control, Json, Request};
/// #[derive(serde::Serialize)]
/// struct User { name: &'static str }
///
/// let mut c = Control::new(Request::new(Body::empty()));
/// c.write(Json(User { name: "Tom" }));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Json<T>(pub T);

impl<T: Serialize> Payload for Json<T> {
    fn encode(self) -> serde_json::Result<(Bytes, &'static str)> {
        serde_json::to_vec(&self.0).map(|content| (Bytes::from(content), APPLICATION_JSON))
    }
}

/// What the first [`Control::write`] committed.
struct Sent {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// The per-request context handed to every handler.
///
/// It carries the request, the params captured by the route, the pending
/// status code and the response headers. The response is finalized by the
/// first call to [`write`](Control::write); later calls are ignored.
pub struct Control {
    request: Arc<Request>,
    params: Vec<Param>,
    headers: HeaderMap,
    code: u16,
    sent: Option<Sent>,
}

impl Control {
    /// Creates a control for a request that did not come through a router,
    /// e.g. to exercise a handler in isolation.
    pub fn new(request: Request) -> Self {
        Self::with_shared(Arc::new(request))
    }

    pub(crate) fn with_shared(request: Arc<Request>) -> Self {
        Self {
            request,
            params: Vec::new(),
            headers: HeaderMap::new(),
            code: 0,
            sent: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Looks up `key` among the captured params first, then in the URL query
    /// string. Returns an empty string when neither has it.
    ///
    /// Route params keep their marker, so `query(":name")` reads the path
    /// while `query("name")` reads `?name=`.
    pub fn query(&self, key: &str) -> String {
        if let Some(param) = self.params.iter().find(|param| param.key == key) {
            return param.value.clone();
        }

        self.request
            .uri()
            .query()
            .and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| value.into_owned())
            })
            .unwrap_or_default()
    }

    /// Appends a param. The first param with a given key wins on lookup.
    pub fn param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.push(Param::new(key, value));
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Response headers.
    pub fn header(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers. Changes made after the first write are not
    /// sent.
    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Sets the pending status code. Values outside `100..600` are ignored.
    pub fn code(&mut self, code: u16) {
        if (100..600).contains(&code) {
            self.code = code;
        }
    }

    /// The status code set by [`code`](Control::code), `0` if none.
    pub fn get_code(&self) -> u16 {
        self.code
    }

    /// Whether the response has already been written.
    pub fn is_written(&self) -> bool {
        self.sent.is_some()
    }

    /// Writes the pending status, the headers and `data` as the response.
    ///
    /// JSON payloads get `Content-Type: application/json` unless a content
    /// type is already set. When the request accepts gzip the body is
    /// compressed and `Content-Encoding: gzip` is added. A payload that fails
    /// to serialize turns the response into a 500 carrying the error text.
    pub fn write<P: Payload>(&mut self, data: P) {
        if self.sent.is_some() {
            log::warn!("response for {} already written, ignoring", self.request.uri().path());
            return;
        }

        let (content, content_type) = match data.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                self.fail(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
                return;
            }
        };

        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        let content = if self.accepts_gzip() {
            match gzip(&content) {
                Ok(compressed) => {
                    self.headers
                        .append(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    compressed
                }
                Err(err) => {
                    log::error!("gzip encoding failed, sending identity body: {}", err);
                    content
                }
            }
        } else {
            content
        };

        let status = self.pending_status();
        self.commit(status, content);
    }

    /// Writes a plain-text error response, bypassing content negotiation.
    pub(crate) fn fail(&mut self, status: StatusCode, message: &str) {
        if self.sent.is_some() {
            return;
        }
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        self.headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        let mut body = String::with_capacity(message.len() + 1);
        body.push_str(message);
        body.push('\n');
        self.commit(status, Bytes::from(body));
    }

    /// Converts the control into the response to send.
    ///
    /// When nothing was written the response is empty and carries the pending
    /// status (200 if none was set).
    pub fn into_response(self) -> Response {
        let (status, headers, body) = match self.sent {
            Some(sent) => (sent.status, sent.headers, hyper::Body::from(sent.body)),
            None => {
                let status = self.pending_status();
                (status, self.headers, hyper::Body::empty())
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Takes the response headers for a replacement control, leaving out
    /// the ones that describe a body already written.
    pub(crate) fn carry_headers(&mut self) -> HeaderMap {
        let mut headers = mem::take(&mut self.headers);
        headers.remove(header::CONTENT_TYPE);
        headers.remove(header::CONTENT_ENCODING);
        headers.remove(header::X_CONTENT_TYPE_OPTIONS);
        headers
    }

    fn commit(&mut self, status: StatusCode, body: Bytes) {
        self.sent = Some(Sent {
            status,
            headers: self.headers.clone(),
            body,
        });
    }

    fn pending_status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK)
    }

    fn accepts_gzip(&self) -> bool {
        self.request
            .headers()
            .get_all(header::ACCEPT_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.contains("gzip"))
    }
}

fn text_type(text: &str) -> &'static str {
    let head = text.trim_start().as_bytes();
    let is_html = ["<!doctype html", "<html"].iter().any(|prefix| {
        head.get(..prefix.len())
            .map_or(false, |start| start.eq_ignore_ascii_case(prefix.as_bytes()))
    });
    if is_html {
        TEXT_HTML
    } else {
        TEXT_PLAIN
    }
}

fn gzip(content: &[u8]) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(content.len() / 2 + 32), Compression::default());
    encoder.write_all(content)?;
    encoder.finish().map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Body;
    use flate2::read::GzDecoder;
    use serde::ser::Error as _;
    use std::io::Read;

    #[derive(Serialize)]
    struct Prm {
        #[serde(rename = "Key")]
        key: &'static str,
        #[serde(rename = "Value")]
        value: &'static str,
    }

    const PARAMS: [(&str, &str); 3] = [("name", "John"), ("age", "32"), ("gender", "M")];
    const PARAMS_JSON: &str =
        r#"[{"Key":"name","Value":"John"},{"Key":"age","Value":"32"},{"Key":"gender","Value":"M"}]"#;

    fn prms() -> Vec<Prm> {
        PARAMS.iter().map(|&(key, value)| Prm { key, value }).collect()
    }

    fn control(uri: &str) -> Control {
        Control::new(hyper::Request::builder().uri(uri).body(Body::empty()).unwrap())
    }

    fn gzip_control() -> Control {
        Control::new(
            hyper::Request::builder()
                .uri("/")
                .header("Accept-Encoding", "gzip, deflate")
                .body(Body::empty())
                .unwrap(),
        )
    }

    fn body_of(response: Response) -> Bytes {
        futures::executor::block_on(hyper::body::to_bytes(response.into_body())).unwrap()
    }

    /// Tests that params set on a control are returned by `query`.
    #[test]
    fn test_params_query_get() {
        let mut c = control("/");
        for (key, value) in PARAMS {
            c.param(key, value);
        }
        for (key, value) in PARAMS {
            assert_eq!(c.query(key), value);
        }
        assert_eq!(c.query("missing"), "");
    }

    /// Tests that the first param with a given key wins.
    #[test]
    fn test_first_param_wins() {
        let mut c = control("/");
        c.param(":id", "1");
        c.param(":id", "2");
        assert_eq!(c.query(":id"), "1");
    }

    /// Tests that captured params shadow the query string while unmarked keys
    /// read the query string only.
    #[test]
    fn test_query_string_fallback() {
        let mut c = control("/users/Jane/?name=Joe&%3Aname=Query&city=New%20York");
        c.param(":name", "Jane");

        assert_eq!(c.query(":name"), "Jane");
        assert_eq!(c.query("name"), "Joe");
        assert_eq!(c.query("city"), "New York");
        assert_eq!(c.query("country"), "");
    }

    /// Tests that out-of-range status codes leave the pending code untouched.
    #[test]
    fn test_code_range() {
        let mut c = control("/");
        c.code(777);
        assert_eq!(c.get_code(), 0);
        c.code(404);
        assert_eq!(c.get_code(), 404);
        c.code(99);
        c.code(600);
        assert_eq!(c.get_code(), 404);
        c.code(599);
        assert_eq!(c.get_code(), 599);
    }

    /// Tests writing a text body.
    #[test]
    fn test_write_text() {
        let mut c = control("/");
        c.write("Hello");
        let response = c.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], TEXT_PLAIN);
        assert!(response.headers().get("content-encoding").is_none());
        assert_eq!(body_of(response), "Hello");
    }

    /// Tests that HTML documents default to an HTML content type.
    #[test]
    fn test_write_html_text() {
        let mut c = control("/");
        c.write(String::from("<!DOCTYPE html><html><body>Hi</body></html>"));
        assert_eq!(c.into_response().headers()["content-type"], TEXT_HTML);

        let mut c = control("/");
        c.write("  <HTML><body>Hi</body></HTML>");
        assert_eq!(c.into_response().headers()["content-type"], TEXT_HTML);

        let mut c = control("/");
        c.write("<b>not a document</b>");
        assert_eq!(c.into_response().headers()["content-type"], TEXT_PLAIN);
    }

    /// Tests writing a structured body with a pending status.
    #[test]
    fn test_write_json() {
        let mut c = control("/");
        c.code(201);
        c.write(Json(prms()));
        let response = c.into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], APPLICATION_JSON);
        assert_eq!(body_of(response), PARAMS_JSON);
    }

    /// Tests that an explicit content type is preserved.
    #[test]
    fn test_write_keeps_content_type() {
        let mut c = control("/");
        c.header_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/vnd.api+json"));
        c.write(Json(prms()));
        let response = c.into_response();

        assert_eq!(response.headers()["content-type"], "application/vnd.api+json");
    }

    /// Tests gzip negotiation: the body decompresses to the JSON encoding.
    #[test]
    fn test_write_gzip() {
        let mut c = gzip_control();
        c.code(202);
        c.write(Json(prms()));
        let response = c.into_response();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["content-encoding"], "gzip");
        assert_eq!(response.headers()["content-type"], APPLICATION_JSON);

        let compressed = body_of(response);
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, PARAMS_JSON);
    }

    /// Tests that a serialization failure becomes a 500 with the error text.
    #[test]
    fn test_write_serialization_failure() {
        struct Broken;

        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(S::Error::custom("broken value"))
            }
        }

        let mut c = gzip_control();
        c.code(200);
        c.write(Json(Broken));
        let response = c.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("content-encoding").is_none());
        let body = body_of(response);
        assert!(String::from_utf8_lossy(&body).contains("broken value"));
    }

    /// Tests that only the first write reaches the response.
    #[test]
    fn test_write_once() {
        let mut c = control("/");
        c.code(200);
        c.write("first");
        assert!(c.is_written());
        c.code(500);
        c.header_mut().insert("x-late", HeaderValue::from_static("1"));
        c.write("second");
        let response = c.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-late").is_none());
        assert_eq!(body_of(response), "first");
    }

    /// Tests that a status set without a body is still sent.
    #[test]
    fn test_code_without_write() {
        let mut c = control("/");
        c.header_mut().insert("test", HeaderValue::from_static("value"));
        c.code(204);
        let response = c.into_response();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["test"], "value");
        assert!(body_of(response).is_empty());
    }

    /// Tests that the request is reachable from the control.
    #[test]
    fn test_request_access() {
        let c = Control::new(
            hyper::Request::builder()
                .method("POST")
                .uri("/users")
                .body(Body::new(r#"{"name": "Tom"}"#))
                .unwrap(),
        );
        assert_eq!(c.request().method(), hyper::Method::POST);
        let values: std::collections::HashMap<String, String> = c.request().body().json().unwrap();
        assert_eq!(values["name"], "Tom");
    }
}
