//! The dispatcher: one [`Registry`] per HTTP method plus the hooks that run
//! when a request does not resolve.

use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use hyper::header::{self, HeaderValue};
use hyper::{Method, StatusCode};
use percent_encoding::percent_decode_str;

use crate::control::Control;
use crate::error::{panic_message, Error};
use crate::handler::{Handler, Middleware, SharedHandler};
use crate::http::{Request, Response};
use crate::registry::Registry;
use crate::server::{ConnectionInfo, Server, Service};

/// Maps method and path to handlers.
///
/// Routes are registered through `&mut self` methods; once the router is
/// handed to a [`Server`] it is shared read-only between all workers, so no
/// route can change while requests are in flight.
///
/// ```no_run
/// use bitroute::{Control, Router};
///
/// # async fn run() -> Result<(), bitroute::Error> {
/// let mut router = Router::new();
/// router.get("/hello/:name", |c: &mut Control| {
///     let name = c.query(":name");
///     c.write(format!("Hello {}", name));
/// });
/// router.listen("127.0.0.1:8080").await
/// # }
/// ```
#[derive(Default)]
pub struct Router {
    /// Registries in first-registration order, which is also the order of
    /// the `Allow` header.
    registries: Vec<(Method, Registry)>,
    options_replies: bool,
    not_found: Option<SharedHandler>,
    not_allowed: Option<SharedHandler>,
    recovery: Option<SharedHandler>,
    middleware: Option<Arc<dyn Middleware>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for HTTP GET.
    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> bool {
        self.handle(Method::GET, path, handler)
    }

    /// Registers a handler for HTTP PUT.
    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> bool {
        self.handle(Method::PUT, path, handler)
    }

    /// Registers a handler for HTTP POST.
    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> bool {
        self.handle(Method::POST, path, handler)
    }

    /// Registers a handler for HTTP DELETE.
    pub fn delete<H: Handler>(&mut self, path: &str, handler: H) -> bool {
        self.handle(Method::DELETE, path, handler)
    }

    /// Registers a handler for HTTP HEAD.
    pub fn head<H: Handler>(&mut self, path: &str, handler: H) -> bool {
        self.handle(Method::HEAD, path, handler)
    }

    /// Registers a handler for HTTP OPTIONS.
    pub fn options<H: Handler>(&mut self, path: &str, handler: H) -> bool {
        self.handle(Method::OPTIONS, path, handler)
    }

    /// Registers a handler for HTTP PATCH.
    pub fn patch<H: Handler>(&mut self, path: &str, handler: H) -> bool {
        self.handle(Method::PATCH, path, handler)
    }

    /// Registers a handler for `method` and `path`.
    ///
    /// Returns `false`, and logs a warning, when the pattern is rejected.
    pub fn handle<H: Handler>(&mut self, method: Method, path: &str, handler: H) -> bool {
        let accepted = self.registry_mut(method.clone()).register(path, Arc::new(handler));
        if !accepted {
            log::warn!("rejected route {} {}: pattern is too deep", method, truncate(path));
        }
        accepted
    }

    /// Automatically answers OPTIONS requests for known paths with an empty
    /// 200 and the `Allow` header. Registered OPTIONS handlers still take
    /// priority. Disabled by default.
    pub fn use_options_replies(&mut self, enabled: bool) {
        self.options_replies = enabled;
    }

    /// Handler for paths that no method knows. Defaults to a plain 404.
    pub fn setup_not_found_handler<H: Handler>(&mut self, handler: H) {
        self.not_found = Some(Arc::new(handler));
    }

    /// Handler for paths known to other methods only. Defaults to a plain
    /// 405. The `Allow` header is already set when it runs.
    pub fn setup_not_allowed_handler<H: Handler>(&mut self, handler: H) {
        self.not_allowed = Some(Arc::new(handler));
    }

    /// Handler invoked with a fresh [`Control`] when a route handler panics.
    /// It should set an error status, typically 500.
    ///
    /// Response headers set before the panic, e.g. by middleware, are carried
    /// over; content headers of a body written before the panic are not.
    ///
    /// Without it the panic escapes the router and the server drops the
    /// connection.
    pub fn setup_recovery_handler<H: Handler>(&mut self, handler: H) {
        self.recovery = Some(Arc::new(handler));
    }

    /// Wraps every matched handler before it is invoked.
    pub fn setup_middleware<M: Middleware>(&mut self, middleware: M) {
        self.middleware = Some(Arc::new(middleware));
    }

    /// Serves the router on `host_port`, e.g. `"0.0.0.0:8080"`.
    pub async fn listen(self, host_port: &str) -> Result<(), Error> {
        Server::bind(host_port).serve(self).await
    }

    /// Lists registered patterns per method.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.registries
            .iter()
            .flat_map(|(method, registry)| {
                registry
                    .routes()
                    .into_iter()
                    .map(move |route| (method.clone(), route))
            })
            .collect()
    }

    /// Methods whose registry resolves `path`, given in decoded form.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        self.registries
            .iter()
            .filter(|(_, registry)| registry.get(path).is_some())
            .map(|(method, _)| method.clone())
            .collect()
    }

    /// Routes a request and produces its response.
    ///
    /// With a recovery handler configured, a panicking handler is answered by
    /// the recovery handler; otherwise the panic propagates to the caller.
    pub fn dispatch(&self, request: Request) -> Response {
        let request = Arc::new(request);
        let mut c = Control::with_shared(request.clone());

        let Some(recovery) = &self.recovery else {
            self.route(&request, &mut c);
            return c.into_response();
        };

        match panic::catch_unwind(AssertUnwindSafe(|| self.route(&request, &mut c))) {
            Ok(()) => c.into_response(),
            Err(payload) => {
                log::error!(
                    "recovered from panic in {} {}: {}",
                    request.method(),
                    request.uri().path(),
                    panic_message(payload.as_ref())
                );
                let mut recovered = Control::with_shared(request);
                *recovered.header_mut() = c.carry_headers();
                recovery.invoke(&mut recovered);
                recovered.into_response()
            }
        }
    }

    fn route(&self, request: &Request, c: &mut Control) {
        let path = decode_path(request.uri().path());

        if let Some(matched) = self.registry(request.method()).and_then(|r| r.get(&path)) {
            for param in matched.params {
                c.param(param.key, param.value);
            }
            let handler = match &self.middleware {
                Some(middleware) => middleware.wrap(matched.handler),
                None => matched.handler,
            };
            handler.invoke(c);
            return;
        }

        let allowed = self.allowed_methods(&path);

        if allowed.is_empty() {
            match &self.not_found {
                Some(handler) => handler.invoke(c),
                None => c.fail(StatusCode::NOT_FOUND, "404 page not found"),
            }
            return;
        }

        let allow = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            c.header_mut().insert(header::ALLOW, value);
        }

        if request.method() == Method::OPTIONS && self.options_replies {
            return;
        }

        match &self.not_allowed {
            Some(handler) => handler.invoke(c),
            None => c.fail(
                StatusCode::METHOD_NOT_ALLOWED,
                StatusCode::METHOD_NOT_ALLOWED
                    .canonical_reason()
                    .unwrap_or("Method Not Allowed"),
            ),
        }
    }

    fn registry(&self, method: &Method) -> Option<&Registry> {
        self.registries
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, registry)| registry)
    }

    fn registry_mut(&mut self, method: Method) -> &mut Registry {
        let idx = match self.registries.iter().position(|(m, _)| *m == method) {
            Some(idx) => idx,
            None => {
                self.registries.push((method, Registry::new()));
                self.registries.len() - 1
            }
        };
        &mut self.registries[idx].1
    }
}

impl Service for Router {
    fn call(&self, request: Request, _info: ConnectionInfo) -> Response {
        self.dispatch(request)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .field("options_replies", &self.options_replies)
            .finish_non_exhaustive()
    }
}

/// Percent-decodes a request path for matching. Paths that do not decode
/// to UTF-8 are matched as sent.
fn decode_path(path: &str) -> Cow<'_, str> {
    percent_decode_str(path)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(path))
}

/// Keeps rejected patterns readable in logs.
fn truncate(path: &str) -> &str {
    match path.char_indices().nth(64) {
        Some((idx, _)) => &path[..idx],
        None => path,
    }
}
