use std::sync::Arc;

use crate::control::Control;

/// A request handler bound to a route.
///
/// Implemented for every `Fn(&mut Control)` closure, so most handlers are
/// written inline:
///
/// ```
/// # use bitroute::{Control, Router};
/// let mut router = Router::new();
/// router.get("/hello/:name", |c: &mut Control| {
///     let greeting = format!("Hello {}", c.query(":name"));
///     c.write(greeting);
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles one request through its [`Control`].
    fn invoke(&self, c: &mut Control);
}

impl<F> Handler for F
where
    F: Fn(&mut Control) + Send + Sync + 'static,
{
    fn invoke(&self, c: &mut Control) {
        self(c)
    }
}

/// A handler shared between the registry and in-flight requests.
pub type SharedHandler = Arc<dyn Handler>;

/// Wraps a closure into a [`SharedHandler`].
///
/// Mostly useful inside middleware, which has to hand back a new handler.
pub fn handler_fn<F>(f: F) -> SharedHandler
where
    F: Fn(&mut Control) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The router's single extension point.
///
/// A middleware receives the matched handler and returns the handler that is
/// actually invoked. The returned handler is expected to call the inner one
/// exactly once.
///
/// ```
/// # use bitroute::{handler_fn, Control, Router, SharedHandler};
/// let mut router = Router::new();
/// router.setup_middleware(|next: SharedHandler| {
///     handler_fn(move |c: &mut Control| {
///         c.header_mut().insert("x-served-by", "bitroute".parse().unwrap());
///         next.invoke(c);
///     })
/// });
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: SharedHandler) -> SharedHandler;
}

impl<F> Middleware for F
where
    F: Fn(SharedHandler) -> SharedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        self(next)
    }
}
