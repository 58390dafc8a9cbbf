//! A small service built on the Bitroute router.
//! Demonstrates named and wildcard segments, JSON bodies, shared state and
//! the not-found and recovery hooks.

use bitroute::{Control, Json, Router, Server};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Serialize, Deserialize)]
struct User {
    name: String,
}

/// Builds the router with the following routes:
/// - GET "/" - Returns a welcome message
/// - GET "/hello/:name" - Returns a personalized greeting
/// - GET "/counter" - Returns and increments a shared counter
/// - POST "/users" - Echoes a JSON user
/// - GET "/static/*" - Returns the requested file path
/// - GET "/panic" - Panics, answered by the recovery handler
fn router() -> Router {
    let mut router = Router::new();
    let counter = Arc::new(AtomicUsize::new(0));

    router.get("/", |c: &mut Control| c.write("Welcome to Bitroute!"));

    router.get("/hello/:name", |c: &mut Control| {
        let greeting = format!("Hello, {}!", c.query(":name"));
        c.write(greeting);
    });

    router.get("/counter", move |c: &mut Control| {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        c.write(format!("Counter: {}", count));
    });

    router.post("/users", |c: &mut Control| match c.request().body().json::<User>() {
        Ok(user) => {
            c.code(201);
            c.write(Json(user));
        }
        Err(err) => {
            c.code(400);
            c.write(err.to_string());
        }
    });

    router.get("/static/*", |c: &mut Control| {
        let path = c.request().uri().path().trim_start_matches("/static/").to_owned();
        c.write(format!("File: {}", path));
    });

    router.get("/panic", |_: &mut Control| panic!("demo panic"));

    router.setup_not_found_handler(|c: &mut Control| {
        c.code(404);
        c.write("Nothing here");
    });
    router.setup_recovery_handler(|c: &mut Control| {
        c.code(500);
        c.write("Something went wrong");
    });
    router.use_options_replies(true);

    router
}

/// Starts a server on localhost:3000.
/// Prints available routes to stdout when the server starts.
#[tokio::main]
async fn main() {
    let router = router();

    println!("Server running at http://127.0.0.1:3000");
    println!("Try these routes:");
    for (method, route) in router.routes() {
        println!("  - {} {}", method, route);
    }

    if let Err(err) = Server::bind("127.0.0.1:3000").serve(router).await {
        eprintln!("Server failed: {}", err);
    }
}
