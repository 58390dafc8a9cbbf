//! Service probes: version, liveness, readiness and runtime information,
//! plus the statistics middleware that feeds them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::control::{Control, Json};
use crate::handler::{handler_fn, Middleware, SharedHandler};
use crate::lifecycle::{Operator, OperatorResult};
use crate::router::Router;

pub const SERVICE_NAME: &str = "BITROUTE";
pub const RELEASE: &str = env!("CARGO_PKG_VERSION");
/// Set at build time through `BITROUTE_REPO`.
pub const REPO: &str = match option_env!("BITROUTE_REPO") {
    Some(repo) => repo,
    None => "UNKNOWN",
};
/// Set at build time through `BITROUTE_COMMIT`.
pub const COMMIT: &str = match option_env!("BITROUTE_COMMIT") {
    Some(commit) => commit,
    None => "UNKNOWN",
};

/// Detailed information about the service, served by `/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub host: String,
    pub version: String,
    pub commit: String,
    pub repo: String,
    pub runtime: Runtime,
    pub state: State,
    pub requests: Requests,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    pub cpu: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub maintenance: bool,
    pub uptime: String,
}

/// Response statistics collected by [`Probes::base`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requests {
    pub duration: Durations,
    pub codes: Codes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durations {
    pub average: String,
    pub max: String,
}

/// Status code counters. Only codes set explicitly through
/// [`Control::code`] are counted; a handler that leaves the default 200
/// shows up in the durations but not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codes {
    #[serde(rename = "2xx")]
    pub c2xx: u64,
    #[serde(rename = "4xx")]
    pub c4xx: u64,
    #[serde(rename = "5xx")]
    pub c5xx: u64,
}

#[derive(Debug, Default)]
struct Stats {
    count: u32,
    total: Duration,
    max: Duration,
    codes: Codes,
}

impl Stats {
    fn record(&mut self, took: Duration, code: u16) {
        self.count = self.count.saturating_add(1);
        self.total += took;
        self.max = self.max.max(took);

        match code {
            500..=u16::MAX => self.codes.c5xx += 1,
            400..=499 => self.codes.c4xx += 1,
            200..=299 => self.codes.c2xx += 1,
            _ => {}
        }
    }

    fn requests(&self) -> Requests {
        let average = match self.count {
            0 => Duration::ZERO,
            count => self.total / count,
        };
        Requests {
            duration: Durations {
                average: format!("{:?}", average),
                max: format!("{:?}", self.max),
            },
            codes: self.codes,
        }
    }
}

struct Inner {
    started: Instant,
    maintenance: AtomicBool,
    stats: Mutex<Stats>,
}

/// The service's own handlers. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Probes {
    inner: Arc<Inner>,
}

impl Default for Probes {
    fn default() -> Self {
        Self::new()
    }
}

impl Probes {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                started: Instant::now(),
                maintenance: AtomicBool::new(false),
                stats: Mutex::new(Stats::default()),
            }),
        }
    }

    /// Registers `/`, `/healthz`, `/readyz` and `/info`, and installs
    /// [`base`](Probes::base) as the router's middleware.
    pub fn setup(&self, router: &mut Router) {
        let probes = self.clone();
        router.get("/", move |c: &mut Control| probes.root(c));
        let probes = self.clone();
        router.get("/healthz", move |c: &mut Control| probes.health(c));
        let probes = self.clone();
        router.get("/readyz", move |c: &mut Control| probes.ready(c));
        let probes = self.clone();
        router.get("/info", move |c: &mut Control| probes.info(c));
        router.setup_middleware(self.base());
    }

    /// Shows the service name and release.
    pub fn root(&self, c: &mut Control) {
        c.code(200);
        c.write(format!("{} v{}", SERVICE_NAME, RELEASE));
    }

    /// Returns "OK" while the process is alive.
    pub fn health(&self, c: &mut Control) {
        c.code(200);
        c.write("OK");
    }

    /// Returns "OK" when the service is ready to take traffic.
    pub fn ready(&self, c: &mut Control) {
        c.code(200);
        c.write("OK");
    }

    pub fn info(&self, c: &mut Control) {
        c.code(200);
        c.write(Json(self.status()));
    }

    pub fn status(&self) -> Status {
        Status {
            host: hostname(),
            version: RELEASE.to_owned(),
            commit: COMMIT.to_owned(),
            repo: REPO.to_owned(),
            runtime: Runtime {
                cpu: num_cpus::get(),
            },
            state: State {
                maintenance: self.in_maintenance(),
                uptime: format!("{:?}", self.inner.started.elapsed()),
            },
            requests: self.lock_stats().requests(),
        }
    }

    /// Middleware timing each handler and counting its status code.
    pub fn base(&self) -> impl Middleware {
        let probes = self.clone();
        move |next: SharedHandler| {
            let probes = probes.clone();
            handler_fn(move |c: &mut Control| {
                let timer = Instant::now();
                next.invoke(c);
                probes.lock_stats().record(timer.elapsed(), c.get_code());
            })
        }
    }

    pub fn in_maintenance(&self) -> bool {
        self.inner.maintenance.load(Ordering::SeqCst)
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.inner.maintenance.store(enabled, Ordering::SeqCst);
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, Stats> {
        // stats stay usable after a panic in another request
        self.inner
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Maintenance toggles the flag reported by `/info`.
impl Operator for Probes {
    fn reload(&self) -> OperatorResult {
        Ok(())
    }

    fn maintenance(&self) -> OperatorResult {
        let enabled = !self.in_maintenance();
        self.set_maintenance(enabled);
        log::info!("Maintenance mode {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    fn shutdown(&self) -> OperatorResult {
        Ok(())
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|name| name.trim().to_owned())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_owned())
}
