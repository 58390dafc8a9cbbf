//! OS signal handling for the service process.
//!
//! Signals are classified into three kinds and forwarded to an [`Operator`]
//! until a shutdown arrives.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// What a received signal asks the process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Shutdown,
    Reload,
    Maintenance,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalType::Shutdown => "SHUTDOWN",
            SignalType::Reload => "RELOAD",
            SignalType::Maintenance => "MAINTENANCE",
        };
        f.write_str(name)
    }
}

pub type OperatorResult = Result<(), Box<dyn StdError + Send + Sync>>;

/// Reacts to lifecycle signals. Errors are logged and never stop the
/// signal loop.
pub trait Operator {
    fn reload(&self) -> OperatorResult;
    fn maintenance(&self) -> OperatorResult;
    fn shutdown(&self) -> OperatorResult;
}

/// An operator that accepts every request and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Handling;

impl Operator for Handling {
    fn reload(&self) -> OperatorResult {
        Ok(())
    }

    fn maintenance(&self) -> OperatorResult {
        Ok(())
    }

    fn shutdown(&self) -> OperatorResult {
        Ok(())
    }
}

/// Process signal listeners: SIGINT and SIGTERM shut down, SIGHUP reloads
/// and SIGUSR1 toggles maintenance. Elsewhere only Ctrl-C is observed.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct Signals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    #[cfg(unix)]
    user1: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    pub fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            user1: signal(SignalKind::user_defined1())?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Waits for the next signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> SignalType {
        tokio::select! {
            Some(()) = self.interrupt.recv() => SignalType::Shutdown,
            Some(()) = self.terminate.recv() => SignalType::Shutdown,
            Some(()) = self.hangup.recv() => SignalType::Reload,
            Some(()) = self.user1.recv() => SignalType::Maintenance,
            else => SignalType::Shutdown,
        }
    }

    /// Waits for the next signal.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> SignalType {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", err);
        }
        SignalType::Shutdown
    }
}

/// Forwards signals to `operator` until a shutdown signal was handled.
pub async fn wait<O: Operator>(mut signals: Signals, operator: O) {
    loop {
        let kind = signals.recv().await;
        log::info!("Got signal: {}", kind);
        if handle(kind, &operator) {
            log::info!("Gracefully closed");
            return;
        }
    }
}

/// Runs the operator action for one signal. Returns `true` on shutdown.
pub fn handle<O: Operator + ?Sized>(kind: SignalType, operator: &O) -> bool {
    let result = match kind {
        SignalType::Maintenance => {
            log::info!("Maintenance request");
            operator.maintenance()
        }
        SignalType::Reload => {
            log::info!("Reloading configuration...");
            operator.reload()
        }
        SignalType::Shutdown => {
            log::info!("Service was terminated by system signal");
            operator.shutdown()
        }
    };
    if let Err(err) = result {
        log::error!("{} failed: {}", kind, err);
    }
    kind == SignalType::Shutdown
}
