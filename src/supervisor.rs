//! Supervisor. Installs signal handlers, drives the
//! shared `ShutdownToken`, and probes the concentrator's trigger counter for
//! the spurious-reset signature once per reporting cycle.

use crate::concentrator::{is_spurious_reset, Concentrator, ConcentratorHal};
use crate::error::GatewayError;
use crate::shutdown::ShutdownToken;
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Holds the first fatal error observed by any supervised task, so `main`
/// can map it to the right process exit code.
#[derive(Default)]
pub struct FatalSlot(Mutex<Option<GatewayError>>);

impl FatalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, error: GatewayError) {
        let mut guard = self.0.lock().expect("fatal slot mutex poisoned");
        if guard.is_none() {
            *guard = Some(error);
        }
    }

    pub fn take(&self) -> Option<GatewayError> {
        self.0.lock().expect("fatal slot mutex poisoned").take()
    }
}

/// SIGINT/SIGTERM request a graceful exit; SIGQUIT requests an immediate one.
pub fn spawn_signal_handler(shutdown: ShutdownToken) -> io::Result<JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;
    Ok(thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGQUIT => {
                    log::warn!(target: "main", "SIGQUIT received, shutting down immediately");
                    shutdown.request_quit();
                }
                SIGINT | SIGTERM => {
                    log::info!(target: "main", "shutdown signal received, winding down");
                    shutdown.request_exit();
                }
                _ => {}
            }
            if shutdown.should_quit() {
                break;
            }
        }
    }))
}

/// Polls `TriggerCounter()` once per `interval` for the spurious-reset
/// signature `0x7E000000` and triggers an immediate shutdown if observed.
pub fn spawn_reset_probe<H: ConcentratorHal + 'static>(
    concentrator: std::sync::Arc<Concentrator<H>>,
    shutdown: ShutdownToken,
    fatal: std::sync::Arc<FatalSlot>,
    interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.should_exit() {
            thread::sleep(interval);
            if is_spurious_reset(concentrator.trigger_counter()) {
                log::error!(target: "main", "concentrator reported spurious reset signature, terminating");
                fatal.set(GatewayError::SpuriousReset);
                shutdown.request_quit();
                break;
            }
        }
    })
}
