//! Process-wide registry of resources released on interrupt.
//!
//! Mount sessions, mounts still being opened and private image copies
//! register here. The interrupt handler and the binary's exit path call
//! [`run_registered`], which releases every entry still alive, newest first,
//! so a mount is let go before the image file beneath it is deleted.
//!
//! Entries are held weakly. Dropping the owner unregisters it, and every
//! [`Release::release`] is idempotent, so racing an explicit dispose is
//! harmless.

use std::sync::{Arc, Mutex, MutexGuard, Once, OnceLock, Weak};

use tracing::{error, info, warn};

use crate::error::Result;

/// Exit status after an interrupt.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Something the registry can release.
pub trait Release: Send + Sync {
    /// What is held, for logs.
    fn describe(&self) -> String;

    /// Release whatever is still held. A second call is a no-op.
    fn release(&self) -> Result<()>;
}

/// Weakly held entries in registration order.
#[derive(Default)]
struct Registry {
    entries: Mutex<Vec<Weak<dyn Release>>>,
}

impl Registry {
    fn entries(&self) -> MutexGuard<'_, Vec<Weak<dyn Release>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, entry: Weak<dyn Release>) {
        let mut entries = self.entries();
        entries.retain(|e| e.strong_count() > 0);
        entries.push(entry);
    }

    fn live(&self) -> usize {
        self.entries().iter().filter(|e| e.strong_count() > 0).count()
    }

    fn drain(&self) -> usize {
        let mut released = 0;
        loop {
            let live: Vec<Arc<dyn Release>> = {
                let mut entries = self.entries();
                let live = entries.iter().rev().filter_map(Weak::upgrade).collect();
                entries.clear();
                live
            };
            if live.is_empty() {
                return released;
            }
            for entry in &live {
                match entry.release() {
                    Ok(()) => released += 1,
                    Err(e) => error!(entry = %entry.describe(), error = %e, "cleanup failed"),
                }
            }
        }
    }
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

/// Track `entry` until it is dropped.
pub fn register<T: Release + 'static>(entry: &Arc<T>) {
    install_interrupt_handler();
    let weak: Weak<T> = Arc::downgrade(entry);
    registry().register(weak);
}

/// Number of entries registered and not yet dropped.
pub fn live_entries() -> usize {
    registry().live()
}

/// Release every live entry, newest first. Returns how many were released.
///
/// Failures are logged; one failing entry does not stop the others. Entries
/// registered while draining are released too.
pub fn run_registered() -> usize {
    let released = registry().drain();
    if released > 0 {
        info!(entries = released, "released held resources");
    }
    released
}

/// Install the Ctrl-C/SIGTERM handler once per process.
pub fn install_interrupt_handler() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let installed = ctrlc::set_handler(|| {
            warn!("interrupted, releasing mounts and temp files");
            run_registered();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        });
        if let Err(e) = installed {
            warn!(error = %e, "could not install interrupt handler");
        }
    });
}

/// Runs [`run_registered`] when dropped. Held by `main` for the process lifetime.
#[derive(Debug, Default)]
pub struct ExitGuard;

impl Drop for ExitGuard {
    fn drop(&mut self) {
        run_registered();
    }
}
