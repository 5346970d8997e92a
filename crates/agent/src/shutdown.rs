//! Coordinated shutdown on SIGINT/SIGTERM.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Grace period between the signal and process exit, giving worker threads
/// a chance to unwind.
pub const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Install signal handlers and return the shared shutdown flag.
#[cfg(unix)]
pub fn install() -> std::io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))?;
    Ok(flag)
}

/// Windows has no SIGTERM to speak of; the controller kills the process by
/// pid instead. The flag still exists so loop structure is shared.
#[cfg(not(unix))]
pub fn install() -> std::io::Result<Arc<AtomicBool>> {
    Ok(Arc::new(AtomicBool::new(false)))
}
