use runpack_cache::Cancellation;
use std::sync::atomic::Ordering;
use tracing::warn;

/// Route Ctrl-C to `cancel`. A second Ctrl-C exits immediately.
///
/// Only one handler can be installed per process; later calls are ignored.
pub fn install_signal_handler(cancel: &Cancellation) {
    let flag = cancel.flag();
    if let Err(e) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\ncancellation requested, aborting in-flight downloads...");
    }) {
        warn!("signal handler not installed: {e}");
    }
}
