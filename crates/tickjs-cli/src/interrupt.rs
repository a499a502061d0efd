use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{error, info, warn};

/// Exit code used when the run is cut short by Ctrl-C
pub const INTERRUPTED_EXIT_CODE: u8 = 130;

/// Spawn a Ctrl-C handler on a helper thread.
///
/// The first Ctrl-C sets the returned flag so the driver can stop at its next cycle boundary.
/// A second one exits immediately.
pub fn setup_interrupt_handler() -> io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let handler_flag = flag.clone();
    thread::Builder::new()
        .name("tickjs-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(target: "host", "Failed to listen for Ctrl-C: {}", e);
                        return;
                    }

                    if handler_flag.swap(true, Ordering::SeqCst) {
                        warn!(target: "host", "Received second Ctrl-C, exiting");
                        std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
                    }
                    info!(target: "host", "Received Ctrl-C, stopping after the current cycle");
                }
            });
        })?;

    Ok(flag)
}
