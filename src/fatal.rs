//! Whole-process fault escalation for scheduler-core tasks
//!
//! A panic inside any scheduling context (slot agent loop, runner monitor,
//! the task driving the swap controller) must never degrade into a
//! partially-stopped scheduler: the process exits immediately with a
//! reserved code so an external supervisor can restart it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::process;

use futures::FutureExt;
use tracing::error;

/// Exit code reserved for a fault escaping a scheduler-core task
/// (sysexits EX_SOFTWARE).
pub const THREAD_FAULT_EXIT_CODE: i32 = 70;

/// Run a scheduler-core future, turning any panic into an immediate
/// whole-process exit with [`THREAD_FAULT_EXIT_CODE`].
pub async fn guarded<T>(name: &'static str, fut: impl Future<Output = T>) -> T {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => value,
        Err(panic) => {
            error!(
                task = name,
                panic = panic_message(panic.as_ref()),
                "panic in scheduler task, aborting process"
            );
            process::exit(THREAD_FAULT_EXIT_CODE);
        }
    }
}

/// Log and abort; for bounded waits whose overrun has no recovery policy.
pub fn die(reason: std::fmt::Arguments<'_>) -> ! {
    error!(%reason, "unrecoverable scheduler fault, aborting process");
    process::exit(THREAD_FAULT_EXIT_CODE);
}

/// Last-resort hook for panics on contexts not wrapped by [`guarded`].
/// Installed once by the scheduler binary.
pub fn install_abort_hook() {
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default(info);
        process::exit(THREAD_FAULT_EXIT_CODE);
    }));
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
