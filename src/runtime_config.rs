//! # Runtime Configuration Module
//!
//! Environment variable based configuration for the coroutine runtime.
//!
//! ## Environment Variables
//!
//! ### `WEFT_STACK_SIZE`
//!
//! Stack size for pipeline coroutines (one per fragment fetch, plus the
//! template processor and async-stream relays of each request). Accepts
//! decimal (`65536`) or hexadecimal (`0x10000`) values.
//!
//! Default: `0x10000` (64 KB). A page with many fragments multiplies this,
//! so tune it down for very high concurrency deployments.

use std::env;
use tracing::error;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for pipeline coroutines in bytes (default: 64 KB)
    pub stack_size: usize,
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let stack_size = match env::var("WEFT_STACK_SIZE") {
            Ok(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(0x10000)
                } else {
                    val.parse().unwrap_or(0x10000)
                }
            }
            Err(_) => 0x10000,
        };
        RuntimeConfig { stack_size }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig { stack_size: 0x10000 }
    }
}

/// Spawn a detached pipeline coroutine with the configured stack size.
///
/// # Safety
///
/// Wraps `may::coroutine::Builder::spawn()`, which is unsafe in the `may`
/// runtime. Callers must ensure the coroutine body does not outlive data it
/// borrows; all pipeline coroutines own their channels and move their state.
pub(crate) fn spawn_pipeline<F>(stack_size: usize, label: &'static str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    let spawn_result = unsafe {
        may::coroutine::Builder::new()
            .stack_size(stack_size)
            .spawn(f)
    };
    if let Err(e) = spawn_result {
        error!(label = label, error = %e, stack_size = stack_size, "Failed to spawn pipeline coroutine");
    }
}
