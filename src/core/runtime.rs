//! Process-wide limits for the numeric backend.

use std::sync::Once;
use tracing::{debug, info};

/// Environment variables read by BLAS/OpenMP style backends and by candle's
/// CPU kernels when they size their thread pools.
const THREAD_ENV_VARS: &[&str] = &[
    "RAYON_NUM_THREADS",
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "VECLIB_MAXIMUM_THREADS",
    "NUMEXPR_NUM_THREADS",
];

static THREAD_LIMIT: Once = Once::new();

/// Pin the numeric backend to `num_threads` threads for the rest of the process.
///
/// Must run before the embedding model is loaded. Only the first call has an
/// effect; later calls (with any value) are no-ops.
pub fn enforce_thread_limit(num_threads: usize) {
    THREAD_LIMIT.call_once(|| {
        let value = num_threads.max(1).to_string();
        for var in THREAD_ENV_VARS {
            std::env::set_var(var, &value);
        }

        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .build_global()
        {
            // Someone built the global pool first; the env vars still bound the kernels.
            debug!(error = %e, "global rayon pool already initialized");
        }

        info!(threads = num_threads, "numeric thread limit applied");
    });
}

/// Whether [`enforce_thread_limit`] has run in this process
pub fn thread_limit_applied() -> bool {
    THREAD_LIMIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_limit_is_idempotent() {
        enforce_thread_limit(1);
        assert!(thread_limit_applied());
        assert_eq!(std::env::var("OMP_NUM_THREADS").as_deref(), Ok("1"));

        // A second call must not change anything
        enforce_thread_limit(8);
        assert_eq!(std::env::var("RAYON_NUM_THREADS").as_deref(), Ok("1"));
    }
}
