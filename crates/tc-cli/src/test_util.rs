//! Shared test helpers.

use std::sync::{Mutex, MutexGuard, OnceLock};

/// Tests that mutate process-wide env vars (`TC_DATABASE_URL`, `HOME`,
/// `XDG_CONFIG_HOME`) must not run concurrently with each other. Acquire
/// this lock for the duration of any such test.
pub fn lock_env() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    match LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
