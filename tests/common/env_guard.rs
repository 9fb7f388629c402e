//! Serialised environment mutation for integration tests.
//!
//! Include with:
//!
//! ```rust
//! #[path = "common/env_guard.rs"]
//! mod env_guard;
//! ```

use std::env;
use std::ffi::OsString;

use tokio::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Holds the env mutex and restores the previous values on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets each variable while holding the global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let previous = pairs
            .iter()
            .map(|(key, value)| {
                let old = env::var_os(key);
                // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
                unsafe { env::set_var(key, value) };
                ((*key).to_owned(), old)
            })
            .collect();
        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
