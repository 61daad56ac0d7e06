//! Process-wide engine lifecycle.
//!
//! The engine must be initialized once before any database is created or
//! opened, and is shut down once at process teardown:
//!
//! ```text
//! Uninit --init--> Active --shutdown--> ShutDown
//! ```
//!
//! A repeated [`init`] is a no-op. Once shut down the runtime cannot be
//! brought back; [`init`] and every database entry point then fail with
//! `InvalidState`. [`Runtime`] wraps the pair in a scoped guard.

use crate::error::{KvdbError, KvdbResult};
use crate::params::Params;
use parking_lot::{const_mutex, Mutex};
use std::path::Path;
use std::sync::Arc;

enum State {
    Uninit,
    Active(Arc<Params>),
    ShutDown,
}

static STATE: Mutex<State> = const_mutex(State::Uninit);

/// Initializes the engine.
///
/// `config_file` is a JSON parameter file applied first, then `params`
/// assignments in order. The result becomes the process-wide default under
/// every database's own parameters.
///
/// # Errors
///
/// Returns `InvalidState` after [`shutdown`], or a parameter error when
/// the file or an assignment is invalid.
pub fn init(config_file: Option<&Path>, params: &[&str]) -> KvdbResult<()> {
    let mut state = STATE.lock();
    match *state {
        State::Active(_) => return Ok(()),
        State::ShutDown => {
            return Err(KvdbError::invalid_state(
                "engine runtime has been shut down",
            ))
        }
        State::Uninit => {}
    }

    let mut defaults = Params::new();
    if let Some(path) = config_file {
        defaults.apply_file(path)?;
    }
    defaults.apply(params)?;
    // validated now so a bad default fails here rather than at open
    defaults.db_config()?;

    tracing::info!(
        version = crate::VERSION,
        params = defaults.len(),
        "kvdb runtime initialized"
    );
    *state = State::Active(Arc::new(defaults));
    Ok(())
}

/// Shuts the engine down.
///
/// Databases still open keep working until closed, but no new database can
/// be created or opened. Calling this more than once is harmless.
pub fn shutdown() {
    let mut state = STATE.lock();
    if matches!(*state, State::Active(_)) {
        tracing::info!("kvdb runtime shut down");
    }
    *state = State::ShutDown;
}

/// Whether the runtime is between [`init`] and [`shutdown`].
#[must_use]
pub fn is_active() -> bool {
    matches!(*STATE.lock(), State::Active(_))
}

/// Process-wide default parameters; the gate every database entry point
/// goes through.
pub(crate) fn defaults() -> KvdbResult<Arc<Params>> {
    match &*STATE.lock() {
        State::Active(params) => Ok(Arc::clone(params)),
        State::Uninit => Err(KvdbError::invalid_state(
            "engine runtime is not initialized",
        )),
        State::ShutDown => Err(KvdbError::invalid_state(
            "engine runtime has been shut down",
        )),
    }
}

/// Scoped runtime: initialized on construction, shut down on drop.
///
/// ```no_run
/// use kvdb_core::{Database, Runtime};
///
/// let _runtime = Runtime::init(None, &[]).unwrap();
/// let db = Database::open_in_memory(&[]).unwrap();
/// db.close().unwrap();
/// ```
#[derive(Debug)]
#[must_use = "the runtime shuts down when the guard is dropped"]
pub struct Runtime {
    _private: (),
}

impl Runtime {
    /// Initializes the runtime and returns its guard.
    ///
    /// # Errors
    ///
    /// Same as [`init`].
    pub fn init(config_file: Option<&Path>, params: &[&str]) -> KvdbResult<Self> {
        init(config_file, params)?;
        Ok(Self { _private: () })
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_noop() {
        init(None, &["kvdb.throttle.rate=0"]).unwrap();
        init(None, &[]).unwrap();
        assert!(is_active());
        assert!(defaults().is_ok());
    }
}
