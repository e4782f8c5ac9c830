//! # Sessions
//!
//! Every run of an executable gets its own directory under `$TANK_SW_ROOT/sessions`, named after
//! the executable and the time it started. The directory holds the log file and, on the tank,
//! any video recordings. The start time is kept as the session epoch, which log timestamps are
//! measured from.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::time;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Format of the timestamp in session directory names.
const DIR_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Name of the recordings directory inside a session.
const REC_DIR_NAME: &str = "rec";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Session {
    /// Directory of this run, `<sessions_dir>/<exec>_<timestamp>`
    pub session_root: PathBuf,

    /// Video recordings made during the run
    pub rec_root: PathBuf,

    pub log_file_path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot find the software root directory: {0}")]
    SwRootNotFound(std::io::Error),

    #[error("Cannot create {0:?}: {1}")]
    CannotCreateDir(PathBuf, std::io::Error),

    #[error("A session has already been started by this process ({0})")]
    AlreadyStarted(conquer_once::TryInitError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start the session for this process.
    ///
    /// Sets the session epoch, so may only be called once per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        SESSION_EPOCH
            .try_init_once(Utc::now)
            .map_err(SessionError::AlreadyStarted)?;
        let epoch = SESSION_EPOCH.get().copied().unwrap_or_else(Utc::now);

        let root = crate::host::get_sw_root().map_err(SessionError::SwRootNotFound)?;

        Self::create(&root.join(sessions_dir), exec_name, &epoch)
    }

    /// Create the directories of a session started at `started`, inside `sessions_dir`.
    ///
    /// Leaves the process epoch alone.
    pub fn create(
        sessions_dir: &Path,
        exec_name: &str,
        started: &DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        let session_root =
            sessions_dir.join(format!("{}_{}", exec_name, started.format(DIR_TIMESTAMP_FORMAT)));
        let rec_root = session_root.join(REC_DIR_NAME);

        for dir in [&session_root, &rec_root].iter() {
            fs::create_dir_all(dir).map_err(|e| SessionError::CannotCreateDir(dir.to_path_buf(), e))?;
        }

        Ok(Session {
            log_file_path: session_root.join(format!("{}.log", exec_name)),
            session_root,
            rec_root,
        })
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Seconds since the session epoch.
///
/// Zero before a session is started, so code under test can log without one.
pub fn get_elapsed_seconds() -> f64 {
    SESSION_EPOCH
        .get()
        .map(|e| time::duration_to_seconds(Utc::now() - *e).unwrap_or(std::f64::NAN))
        .unwrap_or(0.0)
}

pub fn get_epoch() -> Option<&'static DateTime<Utc>> {
    SESSION_EPOCH.get()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_create_layout() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc.ymd(2021, 3, 4).and_hms(5, 6, 7);

        let s = Session::create(dir.path(), "tank_exec", &started).unwrap();

        assert_eq!(s.session_root, dir.path().join("tank_exec_20210304_050607"));
        assert_eq!(s.rec_root, s.session_root.join("rec"));
        assert_eq!(s.log_file_path, s.session_root.join("tank_exec.log"));
        assert!(s.rec_root.is_dir());

        // Creating the same session twice is harmless
        assert!(Session::create(dir.path(), "tank_exec", &started).is_ok());
    }

    #[test]
    fn test_elapsed_without_session() {
        if get_epoch().is_none() {
            assert_eq!(get_elapsed_seconds(), 0.0);
        }
    }
}
