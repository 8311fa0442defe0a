//! Session management
//!
//! A session is one execution of an exec. Each session gets its own timestamped directory in which
//! the log file is written, and a process-wide epoch used to timestamp log messages.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal imports
use crate::time;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

/// Time the first session of this process was started, shared by every later session.
static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// A chrono format string which diplays a timestamp. See
/// https://docs.rs/chrono/0.4/chrono/format/strftime/index.html for more
/// information.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Number of suffixed names tried when a session directory already exists.
const MAX_DIR_ATTEMPTS: u32 = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A struct storing information about the current session
#[derive(Clone, Debug)]
pub struct Session {
    /// Name of the exec which started the session
    pub exec_name: String,

    /// The root directory for this session
    pub session_root: PathBuf,

    /// The path to the session's log file
    pub log_file_path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors associated with the session module.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("The software root environment variable ({}) is not set", crate::host::SW_ROOT_ENV_VAR)]
    SwRootNotSet,

    #[error("Cannot create the session directory {0:?}: {1}")]
    CannotCreateDir(PathBuf, io::Error),

    #[error("Cannot get the epoch time, did you forget to start the session?")]
    CannotGetEpoch,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start a new session within the given directory.
    ///
    /// The sessions directory is relative to the software root. This will create a new session
    /// directory named `{exec_name}_{timestamp}`.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        let root = crate::host::get_sw_root().map_err(|_| SessionError::SwRootNotSet)?;

        Self::new_in(root.join(sessions_dir), exec_name)
    }

    /// Start a new session inside an explicit sessions directory.
    ///
    /// If a directory with the same name already exists, for example because the exec was
    /// restarted within the same second, a numeric suffix is added.
    pub fn new_in(sessions_dir: PathBuf, exec_name: &str) -> Result<Self, SessionError> {
        // The first session sets the epoch, later ones reuse it
        let epoch = *SESSION_EPOCH.get_or_init(Utc::now);
        let base_name = format!("{}_{}", exec_name, epoch.format(TIMESTAMP_FORMAT));

        fs::create_dir_all(&sessions_dir)
            .map_err(|e| SessionError::CannotCreateDir(sessions_dir.clone(), e))?;

        let session_root = create_unique_dir(&sessions_dir, &base_name)?;
        let log_file_path = session_root.join(format!("{}.log", exec_name));

        Ok(Session {
            exec_name: exec_name.to_string(),
            session_root,
            log_file_path,
        })
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the number of seconds elapsed since the start of the session.
///
/// If the session has not been started yet `NaN` is returned.
pub fn get_elapsed_seconds() -> f64 {
    match SESSION_EPOCH.get() {
        Some(e) => time::duration_to_seconds(Utc::now() - *e).unwrap_or(std::f64::NAN),
        None => std::f64::NAN,
    }
}

/// Return a reference to the session's epoch.
pub fn get_epoch() -> Result<&'static DateTime<Utc>, SessionError> {
    SESSION_EPOCH.get().ok_or(SessionError::CannotGetEpoch)
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Create `parent/base_name`, or `parent/base_name_N` if that already exists.
fn create_unique_dir(parent: &Path, base_name: &str) -> Result<PathBuf, SessionError> {
    let mut path = parent.join(base_name);

    for i in 1..=MAX_DIR_ATTEMPTS {
        match fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                path = parent.join(format!("{}_{}", base_name, i));
            },
            Err(e) => return Err(SessionError::CannotCreateDir(path, e))
        }
    }

    Err(SessionError::CannotCreateDir(
        path,
        io::Error::new(io::ErrorKind::AlreadyExists, "too many sessions with the same name")
    ))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
