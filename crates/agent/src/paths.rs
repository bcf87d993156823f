//! Central path resolution for all Negotiagent data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `NEGOTIAGENT_DATA_DIR` env > `~/.negotiagent`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Initialize the global data directory. Returns the resolved path.
///
/// Priority: `explicit` arg > `NEGOTIAGENT_DATA_DIR` env > `~/.negotiagent` default.
/// Panics if no valid path can be resolved.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("NEGOTIAGENT_DATA_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .expect("HOME directory not found")
            .join(".negotiagent")
    };

    let mut guard = DATA_DIR.write().expect("DATA_DIR lock poisoned");
    *guard = Some(dir.clone());
    dir
}

/// Return the current data directory. Panics if `init_data_dir` hasn't been called.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .expect("DATA_DIR lock poisoned")
        .clone()
        .expect("data_dir() called before init_data_dir()")
}

pub fn db_path() -> PathBuf {
    data_dir().join("store.db")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    let base = data_dir();
    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    Ok(())
}
