use std::{env, io, path::PathBuf};

use anyhow::{anyhow, Result};

const APP_NAME: &str = "tabtrail";

/// Directory holding logs, the session file and the default file store.
pub fn create_application_default_path() -> Result<PathBuf> {
    let mut path = state_root()?;
    path.push(APP_NAME);

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

/// Directory searched for `config.toml`.
pub fn application_config_path() -> Option<PathBuf> {
    let root = if cfg!(windows) {
        env::var("APPDATA").map(PathBuf::from).ok()
    } else {
        env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
            .ok()
    };
    root.map(|v| v.join(APP_NAME))
}

fn state_root() -> Result<PathBuf> {
    if cfg!(windows) {
        return env::var("APPDATA")
            .map(PathBuf::from)
            .map_err(|_| anyhow!("APPDATA should be present on Windows"));
    }
    env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .map_err(|_| anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))
}
