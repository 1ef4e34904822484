use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "keygate", "keygate")
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
}

/// Get the path to the gateway config file.
///
/// `KEYGATE_CONFIG` takes precedence over the platform config directory.
pub fn config_file() -> Option<PathBuf> {
    if let Some(path) = env_path("KEYGATE_CONFIG") {
        return Some(path);
    }
    config_dir().map(|dir| dir.join("keygate.toml"))
}

/// Get the directory for temporary credential files.
///
/// Prefers `KEYGATE_CREDENTIAL_DIR`, then the per-user runtime directory,
/// then a `keygate` directory under the system temp dir.
pub fn credential_dir() -> PathBuf {
    if let Some(path) = env_path("KEYGATE_CREDENTIAL_DIR") {
        return path;
    }

    project_dirs()
        .and_then(|dirs| dirs.runtime_dir().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| std::env::temp_dir().join("keygate"))
}

/// Get the log directory path
pub fn log_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("KEYGATE_LOG_DIR") {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        return Some(PathBuf::from(trimmed));
    }

    config_dir().map(|d| d.join("logs"))
}

/// Ensure the log directory exists with proper permissions
pub fn ensure_log_dir() -> std::io::Result<PathBuf> {
    let dir = log_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine log directory",
        )
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    Ok(dir)
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}
