//! Default on-disk locations.

use std::path::PathBuf;

const APP_DIR: &str = "devcert";

/// Per-user directory devcert keeps its state in.
///
/// `~/.devcert` on Linux and other Unixes,
/// `~/Library/Application Support/devcert` on macOS and
/// `%LOCALAPPDATA%\devcert` on Windows. Relative `.devcert` when the
/// platform variable is unset.
pub fn devcert_data_dir() -> PathBuf {
    platform_data_dir().unwrap_or_else(|| PathBuf::from(format!(".{APP_DIR}")))
}

#[cfg(target_os = "macos")]
fn platform_data_dir() -> Option<PathBuf> {
    let home = PathBuf::from(std::env::var_os("HOME")?);
    Some(home.join("Library").join("Application Support").join(APP_DIR))
}

#[cfg(windows)]
fn platform_data_dir() -> Option<PathBuf> {
    std::env::var_os("LOCALAPPDATA").map(|dir| PathBuf::from(dir).join(APP_DIR))
}

#[cfg(not(any(target_os = "macos", windows)))]
fn platform_data_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(format!(".{APP_DIR}")))
}

/// Default base directory holding the device key, CSR, certificate and CA files.
pub fn default_base_dir() -> PathBuf {
    devcert_data_dir().join("device-certs")
}

/// Default location of the optional TOML config file.
pub fn default_config_file() -> PathBuf {
    devcert_data_dir().join("devcert.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_dir_lives_under_data_dir() {
        assert!(default_base_dir().starts_with(devcert_data_dir()));
        assert!(default_base_dir().ends_with("device-certs"));
    }

    #[test]
    fn config_file_is_toml() {
        let path = default_config_file();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
    }
}
