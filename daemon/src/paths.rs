/// Canonical file paths for the presence daemon.
///
/// Everything lives under ~/.ollama/discord/, next to the target's own data:
///   - config.toml  Written on first run with defaults, read once at startup.
use std::path::PathBuf;

const TARGET_DIR_NAME: &str = ".ollama";
const APP_DIR_NAME: &str = "discord";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Returns the user's home directory from `HOME`, falling back to `USERPROFILE` on Windows.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Returns the daemon's data directory: ~/.ollama/discord/
///
/// Falls back to the current directory when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(TARGET_DIR_NAME)
        .join(APP_DIR_NAME)
}

/// Returns the full path to the config file: ~/.ollama/discord/config.toml
pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_ends_with_discord() {
        let dir = app_data_dir();
        assert_eq!(dir.file_name().unwrap(), APP_DIR_NAME);
        assert_eq!(dir.parent().unwrap().file_name().unwrap(), TARGET_DIR_NAME);
    }

    #[test]
    fn config_file_path_has_correct_name() {
        let path = config_file_path();
        assert_eq!(path.file_name().unwrap(), CONFIG_FILE_NAME);
        assert_eq!(path.parent(), Some(app_data_dir().as_path()));
    }
}
