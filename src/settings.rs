//! Filesystem locations used by the application.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::config::Config;

/// Resolve the token cache file path.
///
/// Uses the configured path if set, otherwise the platform cache directory
/// (`~/Library/Caches/de.malvik.msal-console` on macOS).
pub fn cache_file_path(config: &Config) -> PathBuf {
    if let Some(path) = &config.cache.path {
        return path.clone();
    }

    match ProjectDirs::from("de", "malvik", "msal-console") {
        Some(dirs) => dirs.cache_dir().join(&config.cache.file_name),
        None => {
            let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
            home.join(".msal-console").join(&config.cache.file_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_file_path_default() {
        let mut config: Config = toml::from_str(include_str!("../config.toml")).unwrap();
        config.cache.path = None;
        let path = cache_file_path(&config);
        assert!(path.ends_with("msal_cache.json"));
    }

    #[test]
    fn test_cache_file_path_override() {
        let mut config: Config = toml::from_str(include_str!("../config.toml")).unwrap();
        config.cache.path = Some(PathBuf::from("/tmp/custom_cache.json"));
        assert_eq!(cache_file_path(&config), PathBuf::from("/tmp/custom_cache.json"));
    }
}
