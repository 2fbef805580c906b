//! Credential and endpoint resolution.

use std::path::PathBuf;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Resolve the API key from the sources in priority order: the `--api-key`
/// flag (which clap also fills from `KILN_API_KEY`), then the config file
/// line `api_key=<key>`.
pub fn resolve_api_key(flag: Option<&str>) -> Option<String> {
    resolve_api_key_from(flag, read_config_file().as_deref())
}

fn resolve_api_key_from(flag: Option<&str>, config_contents: Option<&str>) -> Option<String> {
    if let Some(key) = flag {
        return Some(key.to_string());
    }
    let contents = config_contents?;
    for line in contents.lines() {
        let line = line.trim();
        if let Some(key) = line.strip_prefix("api_key=") {
            return Some(key.trim().to_string());
        }
    }
    None
}

/// `~/.kiln/config`, a plain `key=value` file.
pub fn config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kiln").join("config"))
}

fn read_config_file() -> Option<String> {
    std::fs::read_to_string(config_path()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_config_file() {
        let resolved = resolve_api_key_from(Some("ci_flag"), Some("api_key=ci_file\n"));
        assert_eq!(resolved.as_deref(), Some("ci_flag"));
    }

    #[test]
    fn config_file_is_the_fallback() {
        let contents = "# kiln client config\nserver=ignored\napi_key=ci_file\n";
        let resolved = resolve_api_key_from(None, Some(contents));
        assert_eq!(resolved.as_deref(), Some("ci_file"));
    }

    #[test]
    fn whitespace_around_the_value_is_trimmed() {
        let resolved = resolve_api_key_from(None, Some("  api_key=ci_padded  \n"));
        assert_eq!(resolved.as_deref(), Some("ci_padded"));
    }

    #[test]
    fn nothing_resolves_to_none() {
        assert_eq!(resolve_api_key_from(None, None), None);
        assert_eq!(resolve_api_key_from(None, Some("other=1\n")), None);
    }
}
