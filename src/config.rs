use std::path::PathBuf;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    /// Fetch upstreams through the shared local cache.
    pub use_local_cache: bool,
    pub local_cache_dir: PathBuf,
}

impl Config {
    /// Load config from the environment, falling back to git config.
    pub fn load() -> Result<Self> {
        let use_local_cache = match std::env::var("BRAID_USE_LOCAL_CACHE") {
            Ok(value) => parse_bool(&value),
            Err(_) => git_config("braid.useLocalCache")?
                .map(|value| parse_bool(&value))
                .unwrap_or(false),
        };

        let local_cache_dir = match std::env::var("BRAID_LOCAL_CACHE_DIR") {
            Ok(value) => PathBuf::from(value),
            Err(_) => match git_config("braid.localCacheDir")? {
                Some(value) => PathBuf::from(value),
                None => Self::default_local_cache_dir(),
            },
        };

        Ok(Self {
            use_local_cache,
            local_cache_dir,
        })
    }

    /// Create a new config with explicit values (useful for tests)
    pub fn new(use_local_cache: bool, local_cache_dir: PathBuf) -> Self {
        Self {
            use_local_cache,
            local_cache_dir,
        }
    }

    /// Default config for tests
    pub fn default_for_tests() -> Self {
        Self {
            use_local_cache: false,
            local_cache_dir: std::env::temp_dir().join("braid-cache"),
        }
    }

    /// `$HOME/.braid/cache`, or a relative `.braid/cache` if HOME is not set
    pub fn default_local_cache_dir() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(".braid")
            .join("cache")
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Read a single git config value; `None` if the key is not set.
fn git_config(key: &str) -> Result<Option<String>> {
    let output = std::process::Command::new("git")
        .args(["config", "--get", key])
        .output()?;

    // Exit code 1 means the key is not set
    if !output.status.success() {
        return Ok(None);
    }

    Ok(Some(String::from_utf8(output.stdout)?.trim().to_string()))
}
