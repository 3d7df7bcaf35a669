#![allow(async_fn_in_trait)]

use std::path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;
use tracing::instrument;

// -----------------------------------------------------------------------------
// CacheOps trait

/// A shared, per-user cache of bare upstream clones.
#[cfg_attr(test, automock)]
pub trait CacheOps {
    /// Location of the cached clone for `url`.
    fn path_for(&self, url: &str) -> path::PathBuf;

    /// Create or update the cached clone for `url`.
    async fn fetch(&self, url: &str) -> Result<()>;
}

// -----------------------------------------------------------------------------
// LocalCache

pub struct LocalCache {
    dir: path::PathBuf,
}

impl LocalCache {
    pub fn new(dir: path::PathBuf) -> Self {
        Self { dir }
    }

    async fn git(&self, dir: &path::Path, args: &[&str]) -> Result<()> {
        debug!("git {} (in {})", args.join(" "), dir.display());
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .await
            .context("Failed to execute git command")?;

        if !output.status.success() {
            bail!(
                "git command failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(())
    }
}

impl CacheOps for LocalCache {
    fn path_for(&self, url: &str) -> path::PathBuf {
        self.dir.join(url.replace(['/', ':', '@', '\\'], "_"))
    }

    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<()> {
        let target = self.path_for(url);
        if target.exists() {
            return self.git(&target, &["fetch", "-q", "--prune"]).await;
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache directory {}", self.dir.display()))?;

        // Clone next to the final location and only move it into place once
        // the clone is complete. The staging directory is removed on drop.
        let staging = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(&self.dir)
            .context("Failed to create cache staging directory")?;
        let clone = staging.path().join("repo");
        let clone_arg = clone.to_string_lossy();
        self.git(staging.path(), &["clone", "--mirror", "-q", url, &clone_arg])
            .await
            .with_context(|| format!("Failed to populate cache for {}", url))?;

        tokio::fs::rename(&clone, &target)
            .await
            .with_context(|| format!("Failed to move cache into {}", target.display()))?;

        Ok(())
    }
}
