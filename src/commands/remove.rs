use anyhow::Result;

use crate::App;
use crate::clients::cache::CacheOps;
use crate::clients::git::GitOps;

impl<G: GitOps, C: CacheOps> App<G, C> {
    pub async fn cmd_remove(&self, path: &str, stdout: &mut impl std::io::Write) -> Result<()> {
        self.ensure_clean().await?;
        let mut store = self.load_store()?;
        let mirror = store.remove(path)?;

        self.git.remove_path(mirror.path()).await?;
        mirror.clear_remote(&self.git).await?;
        self.stage_store(&store).await?;
        self.git
            .commit(&format!("Braid: Remove mirror '{}'", mirror.path()))
            .await?;

        writeln!(stdout, "Braid: Removed mirror '{}'.", mirror.path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use crate::App;
    use crate::clients::cache::MockCacheOps;
    use crate::clients::git::MockGitOps;
    use crate::config::Config;
    use crate::store::STORE_FILE;

    #[tokio::test]
    async fn test_cmd_remove() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(STORE_FILE),
            r#"{"config_version": 1, "mirrors": {
                "vendor/a": {"url": "git://a", "branch": "main", "revision": "abc"},
                "vendor/b": {"url": "git://b", "tag": "v1", "revision": "def"}
            }}"#,
        )
        .unwrap();

        let mut git = MockGitOps::new();
        git.expect_is_clean().returning(|| Ok(true));
        git.expect_remove_path()
            .with(eq("vendor/a"))
            .times(1)
            .returning(|_| Ok(()));
        git.expect_remote_exists()
            .with(eq("main/braid/vendor/a"))
            .returning(|_| Ok(true));
        git.expect_remote_remove()
            .with(eq("main/braid/vendor/a"))
            .times(1)
            .returning(|_| Ok(()));
        git.expect_add_path().returning(|_| Ok(()));
        git.expect_commit()
            .with(eq("Braid: Remove mirror 'vendor/a'"))
            .times(1)
            .returning(|_| Ok(()));

        let app = App::new(
            Config::default_for_tests(),
            git,
            MockCacheOps::new(),
            dir.path().to_path_buf(),
        );
        let mut stdout = Vec::new();
        app.cmd_remove("vendor/a/", &mut stdout).await.unwrap();

        let saved = std::fs::read_to_string(dir.path().join(STORE_FILE)).unwrap();
        assert!(!saved.contains("vendor/a"));
        assert!(saved.contains("vendor/b"));
    }

    #[tokio::test]
    async fn test_cmd_remove_unknown_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mut git = MockGitOps::new();
        git.expect_is_clean().returning(|| Ok(true));
        git.expect_remove_path().never();

        let app = App::new(
            Config::default_for_tests(),
            git,
            MockCacheOps::new(),
            dir.path().to_path_buf(),
        );
        let mut stdout = Vec::new();
        let err = app.cmd_remove("vendor/x", &mut stdout).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
