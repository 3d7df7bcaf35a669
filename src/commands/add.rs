use anyhow::Context;
use anyhow::Result;
use anyhow::bail;

use crate::App;
use crate::app::short_revision;
use crate::clients::cache::CacheOps;
use crate::clients::git::GitOps;
use crate::mirror::AddOptions;
use crate::mirror::Mirror;
use crate::store::StoreError;

impl<G: GitOps, C: CacheOps> App<G, C> {
    pub async fn cmd_add(
        &self,
        url: &str,
        options: AddOptions,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        self.ensure_clean().await?;
        let mut store = self.load_store()?;

        let requested_revision = options.revision.clone();
        let mut mirror = Mirror::new_from_options(url, options)?;
        if store.contains(mirror.path()) {
            bail!(StoreError::AlreadyExists(mirror.path().to_string()));
        }

        let tracking = match (mirror.branch(), mirror.tag()) {
            (Some(branch), _) => format!("branch '{}'", branch),
            (None, Some(tag)) => format!("tag '{}'", tag),
            (None, None) => "revision".to_string(),
        };
        writeln!(
            stdout,
            "Braid: Adding mirror of '{}' {}.",
            mirror.url().unwrap_or_default(),
            tracking
        )?;

        let created_remote = self.ensure_remote(&mirror).await?;
        let result = self
            .add_mirror(&mut mirror, requested_revision.as_deref(), stdout)
            .await;
        self.release_remote(&mirror, created_remote).await?;
        let revision = result?;

        store.add(mirror.clone())?;
        self.stage_store(&store).await?;
        self.git
            .commit(&format!(
                "Braid: Add mirror '{}' at '{}'",
                mirror.path(),
                short_revision(&revision)
            ))
            .await?;

        writeln!(
            stdout,
            "Braid: Added mirror at '{}'.",
            short_revision(&revision)
        )?;

        Ok(())
    }

    /// Fetch upstream, pin the revision and write the upstream content.
    async fn add_mirror(
        &self,
        mirror: &mut Mirror,
        requested_revision: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<String> {
        mirror.fetch(&self.git, self.cache()).await?;

        let target = match requested_revision {
            Some(revision) => revision.to_string(),
            None => mirror
                .local_ref()
                .context("Mirror has neither a tracked ref nor a revision")?,
        };
        let revision = self
            .git
            .resolve(&format!("{}^{{commit}}", target))
            .await
            .with_context(|| format!("Cannot resolve revision '{}'", target))?;
        mirror.set_revision(Some(revision.clone()));

        let item = mirror.upstream_item(&self.git, &revision).await?;
        self.git.checkout_item(mirror.path(), &item).await?;
        writeln!(
            stdout,
            "Braid: Wrote '{}' from '{}'.",
            mirror.path(),
            short_revision(&revision)
        )?;

        Ok(revision)
    }
}
