use anyhow::Context;
use anyhow::Result;
use colored::Colorize;
use log::warn;

use crate::App;
use crate::app::short_revision;
use crate::clients::cache::CacheOps;
use crate::clients::git::GitOps;
use crate::mirror::Mirror;

impl<G: GitOps, C: CacheOps> App<G, C> {
    pub async fn cmd_status(
        &self,
        path: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let store = self.load_store()?;
        for mirror in self.select(&store, path)? {
            let created_remote = self.ensure_remote(mirror).await?;
            let line = self.status_line(mirror).await;
            self.release_remote(mirror, created_remote).await?;
            writeln!(stdout, "{}", line?)?;
        }
        Ok(())
    }

    async fn status_line(&self, mirror: &Mirror) -> Result<String> {
        mirror.fetch(&self.git, self.cache()).await?;

        let tracking = match (mirror.branch(), mirror.tag()) {
            (Some(branch), _) => format!("[BRANCH={}]", branch),
            (None, Some(tag)) => format!("[TAG={}]", tag),
            (None, None) => "[LOCKED]".to_string(),
        };
        // Without a merged revision there is nothing to compare against
        let Some(revision) = mirror.base_revision(&self.git).await? else {
            warn!("Cannot determine the merged revision of '{}'", mirror.path());
            return Ok(format!("{} (unknown) {}", mirror.path().cyan(), tracking));
        };
        let mut line = format!(
            "{} ({}) {}",
            mirror.path().cyan(),
            short_revision(&revision),
            tracking
        );

        if let Some(local_ref) = mirror.local_ref()
            && !mirror.locked()
        {
            let upstream = self
                .git
                .resolve(&local_ref)
                .await
                .with_context(|| format!("Cannot resolve '{}'", local_ref))?;
            if !mirror.merged(&self.git, &upstream).await? {
                line.push_str(&format!(" {}", "(Remote Modified)".yellow()));
            }
        }

        let diff = mirror.diff(&self.git, self.cache()).await?;
        if !diff.is_empty() {
            line.push_str(&format!(" {}", "(Locally Modified)".red()));
        }

        Ok(line)
    }
}
