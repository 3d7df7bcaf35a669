use anyhow::Result;

use crate::App;
use crate::clients::cache::CacheOps;
use crate::clients::git::GitOps;

impl<G: GitOps, C: CacheOps> App<G, C> {
    /// Configure remotes for one or all mirrors and fetch them.
    pub async fn cmd_setup(
        &self,
        path: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let store = self.load_store()?;
        for mirror in self.select(&store, path)? {
            if self.ensure_remote(mirror).await? {
                writeln!(stdout, "Braid: Set up remote '{}'.", mirror.remote_name())?;
            } else {
                writeln!(
                    stdout,
                    "Braid: Remote '{}' already exists.",
                    mirror.remote_name()
                )?;
            }
            mirror.fetch(&self.git, self.cache()).await?;
        }
        Ok(())
    }
}
