use anyhow::Result;

use crate::App;
use crate::clients::cache::CacheOps;
use crate::clients::git::GitOps;

const BANNER: &str = "=======================================================";

impl<G: GitOps, C: CacheOps> App<G, C> {
    /// Show local changes made to one or all mirrors.
    pub async fn cmd_diff(
        &self,
        path: Option<&str>,
        user_args: &[String],
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let store = self.load_store()?;
        for mirror in self.select(&store, path)? {
            if path.is_none() {
                writeln!(stdout, "{}", BANNER)?;
                writeln!(stdout, "Braid: Diffing {}", mirror.path())?;
                writeln!(stdout, "{}", BANNER)?;
            }

            let created_remote = self.ensure_remote(mirror).await?;
            let diff = mirror.diff_with(&self.git, self.cache(), user_args).await;
            self.release_remote(mirror, created_remote).await?;
            write!(stdout, "{}", diff?)?;
        }
        Ok(())
    }
}
