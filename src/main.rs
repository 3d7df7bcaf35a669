use anyhow::Result;
use braid::App;
use braid::Config;
use braid::clients::cache::LocalCache;
use braid::clients::git::GitClient;
use braid::mirror::AddOptions;
use clap::Parser;
use clap::Subcommand;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "braid")]
#[command(about = "Vendor directories from other git repositories and keep track of where they came from", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a new mirror
    Add {
        /// Upstream repository url
        url: String,
        /// Local path of the mirror (defaults to the upstream name)
        local_path: Option<String>,
        /// Upstream branch to track (defaults to master)
        #[arg(long, conflicts_with = "tag")]
        branch: Option<String>,
        /// Upstream tag to track
        #[arg(short, long)]
        tag: Option<String>,
        /// Upstream revision to add
        #[arg(short, long)]
        revision: Option<String>,
        /// Path within the upstream repository to mirror
        #[arg(short, long = "path")]
        path: Option<String>,
    },
    /// Remove a mirror
    Remove {
        local_path: String,
    },
    /// Set up remotes for mirrors and fetch them
    Setup {
        local_path: Option<String>,
    },
    /// Show local changes made to mirrors
    Diff {
        local_path: Option<String>,
        /// Extra arguments for git diff
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Show the state of mirrors
    Status {
        local_path: Option<String>,
    },
}

fn setup_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;
    let cli = Cli::parse();

    let config = Config::load()?;
    let root = GitClient::toplevel(&std::env::current_dir()?).await?;
    let cache = LocalCache::new(config.local_cache_dir.clone());
    let app = App::new(config, GitClient::new(root.clone()), cache, root);
    app.verify_git_version().await?;

    let stdout = &mut std::io::stdout();
    match cli.command {
        Commands::Add {
            url,
            local_path,
            branch,
            tag,
            revision,
            path,
        } => {
            let options = AddOptions {
                branch,
                tag,
                revision,
                path: local_path,
                remote_path: path,
            };
            app.cmd_add(&url, options, stdout).await?
        }
        Commands::Remove { local_path } => app.cmd_remove(&local_path, stdout).await?,
        Commands::Setup { local_path } => app.cmd_setup(local_path.as_deref(), stdout).await?,
        Commands::Diff { local_path, args } => {
            app.cmd_diff(local_path.as_deref(), &args, stdout).await?
        }
        Commands::Status { local_path } => {
            app.cmd_status(local_path.as_deref(), stdout).await?
        }
    }

    Ok(())
}
