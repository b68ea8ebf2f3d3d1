use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

use reconcile::EntityKind;

#[derive(Parser)]
#[command(name = "elabctl")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative manifests for your eLabFTW instance", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Profile from the config file
    #[arg(short, long, global = true, env = "ELABCTL_PROFILE")]
    pub profile: Option<String>,

    /// Instance URL (overrides the profile)
    #[arg(long, global = true, env = "ELABCTL_HOST_URL")]
    pub host_url: Option<String>,

    /// API key (overrides the profile)
    #[arg(long, global = true, env = "ELABCTL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Create, update and patch entities to match the manifests
    Apply(ApplyArgs),

    /// Delete managed entities
    Destroy(DestroyArgs),

    /// Export remote entities as manifests
    Get(GetArgs),

    /// Manage connection profiles
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Reconcile
// ============================================================================

#[derive(Args, Clone, Default)]
pub struct SourceArgs {
    /// Manifest file or directory (defaults to the config's manifest_dir)
    #[arg(short, long)]
    pub manifests: Option<PathBuf>,

    /// Version tag written into managed entities (defaults to the git commit)
    #[arg(long = "version-tag", value_name = "TAG")]
    pub version_tag: Option<String>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Include deletion of managed entities with no manifest
    #[arg(long)]
    pub prune: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Delete managed entities with no manifest
    #[arg(long)]
    pub prune: bool,

    /// Apply to a simulated copy of the remote store
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Number of parallel remote calls
    #[arg(short, long, default_value = "1")]
    pub jobs: usize,

    /// Stop at the first failure
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Manifest file or directory limiting what is destroyed
    #[arg(short, long)]
    pub manifests: Option<PathBuf>,

    /// Destroy every managed entity, not only those in the manifests
    #[arg(long)]
    pub all: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Apply to a simulated copy of the remote store
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

// ============================================================================
// Get
// ============================================================================

#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Args)]
pub struct GetArgs {
    /// Entity kind: item, items_type, experiment, experiments_template
    pub kind: EntityKind,

    /// Include entities not managed by elabctl
    #[arg(long)]
    pub all: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show profiles (API keys masked)
    Show,

    /// Create or update a profile
    Set {
        /// Profile name
        name: String,

        /// Instance URL
        #[arg(long)]
        url: Option<String>,

        /// API key
        #[arg(long)]
        key: Option<String>,

        /// Skip TLS certificate verification
        #[arg(long)]
        insecure: bool,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Remove a profile
    Delete {
        /// Profile name
        name: String,
    },

    /// Print the config file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::parse_from(["elabctl", "apply", "-m", "lab", "-y", "--jobs", "4", "--prune"]);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.source.manifests, Some(PathBuf::from("lab")));
        assert!(args.yes && args.prune);
        assert_eq!(args.jobs, 4);
    }

    #[test]
    fn test_parse_get_kind_alias() {
        let cli = Cli::parse_from(["elabctl", "get", "item_category", "--format", "json"]);
        let Command::Get(args) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(args.kind, EntityKind::ItemCategory);
        assert!(matches!(args.format, OutputFormat::Json));
    }
}
