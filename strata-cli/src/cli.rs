//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CONFIG_FILE_NAME;

/// Strata CLI - Schema migrations for plugin-based applications
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Strata CLI - Schema migrations for plugin-based applications", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "STRATA_CONFIG", default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available script directory templates
    #[command(name = "list_templates", alias = "list-templates")]
    ListTemplates,

    /// Initialize a new script directory
    Init(InitArgs),

    /// Create a new revision script
    Revision(RevisionArgs),

    /// Check whether the database is up to date with the declared models
    Check,

    /// Merge several revisions into one
    Merge(MergeArgs),

    /// Upgrade to a later revision
    Upgrade(UpgradeArgs),

    /// Revert to an earlier revision
    Downgrade(DowngradeArgs),

    /// Rebuild the database schema from the declared models
    Sync(SyncArgs),

    /// Show revision details
    Show(ShowArgs),

    /// List revision history in chronological order
    History(HistoryArgs),

    /// Show current available heads
    Heads(HeadsArgs),

    /// Show current branch points
    Branches(BranchesArgs),

    /// Show the current revision of each database
    Current(CurrentArgs),

    /// Record revisions as applied without running migrations
    Stamp(StampArgs),

    /// Open a revision script in an editor
    Edit(EditArgs),

    /// Create the version table if it does not exist
    #[command(name = "ensure_version", alias = "ensure-version")]
    EnsureVersion(EnsureVersionArgs),

    /// Run the application startup check
    Startup(StartupArgs),
}

// =============================================================================
// Templates
// =============================================================================

/// Arguments for the `init` command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to create (defaults to the configured script location)
    pub directory: Option<PathBuf>,

    /// Template to use
    #[arg(short, long, default_value = "generic")]
    pub template: String,

    /// Write placeholder files so empty directories survive packaging
    #[arg(long)]
    pub package: bool,
}

// =============================================================================
// Revisions
// =============================================================================

/// Arguments for the `revision` command
#[derive(Args, Debug)]
pub struct RevisionArgs {
    /// Revision message
    #[arg(short, long)]
    pub message: Option<String>,

    /// Write an empty revision instead of comparing with the database
    #[arg(long)]
    pub sql: bool,

    /// Revision to base the new one on
    #[arg(long, default_value = "head")]
    pub head: String,

    /// Allow a non-head revision as the parent
    #[arg(long)]
    pub splice: bool,

    /// Branch label for the new revision
    #[arg(long)]
    pub branch_label: Option<String>,

    /// Directory to write the revision to
    #[arg(long)]
    pub version_path: Option<PathBuf>,

    /// Use this revision id instead of a generated one
    #[arg(long)]
    pub rev_id: Option<String>,

    /// Revisions the new one depends on
    #[arg(long, value_delimiter = ',')]
    pub depends_on: Vec<String>,
}

/// Arguments for the `merge` command
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Revisions to merge
    #[arg(required = true)]
    pub revisions: Vec<String>,

    /// Revision message
    #[arg(short, long)]
    pub message: Option<String>,

    /// Branch label for the merge revision
    #[arg(long)]
    pub branch_label: Option<String>,

    /// Use this revision id instead of a generated one
    #[arg(long)]
    pub rev_id: Option<String>,
}

/// Arguments for the `edit` command
#[derive(Args, Debug)]
pub struct EditArgs {
    /// Revision to edit
    #[arg(default_value = "current")]
    pub revision: String,
}

// =============================================================================
// Running migrations
// =============================================================================

/// Arguments for the `upgrade` command
#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Target revision, or `start:end` with --sql
    #[arg(default_value = "heads")]
    pub revision: String,

    /// Print SQL instead of running it
    #[arg(long)]
    pub sql: bool,

    /// Arbitrary tag passed to reports and SQL output
    #[arg(long)]
    pub tag: Option<String>,

    /// Create the declared tables directly on an empty database
    #[arg(long)]
    pub fast: bool,
}

/// Arguments for the `downgrade` command
#[derive(Args, Debug)]
pub struct DowngradeArgs {
    /// Target revision, or `start:end` with --sql
    pub revision: String,

    /// Print SQL instead of running it
    #[arg(long)]
    pub sql: bool,

    /// Arbitrary tag passed to reports and SQL output
    #[arg(long)]
    pub tag: Option<String>,
}

/// Arguments for the `sync` command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Replay revisions up to this one instead of using the declared models
    pub revision: Option<String>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the `stamp` command
#[derive(Args, Debug)]
pub struct StampArgs {
    /// Revisions to record
    #[arg(default_value = "heads")]
    pub revisions: Vec<String>,

    /// Print SQL instead of running it
    #[arg(long)]
    pub sql: bool,

    /// Arbitrary tag passed to reports and SQL output
    #[arg(long)]
    pub tag: Option<String>,

    /// Delete every version row first, unknown ones included
    #[arg(long)]
    pub purge: bool,
}

/// Arguments for the `ensure_version` command
#[derive(Args, Debug)]
pub struct EnsureVersionArgs {
    /// Print SQL instead of running it
    #[arg(long)]
    pub sql: bool,
}

// =============================================================================
// Inspection
// =============================================================================

/// Arguments for the `show` command
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Revisions to show
    #[arg(default_value = "heads")]
    pub revisions: Vec<String>,
}

/// Arguments for the `history` command
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Range in `[start]:[end]` form
    #[arg(short, long)]
    pub rev_range: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Mark the current revisions
    #[arg(short, long)]
    pub indicate_current: bool,
}

/// Arguments for the `heads` command
#[derive(Args, Debug)]
pub struct HeadsArgs {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Treat dependency versions as down revisions
    #[arg(long)]
    pub resolve_dependencies: bool,
}

/// Arguments for the `branches` command
#[derive(Args, Debug)]
pub struct BranchesArgs {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Arguments for the `current` command
#[derive(Args, Debug)]
pub struct CurrentArgs {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Arguments for the `startup` command
#[derive(Args, Debug)]
pub struct StartupArgs {
    /// Create the declared tables directly on an empty database
    #[arg(long)]
    pub fast: bool,

    /// Accept every offered fix without prompting
    #[arg(short, long)]
    pub yes: bool,
}
