//! Strata CLI - Command-line interface for Strata migrations.

use clap::Parser;

use strata_cli::cli::{Cli, Command};
use strata_cli::commands;
use strata_cli::context::Context;
use strata_cli::error::{CliError, CliResult};
use strata_cli::{logging, output};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.quiet);

    if let Err(e) = run(cli).await {
        output::newline();
        if let CliError::Drift { diffs } = &e {
            for diff in diffs {
                output::list_item(diff);
            }
        }
        output::error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let ctx = Context::new(cli.config, cli.quiet);

    match cli.command {
        Command::ListTemplates => commands::templates::list(),
        Command::Init(args) => commands::templates::init(&ctx, args).await,
        Command::Revision(args) => commands::revision::revision(&ctx, args).await,
        Command::Merge(args) => commands::revision::merge(&ctx, args).await,
        Command::Edit(args) => commands::revision::edit(&ctx, args).await,
        Command::Check => commands::check::check(&ctx).await,
        Command::Startup(args) => commands::check::startup(&ctx, args).await,
        Command::Upgrade(args) => commands::upgrade::upgrade(&ctx, args).await,
        Command::Downgrade(args) => commands::upgrade::downgrade(&ctx, args).await,
        Command::Stamp(args) => commands::upgrade::stamp(&ctx, args).await,
        Command::Sync(args) => commands::upgrade::sync(&ctx, args).await,
        Command::EnsureVersion(args) => commands::upgrade::ensure_version(&ctx, args).await,
        Command::Show(args) => commands::inspect::show(&ctx, args).await,
        Command::History(args) => commands::inspect::history(&ctx, args).await,
        Command::Heads(args) => commands::inspect::heads(&ctx, args).await,
        Command::Branches(args) => commands::inspect::branches(&ctx, args).await,
        Command::Current(args) => commands::inspect::current(&ctx, args).await,
    }
}
