//! Commands that change the database: `upgrade`, `downgrade`, `stamp`,
//! `sync` and `ensure_version`.

use strata_migrate::RunOptions;
use tracing::info;

use crate::cli::{DowngradeArgs, EnsureVersionArgs, StampArgs, SyncArgs, UpgradeArgs};
use crate::commands::print_scripts;
use crate::context::Context;
use crate::error::{CliError, CliResult};
use crate::output;

/// Run `strata upgrade`
pub async fn upgrade(ctx: &Context, args: UpgradeArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    if args.sql {
        print_scripts(&session.upgrade_sql(&args.revision, args.tag)?);
    } else {
        session
            .upgrade(
                &args.revision,
                &RunOptions {
                    tag: args.tag,
                    fast: args.fast,
                },
            )
            .await?;
    }
    session.close()?;
    Ok(())
}

/// Run `strata downgrade`
pub async fn downgrade(ctx: &Context, args: DowngradeArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    if args.sql {
        print_scripts(&session.downgrade_sql(&args.revision, args.tag)?);
    } else {
        session
            .downgrade(
                &args.revision,
                &RunOptions {
                    tag: args.tag,
                    fast: false,
                },
            )
            .await?;
    }
    session.close()?;
    Ok(())
}

/// Run `strata stamp`
pub async fn stamp(ctx: &Context, args: StampArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    if args.sql {
        let [revision] = args.revisions.as_slice() else {
            return Err(CliError::Command(
                "stamp with --sql accepts exactly one revision".to_string(),
            ));
        };
        print_scripts(&session.stamp_sql(revision, args.purge, args.tag)?);
    } else {
        if let Some(tag) = &args.tag {
            info!(tag = %tag, "Stamping");
        }
        session.stamp(&args.revisions, args.purge).await?;
    }
    session.close()?;
    Ok(())
}

/// Run `strata sync`
pub async fn sync(ctx: &Context, args: SyncArgs) -> CliResult<()> {
    if !args.yes {
        output::warn("Tables that differ from the declared models will be dropped and recreated!");
        if !output::confirm("Are you sure you want to sync the database?") {
            ctx.info("Sync cancelled.");
            return Ok(());
        }
    }

    let session = ctx.session().await?;
    session.sync(args.revision.as_deref()).await?;
    session.close()?;
    Ok(())
}

/// Run `strata ensure_version`
pub async fn ensure_version(ctx: &Context, args: EnsureVersionArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    if args.sql {
        print_scripts(&session.ensure_version_sql());
    } else {
        session.ensure_version().await?;
        ctx.success("Version table is ready");
    }
    session.close()?;
    Ok(())
}
