//! `strata check` and `strata startup`.

use crate::cli::StartupArgs;
use crate::context::Context;
use crate::error::CliResult;
use crate::output;

/// Run `strata check`
pub async fn check(ctx: &Context) -> CliResult<()> {
    let session = ctx.session().await?;
    session.check().await?;
    session.close()?;
    Ok(())
}

/// Run `strata startup`
pub async fn startup(ctx: &Context, args: StartupArgs) -> CliResult<()> {
    let config = ctx.config()?;
    if !config.migrations.startup_check {
        ctx.info("Startup check is disabled in the configuration.");
        return Ok(());
    }

    let mut session = ctx.session().await?;
    let yes = args.yes;
    session
        .startup_check(args.fast, |question| yes || output::confirm(question))
        .await?;
    session.close()?;
    Ok(())
}
