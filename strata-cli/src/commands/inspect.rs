//! Read-only commands: `show`, `history`, `heads`, `branches` and `current`.

use crate::cli::{BranchesArgs, CurrentArgs, HeadsArgs, HistoryArgs, ShowArgs};
use crate::context::Context;
use crate::error::CliResult;
use crate::output;

fn print_all(lines: &[String]) {
    for line in lines {
        output::plain(line);
    }
}

/// Run `strata show`
pub async fn show(ctx: &Context, args: ShowArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    print_all(&session.show(&args.revisions).await?);
    session.close()?;
    Ok(())
}

/// Run `strata history`
pub async fn history(ctx: &Context, args: HistoryArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    let lines = session
        .history(args.rev_range.as_deref(), args.verbose, args.indicate_current)
        .await?;
    print_all(&lines);
    session.close()?;
    Ok(())
}

/// Run `strata heads`
pub async fn heads(ctx: &Context, args: HeadsArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    print_all(&session.heads(args.verbose, args.resolve_dependencies));
    session.close()?;
    Ok(())
}

/// Run `strata branches`
pub async fn branches(ctx: &Context, args: BranchesArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    print_all(&session.branches(args.verbose));
    session.close()?;
    Ok(())
}

/// Run `strata current`
pub async fn current(ctx: &Context, args: CurrentArgs) -> CliResult<()> {
    let session = ctx.session().await?;
    print_all(&session.current(args.verbose).await?);
    session.close()?;
    Ok(())
}
