//! `strata revision`, `strata merge` and `strata edit`.

use strata_migrate::RevisionOptions;

use crate::cli::{EditArgs, MergeArgs, RevisionArgs};
use crate::context::Context;
use crate::error::{CliError, CliResult};

/// Run `strata revision`
pub async fn revision(ctx: &Context, args: RevisionArgs) -> CliResult<()> {
    let mut session = ctx.session().await?;
    session
        .revision(RevisionOptions {
            message: args.message,
            autogenerate: !args.sql,
            head: args.head,
            splice: args.splice,
            branch_label: args.branch_label,
            version_path: args.version_path,
            rev_id: args.rev_id,
            depends_on: args.depends_on,
        })
        .await?;
    session.close()?;
    Ok(())
}

/// Run `strata merge`
pub async fn merge(ctx: &Context, args: MergeArgs) -> CliResult<()> {
    let mut session = ctx.session().await?;
    session
        .merge(&args.revisions, args.message, args.branch_label, args.rev_id)
        .await?;
    session.close()?;
    Ok(())
}

/// Run `strata edit`
pub async fn edit(ctx: &Context, args: EditArgs) -> CliResult<()> {
    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .map_err(|_| CliError::Command("set $EDITOR or $VISUAL to edit revisions".to_string()))?;
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(CliError::Command("$EDITOR is empty".to_string()));
    };
    let extra: Vec<&str> = parts.collect();

    let mut session = ctx.session().await?;
    for path in session.edit_targets(&args.revision).await? {
        let status = tokio::process::Command::new(program)
            .args(&extra)
            .arg(&path)
            .status()
            .await?;
        if !status.success() {
            return Err(CliError::Command(format!(
                "{} exited with {}",
                program, status
            )));
        }
    }
    session.close()?;
    Ok(())
}
