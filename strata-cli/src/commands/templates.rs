//! `strata list_templates` and `strata init`.

use std::path::{Path, PathBuf};

use strata_migrate::list_templates;

use crate::cli::InitArgs;
use crate::config::Config;
use crate::context::Context;
use crate::error::CliResult;
use crate::output;

/// Run `strata list_templates`
pub fn list() -> CliResult<()> {
    output::plain("Available templates:");
    output::newline();
    for template in list_templates() {
        output::plain(&format!("{} - {}", template.name, template.synopsis()));
    }
    output::newline();
    output::plain("Templates are used via the 'init' command, e.g.:");
    output::newline();
    output::plain("  strata init --template generic ./migrations");
    Ok(())
}

/// Run `strata init`
pub async fn init(ctx: &Context, args: InitArgs) -> CliResult<()> {
    let config = ctx.config()?;
    let dir = args.directory.unwrap_or_else(|| config.script_location());

    ctx.info(&format!(
        "Initializing {} from template '{}'",
        dir.display(),
        args.template
    ));

    let created = strata_migrate::init(&dir, &args.template, args.package).await?;
    if !ctx.quiet() {
        for path in &created {
            output::list_item(&format!("Creating {}", path.display()));
        }
        output::newline();
    }

    let config_path = ctx.config_path();
    if !config_path.exists() {
        let base = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut fresh = Config::default();
        fresh.migrations.script_location = Some(
            dir.strip_prefix(&base)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| dir.clone()),
        );
        fresh.save(config_path)?;
        ctx.info(&format!("Created {}", config_path.display()));
    }

    ctx.success(&format!(
        "Please edit database and plugin settings in {} before proceeding.",
        config_path.display()
    ));
    Ok(())
}
