//! CLI command implementations.

pub mod check;
pub mod inspect;
pub mod revision;
pub mod templates;
pub mod upgrade;

use strata_migrate::OfflineScript;

use crate::output;

/// Print SQL scripts, one per bind.
pub(crate) fn print_scripts(scripts: &[OfflineScript]) {
    let labelled = scripts.len() > 1;
    for script in scripts {
        output::sql(&script.bind, &script.sql, labelled);
    }
}
