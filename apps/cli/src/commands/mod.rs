//! Command implementations.

pub mod predict;
pub mod promote;
pub mod runs;
pub mod train;

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum RunsCommand {
    /// List recorded runs, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one run record as JSON
    Show {
        /// Run ID
        run_id: String,
    },
}
