//! Costing CLI: the `costing` command.

mod cli;
mod commands;
mod config;
mod jobs;
mod support;

use clap::Parser;
use cli::{Cli, Commands, DocCommands};
use commands::ledger::LedgerOp;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    let config = support::load_config_or_exit(&cli.config);
    init_tracing(&config.log_filter);

    match cli.command {
        Commands::Import {
            file,
            tree,
            by_level,
            sort_by_level,
            json,
        } => commands::import::run(&config, file, tree, by_level, sort_by_level, json),

        Commands::Tree { tree, json } => commands::tree::run_show(&config, tree, json),

        Commands::Check { json } => commands::tree::run_check(&config, json),

        Commands::Reserve { node, qty, json } => {
            commands::ledger::run_op(&config, LedgerOp::Reserve, node, qty, None, json)
        }

        Commands::Release { node, qty, json } => {
            commands::ledger::run_op(&config, LedgerOp::Release, node, qty, None, json)
        }

        Commands::OrderReserve { node, qty, json } => {
            commands::ledger::run_op(&config, LedgerOp::OrderReserve, node, qty, None, json)
        }

        Commands::OrderRelease { node, qty, json } => {
            commands::ledger::run_op(&config, LedgerOp::OrderRelease, node, qty, None, json)
        }

        Commands::PettyCash {
            node,
            qty,
            amount,
            json,
        } => commands::ledger::run_op(&config, LedgerOp::PettyCash, node, qty, Some(amount), json),

        Commands::Doc { command } => match command {
            DocCommands::Submit { file, json } => commands::doc::run_submit(&config, file, json),
            DocCommands::Cancel { id, json } => commands::doc::run_cancel(&config, id, json),
            DocCommands::Status { node, json } => commands::doc::run_status(&config, node, json),
        },

        Commands::Reconcile {
            include_drafts,
            json,
        } => commands::reconcile::run(&config, include_drafts, json),

        Commands::Delete { root, json } => commands::delete::run(&config, root, json),

        Commands::Ledger { node, json } => commands::ledger::run_show(&config, node, json),

        Commands::Compact { json } => commands::ledger::run_compact(&config, json),
    }
}

/// `RUST_LOG` wins over the configured filter. Logs go to stderr so `--json`
/// output on stdout stays parseable.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
