use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(
    name = "costing",
    about = "WBS costing: hierarchy import and quantity reservation ledger",
    version
)]
pub struct Cli {
    /// Path to the workspace config TOML
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a CSV/TSV cost sheet into one tree
    Import {
        /// Path to the .csv or .tsv file
        file: String,

        /// Tree (BOQ) identifier the rows belong to
        #[arg(long)]
        tree: String,

        /// Link parents from the explicit Level column instead of codes
        #[arg(long)]
        by_level: bool,

        /// Process rows in ascending level order
        #[arg(long)]
        sort_by_level: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the node hierarchy
    Tree {
        /// Restrict to one tree
        #[arg(long)]
        tree: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check tree invariants (parent links, levels, group flags)
    Check {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reserve quantity against a leaf for an approved request
    Reserve {
        node: String,
        qty: Decimal,

        #[arg(long)]
        json: bool,
    },

    /// Release a request reservation
    Release {
        node: String,
        qty: Decimal,

        #[arg(long)]
        json: bool,
    },

    /// Reserve quantity for a purchase order
    OrderReserve {
        node: String,
        qty: Decimal,

        #[arg(long)]
        json: bool,
    },

    /// Release a purchase-order reservation
    OrderRelease {
        node: String,
        qty: Decimal,

        #[arg(long)]
        json: bool,
    },

    /// Record a petty-cash receipt (not reversible)
    PettyCash {
        node: String,
        qty: Decimal,

        /// Receipt amount
        #[arg(long, default_value = "0")]
        amount: Decimal,

        #[arg(long)]
        json: bool,
    },

    /// Document lifecycle events
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },

    /// Recompute derived ledger counters from document state
    Reconcile {
        /// Count draft documents as well as submitted ones
        #[arg(long)]
        include_drafts: bool,

        #[arg(long)]
        json: bool,
    },

    /// Delete a node and its subtree, stripping document links first
    Delete {
        /// Root node key
        root: String,

        #[arg(long)]
        json: bool,
    },

    /// Show ledger entries
    Ledger {
        /// One node key; omit for every entry
        node: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Rewrite the ledger journal as one record per live entry
    Compact {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum DocCommands {
    /// Submit a document read from a JSON file and apply its ledger effect
    Submit {
        /// Path to the document JSON
        file: String,

        #[arg(long)]
        json: bool,
    },

    /// Cancel a submitted document and revert its ledger effect
    Cancel {
        /// Document id
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Summarize linked documents by kind and status for one node
    Status {
        node: String,

        #[arg(long)]
        json: bool,
    },
}
