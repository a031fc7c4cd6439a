pub mod delete;
pub mod doc;
pub mod import;
pub mod ledger;
pub mod reconcile;
pub mod tree;
