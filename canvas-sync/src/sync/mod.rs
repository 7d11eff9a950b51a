pub mod mirror;
pub mod paths;
pub mod prune;
pub mod reconcile;
pub mod transfer;
