pub mod apply;
pub mod attributes;
pub mod cli;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
#[cfg(test)]
mod fake;
pub mod gen;
pub mod inspect;
pub mod planner;
pub mod privilege;
pub mod reconcile;
pub mod sql;
pub mod validate;

pub use error::{ReconcileError, ValidationError};
pub use reconcile::{finish, Outcome, Phase, Reconciler};
