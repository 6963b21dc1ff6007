//! `nodes` crate: the `Executor` trait and the minimal built-in executors.
//!
//! Every node type the engine can run, built-in and plugin alike, must
//! implement [`Executor`]. The engine crate dispatches execution through this
//! trait object after resolving the node's config templates.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod traits;

pub use error::NodeError;
pub use traits::{ExecutionContext, Executor};
