//! Local record store

mod context;
mod local_store;

pub use context::{LocalContext, StoreLocation};
pub use local_store::{LocalStore, NodePage};
