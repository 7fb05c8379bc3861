pub mod allocator;
pub mod config;
pub mod derive;
pub mod error;
pub mod git;
pub mod io;
pub mod lock;
pub mod paths;
pub mod reconcile;
pub mod registry;
pub mod renumber;
pub mod roadmap;
pub mod section;
pub mod state;
pub mod table;
pub mod types;

pub use error::{Result, SpecflowError};
