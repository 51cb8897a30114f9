//! Command implementations: thin wrappers over the core library.

pub mod build;
pub mod clean;
pub mod contigs;
pub mod healthcheck;
pub mod inferedges;
pub mod join;
pub mod pjoin;
pub mod pview;
pub mod supernodes;
pub mod thread;
pub mod view;

pub use build::BuildCommand;
pub use clean::CleanCommand;
pub use contigs::ContigsCommand;
pub use healthcheck::HealthcheckCommand;
pub use inferedges::InferEdgesCommand;
pub use join::JoinCommand;
pub use pjoin::PjoinCommand;
pub use pview::PviewCommand;
pub use supernodes::SupernodesCommand;
pub use thread::ThreadCommand;
pub use view::ViewCommand;
