//! Value types shared by every component: task identity, job and worker
//! states, and executable commands.

pub mod command;
pub mod identity;
pub mod state;

pub use command::*;
pub use identity::*;
pub use state::*;
