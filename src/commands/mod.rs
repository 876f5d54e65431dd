//! Commands
//!
//! Turns a parsed [`Request`](crate::protocol::Request) into a store
//! operation and a reply.
//!
//! ```text
//! Request ──> CommandHandler ──> Store
//!                  │
//!                  └─ SET options ──> SetPlan (options module)
//! ```

pub mod handler;
pub mod options;

pub use handler::{CommandError, CommandHandler};
pub use options::{Condition, OptionError, SetOption, SetPlan, TtlPolicy};
