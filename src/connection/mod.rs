//! Client Connections
//!
//! Each accepted socket gets its own task running a [`ConnectionHandler`].
//! All tasks share one [`CommandHandler`](crate::commands::CommandHandler)
//! and through it one store.
//!
//! ```ignore
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone()));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler};
