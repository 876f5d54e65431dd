//! Wire Protocol
//!
//! - `parser`: turns inbound bytes into a [`Request`] (command name + arguments)
//! - `types`: the [`RespValue`] reply type and its serialization
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{parse_frame, RespValue};
//!
//! let (name, args) = parse_frame(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(name, "GET");
//! assert_eq!(args, vec!["name".to_string()]);
//!
//! assert_eq!(RespValue::integer(3).serialize(), b":3\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_frame, ParseError, ParseResult, Request, RespParser};
pub use types::RespValue;
