//! Request Parser
//!
//! Requests arrive as multi-bulk frames:
//!
//! ```text
//! *3\r\n          header: number of tokens
//! $3\r\nSET\r\n   length marker, then the token
//! $1\r\nk\r\n
//! $1\r\nv\r\n
//! ```
//!
//! The first token is the command name, the rest are its arguments.
//!
//! The parser is incremental. It returns:
//! - `Ok(Some((request, consumed)))` when a whole frame is buffered
//! - `Ok(None)` when more bytes are needed
//! - `Err(ParseError)` when the bytes can never form a valid frame
//!
//! The header count is what lets pipelined frames be split on a stream, and
//! the declared lengths keep tokens binary-safe: a token may itself contain
//! CRLF. A token not followed by CRLF exactly at its declared length is a
//! protocol error.
//!
//! Lines that do not start with `*` are inline commands and are split on
//! whitespace.

use crate::protocol::types::{prefix, CRLF};
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur while parsing a request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The frame ended before all declared tokens arrived
    #[error("incomplete frame")]
    Incomplete,

    /// A header or length marker is not a number
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A token is not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, bad marker, ...)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size of a single token (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of tokens in one frame
pub const MAX_ARGS: usize = 1024 * 1024;

/// A parsed request: command name plus its arguments, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: String,
    pub args: Vec<String>,
}

impl Request {
    /// Builds a request from a token list. Returns `None` for an empty list.
    pub fn from_tokens(mut tokens: Vec<String>) -> Option<Self> {
        if tokens.is_empty() {
            return None;
        }
        let args = tokens.split_off(1);
        let name = tokens.pop()?;
        Some(Self { name, args })
    }
}

/// Incremental request parser.
///
/// # Example
///
/// ```
/// use emberkv::protocol::RespParser;
///
/// let mut parser = RespParser::new();
/// let (request, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(request.name, "GET");
/// assert_eq!(request.args, vec!["name"]);
/// assert_eq!(consumed, 23);
/// ```
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        Self
    }

    /// Attempts to parse one request from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        match buf[0] {
            prefix::ARRAY => self.parse_multibulk(buf),
            _ => self.parse_inline(buf),
        }
    }

    /// Parses `*<count>\r\n` followed by `count` bulk tokens.
    fn parse_multibulk(&mut self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let Some(header_end) = find_crlf(&buf[1..]) else {
            return Ok(None);
        };

        let count = parse_int(&buf[1..1 + header_end])?;
        if count <= 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count > MAX_ARGS {
            return Err(ParseError::MessageTooLarge {
                size: count,
                max: MAX_ARGS,
            });
        }

        let mut consumed = 1 + header_end + 2;
        let mut tokens = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            match self.parse_token(&buf[consumed..])? {
                Some((token, used)) => {
                    tokens.push(token);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        let request = Request::from_tokens(tokens)
            .ok_or_else(|| ParseError::ProtocolError("empty command".to_string()))?;
        Ok(Some((request, consumed)))
    }

    /// Parses `$<len>\r\n<token>\r\n`.
    fn parse_token(&mut self, buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf[0] != prefix::BULK_STRING {
            return Err(ParseError::ProtocolError(format!(
                "expected '$', got {:?}",
                buf[0] as char
            )));
        }

        let Some(len_end) = find_crlf(&buf[1..]) else {
            return Ok(None);
        };

        let length = parse_int(&buf[1..1 + len_end])?;
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }
        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let data_start = 1 + len_end + 2;
        let total = data_start + length + 2;
        if buf.len() < total {
            return Ok(None);
        }

        if &buf[data_start + length..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk token length does not match its line".to_string(),
            ));
        }

        let token = std::str::from_utf8(&buf[data_start..data_start + length])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        Ok(Some((token.to_string(), total)))
    }

    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let Some(crlf_pos) = find_crlf(buf) else {
            return Ok(None);
        };

        let line = std::str::from_utf8(&buf[..crlf_pos])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let request = Request::from_tokens(tokens)
            .ok_or_else(|| ParseError::ProtocolError("empty inline command".to_string()))?;

        Ok(Some((request, crlf_pos + 2)))
    }
}

fn parse_int(line: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(format!("{:?}: {}", s, e)))
}

/// Finds the position of the first CRLF.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses one complete frame into `(command name, arguments)`.
///
/// Trailing bytes after the frame are ignored; an unfinished frame is
/// `ParseError::Incomplete`.
pub fn parse_frame(buf: &[u8]) -> ParseResult<(String, Vec<String>)> {
    match RespParser::new().parse(buf)? {
        Some((request, _)) => Ok((request.name, request.args)),
        None => Err(ParseError::Incomplete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_and_arguments() {
        let (name, args) = parse_frame(b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n").unwrap();
        assert_eq!(name, "SET");
        assert_eq!(args, vec!["user:101", "Ariz"]);
    }

    #[test]
    fn test_parse_no_arguments() {
        let (name, args) = parse_frame(b"*1\r\n$4\r\nPING\r\n").unwrap();
        assert_eq!(name, "PING");
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_reports_consumed_bytes() {
        let mut parser = RespParser::new();
        let input = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (_, consumed) = parser.parse(input).unwrap().unwrap();
        assert_eq!(consumed, 14);
        let (request, rest) = parser.parse(&input[consumed..]).unwrap().unwrap();
        assert_eq!(request.name, "PING");
        assert_eq!(rest, 14);
    }

    #[test]
    fn test_parse_incomplete() {
        let mut parser = RespParser::new();
        assert!(parser.parse(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
        assert!(parser.parse(b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap().is_none());
        assert!(parser.parse(b"*2").unwrap().is_none());
        assert_eq!(parse_frame(b"*2\r\n$3\r\nGET\r\n"), Err(ParseError::Incomplete));
    }

    #[test]
    fn test_parse_empty_token() {
        let (name, args) = parse_frame(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n").unwrap();
        assert_eq!(name, "SET");
        assert_eq!(args, vec!["k", ""]);
    }

    #[test]
    fn test_token_may_contain_crlf() {
        let (_, args) = parse_frame(b"*2\r\n$4\r\nECHO\r\n$4\r\na\r\nb\r\n").unwrap();
        assert_eq!(args, vec!["a\r\nb"]);
    }

    #[test]
    fn test_declared_length_mismatch_is_rejected() {
        let result = parse_frame(b"*2\r\n$4\r\nECHO\r\n$2\r\nabc\r\n");
        assert!(matches!(result, Err(ParseError::ProtocolError(_))));
    }

    #[test]
    fn test_missing_length_marker_is_rejected() {
        let result = parse_frame(b"*1\r\nPING\r\n");
        assert!(matches!(result, Err(ParseError::ProtocolError(_))));
    }

    #[test]
    fn test_non_positive_count_is_rejected() {
        assert_eq!(parse_frame(b"*0\r\n"), Err(ParseError::InvalidArrayLength(0)));
        assert_eq!(parse_frame(b"*-1\r\n"), Err(ParseError::InvalidArrayLength(-1)));
    }

    #[test]
    fn test_invalid_integer() {
        let result = parse_frame(b"*x\r\n");
        assert!(matches!(result, Err(ParseError::InvalidInteger(_))));
    }

    #[test]
    fn test_parse_inline_command() {
        let mut parser = RespParser::new();
        let (request, consumed) = parser.parse(b"SET  k   v EX 10\r\n").unwrap().unwrap();
        assert_eq!(request.name, "SET");
        assert_eq!(request.args, vec!["k", "v", "EX", "10"]);
        assert_eq!(consumed, 18);
    }

    #[test]
    fn test_empty_inline_command_is_rejected() {
        let result = parse_frame(b"   \r\n");
        assert!(matches!(result, Err(ParseError::ProtocolError(_))));
    }

    #[test]
    fn test_invalid_utf8_token() {
        let result = parse_frame(b"*2\r\n$4\r\nECHO\r\n$2\r\n\xff\xfe\r\n");
        assert!(matches!(result, Err(ParseError::InvalidUtf8(_))));
    }
}
