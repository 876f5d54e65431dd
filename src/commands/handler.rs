//! Command Execution
//!
//! Dispatches a parsed [`Request`] by command name, validates its arguments,
//! runs it against the [`Store`], and builds the reply.
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `ECHO word [word ...]` - words joined with single spaces
//! - `SET key value [NX | XX] [EX s | PX ms | EXAT unix-s | PXAT unix-ms | KEEPTTL]`
//! - `GET key`
//! - `EXISTS key [key ...]`
//! - `DEL key [key ...]`
//! - `INCR key` / `DECR key`
//! - `LPUSH key element [element ...]` / `RPUSH key element [element ...]`
//! - `LRANGE key start stop` / `LLEN key`
//! - `TTL key` / `PTTL key` / `TYPE key`
//! - `SAVE`
//!
//! Every failure becomes an error reply. Nothing here closes the connection.

use crate::commands::options::{Condition, OptionError, SetPlan};
use crate::persistence::{PersistenceError, Snapshotter};
use crate::protocol::{Request, RespValue};
use crate::storage::{Entry, Store, StoreError, Value};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{error, info};

/// Errors a command can fail with. The `Display` text is the error reply.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR {0}")]
    InvalidOption(#[from] OptionError),

    #[error("ERR empty value for key '{0}'")]
    EmptyValue(String),

    #[error("ERR key '{0}' already exists, not set")]
    KeyExists(String),

    #[error("ERR key '{0}' does not exist, not set")]
    KeyMissing(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR snapshot failed: {0}")]
    Save(#[from] PersistenceError),
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::WrongType => CommandError::WrongType,
            StoreError::NotInteger => CommandError::NotInteger,
            StoreError::Overflow => CommandError::Overflow,
        }
    }
}

impl From<CommandError> for RespValue {
    fn from(e: CommandError) -> Self {
        RespValue::error(e.to_string())
    }
}

type CommandResult = Result<RespValue, CommandError>;

/// Executes commands against the shared store.
///
/// Cheap to clone; each connection gets its own copy.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
    snapshotter: Arc<Snapshotter>,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>, snapshotter: Arc<Snapshotter>) -> Self {
        Self { store, snapshotter }
    }

    /// Executes a request and returns the reply to send back.
    ///
    /// Everything except SAVE completes without yielding.
    pub async fn execute(&self, request: Request) -> RespValue {
        let name = request.name.to_ascii_uppercase();
        let result = if name == "SAVE" {
            self.cmd_save(&request.args).await
        } else {
            self.dispatch(&name, &request.args)
        };
        result.unwrap_or_else(RespValue::from)
    }

    fn dispatch(&self, cmd: &str, args: &[String]) -> CommandResult {
        match cmd {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),

            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "EXISTS" => self.cmd_exists(args),
            "DEL" => self.cmd_del(args),
            "INCR" => self.cmd_incr_by(args, 1, "INCR"),
            "DECR" => self.cmd_incr_by(args, -1, "DECR"),

            "LPUSH" => self.cmd_push(args, "LPUSH"),
            "RPUSH" => self.cmd_push(args, "RPUSH"),
            "LRANGE" => self.cmd_lrange(args),
            "LLEN" => self.cmd_llen(args),

            "TTL" => self.cmd_ttl(args, false),
            "PTTL" => self.cmd_ttl(args, true),
            "TYPE" => self.cmd_type(args),

            _ => Err(CommandError::UnknownCommand(cmd.to_string())),
        }
    }

    // ========================================================================
    // Connection Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[String]) -> CommandResult {
        match args {
            [] => Ok(RespValue::pong()),
            [message] => Ok(RespValue::bulk_string(message.clone())),
            _ => Err(CommandError::WrongArity("PING")),
        }
    }

    /// ECHO word [word ...]
    fn cmd_echo(&self, args: &[String]) -> CommandResult {
        if args.is_empty() {
            return Err(CommandError::WrongArity("ECHO"));
        }
        Ok(RespValue::bulk_string(args.join(" ")))
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// SET key value [options]
    ///
    /// The existence check, KEEPTTL lookup and write all happen inside one
    /// write lock, and the write is visible before `+OK` is returned.
    fn cmd_set(&self, args: &[String]) -> CommandResult {
        let [key, value, options @ ..] = args else {
            return Err(CommandError::WrongArity("SET"));
        };

        if value.is_empty() {
            return Err(CommandError::EmptyValue(key.clone()));
        }

        let plan = SetPlan::from_tokens(options, SystemTime::now())?;

        self.store.mutate(key, |slot| {
            match plan.condition {
                Condition::IfAbsent if slot.is_some() => {
                    return Err(CommandError::KeyExists(key.clone()));
                }
                Condition::IfPresent if slot.is_none() => {
                    return Err(CommandError::KeyMissing(key.clone()));
                }
                _ => {}
            }

            let expires_at = plan.expiry(slot.as_ref().and_then(|entry| entry.expires_at));
            *slot = Some(Entry::with_expiry(Value::Str(value.clone()), expires_at));
            Ok(())
        })?;

        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[String]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("GET"));
        };

        Ok(match self.store.get_string(key)? {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        })
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: &[String]) -> CommandResult {
        if args.is_empty() {
            return Err(CommandError::WrongArity("EXISTS"));
        }
        Ok(RespValue::integer(self.store.exists_many(args) as i64))
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[String]) -> CommandResult {
        if args.is_empty() {
            return Err(CommandError::WrongArity("DEL"));
        }
        Ok(RespValue::integer(self.store.delete_many(args) as i64))
    }

    /// INCR key / DECR key
    ///
    /// An absent key is left absent and answered with a null reply.
    fn cmd_incr_by(&self, args: &[String], delta: i64, name: &'static str) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity(name));
        };

        Ok(match self.store.incr_by(key, delta)? {
            Some(n) => RespValue::integer(n),
            None => RespValue::null(),
        })
    }

    // ========================================================================
    // List Commands
    // ========================================================================

    /// LPUSH key element [element ...] / RPUSH key element [element ...]
    fn cmd_push(&self, args: &[String], name: &'static str) -> CommandResult {
        let [key, elements @ ..] = args else {
            return Err(CommandError::WrongArity(name));
        };
        if elements.is_empty() {
            return Err(CommandError::WrongArity(name));
        }

        let elements = elements.to_vec();
        let len = if name == "LPUSH" {
            self.store.lpush(key, elements)?
        } else {
            self.store.rpush(key, elements)?
        };
        Ok(RespValue::integer(len as i64))
    }

    /// LRANGE key start stop
    fn cmd_lrange(&self, args: &[String]) -> CommandResult {
        let [key, start, stop] = args else {
            return Err(CommandError::WrongArity("LRANGE"));
        };

        let start: i64 = start.parse().map_err(|_| CommandError::NotInteger)?;
        let stop: i64 = stop.parse().map_err(|_| CommandError::NotInteger)?;

        Ok(RespValue::bulk_array(self.store.lrange(key, start, stop)?))
    }

    /// LLEN key
    fn cmd_llen(&self, args: &[String]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("LLEN"));
        };
        Ok(RespValue::integer(self.store.llen(key)? as i64))
    }

    // ========================================================================
    // Key Commands
    // ========================================================================

    /// TTL key / PTTL key
    ///
    /// -2 if the key doesn't exist, -1 if it has no expiry.
    fn cmd_ttl(&self, args: &[String], millis: bool) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity(if millis { "PTTL" } else { "TTL" }));
        };

        let ttl = match self.store.pttl(key) {
            None => -2,
            Some(-1) => -1,
            Some(ms) if millis => ms,
            Some(ms) => (ms + 500) / 1000,
        };
        Ok(RespValue::integer(ttl))
    }

    /// TYPE key
    fn cmd_type(&self, args: &[String]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("TYPE"));
        };
        Ok(RespValue::simple_string(self.store.key_type(key)))
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// SAVE
    ///
    /// The write runs on the blocking pool; this connection waits for it,
    /// others keep going.
    async fn cmd_save(&self, args: &[String]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("SAVE"));
        }

        let snapshotter = Arc::clone(&self.snapshotter);
        match snapshotter.save_in_background(Arc::clone(&self.store)).await {
            Ok(keys) => {
                info!(keys, "SAVE completed");
                Ok(RespValue::ok())
            }
            Err(e) => {
                error!(error = %e, path = %self.snapshotter.path().display(), "SAVE failed");
                Err(e.into())
            }
        }
    }
}
