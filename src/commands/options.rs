//! SET Options
//!
//! `SET key value [NX | XX] [EX s | PX ms | EXAT unix-s | PXAT unix-ms | KEEPTTL]`
//!
//! Parsing happens in three steps, each of which can reject the command
//! before anything is written:
//!
//! 1. [`parse_options`] turns the tokens after `key value` into [`SetOption`]s.
//!    A payload option without its payload, or an unknown token, fails here.
//! 2. [`check_conflicts`] allows at most one option from `{NX, XX}` and at most
//!    one from `{EX, PX, EXAT, PXAT, KEEPTTL}`.
//! 3. [`SetPlan::resolve`] converts payloads into an absolute expiry time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// One parsed SET modifier. Payloads are kept as given until resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOption {
    Nx,
    Xx,
    KeepTtl,
    Ex(String),
    Px(String),
    ExAt(String),
    PxAt(String),
}

impl SetOption {
    pub fn name(&self) -> &'static str {
        match self {
            SetOption::Nx => "NX",
            SetOption::Xx => "XX",
            SetOption::KeepTtl => "KEEPTTL",
            SetOption::Ex(_) => "EX",
            SetOption::Px(_) => "PX",
            SetOption::ExAt(_) => "EXAT",
            SetOption::PxAt(_) => "PXAT",
        }
    }
}

/// Options that may not appear together.
const CONFLICT_GROUPS: [&[&str]; 2] = [&["NX", "XX"], &["EX", "PX", "EXAT", "PXAT", "KEEPTTL"]];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("no value given for option '{0}'")]
    MissingPayload(&'static str),

    #[error("syntax error, unknown option '{0}'")]
    Unknown(String),

    #[error("conflicting options: {0} and {1} can't be used together")]
    Conflict(&'static str, &'static str),

    #[error("invalid expire time '{0}'")]
    InvalidExpireTime(String),
}

/// Parses the option tokens that follow `key value`.
pub fn parse_options(tokens: &[String]) -> Result<Vec<SetOption>, OptionError> {
    let mut options = Vec::with_capacity(tokens.len());
    let mut tokens = tokens.iter();

    while let Some(token) = tokens.next() {
        let option = match token.to_ascii_uppercase().as_str() {
            "NX" => SetOption::Nx,
            "XX" => SetOption::Xx,
            "KEEPTTL" => SetOption::KeepTtl,
            "EX" => SetOption::Ex(payload(&mut tokens, "EX")?),
            "PX" => SetOption::Px(payload(&mut tokens, "PX")?),
            "EXAT" => SetOption::ExAt(payload(&mut tokens, "EXAT")?),
            "PXAT" => SetOption::PxAt(payload(&mut tokens, "PXAT")?),
            _ => return Err(OptionError::Unknown(token.clone())),
        };
        options.push(option);
    }

    Ok(options)
}

fn payload<'a>(
    tokens: &mut impl Iterator<Item = &'a String>,
    name: &'static str,
) -> Result<String, OptionError> {
    tokens
        .next()
        .cloned()
        .ok_or(OptionError::MissingPayload(name))
}

/// Rejects option lists that use two options from the same group.
/// A repeated option counts as a conflict with itself.
pub fn check_conflicts(options: &[SetOption]) -> Result<(), OptionError> {
    for group in CONFLICT_GROUPS {
        let mut seen: Option<&'static str> = None;
        for option in options.iter().filter(|o| group.contains(&o.name())) {
            if let Some(first) = seen {
                return Err(OptionError::Conflict(first, option.name()));
            }
            seen = Some(option.name());
        }
    }
    Ok(())
}

/// Precondition on the key's existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// NX
    IfAbsent,
    /// XX
    IfPresent,
}

/// What happens to the key's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// No TTL option: the new entry never expires.
    Clear,
    /// KEEPTTL: carry over the current entry's expiry, if any.
    Keep,
    /// EX, PX, EXAT or PXAT.
    At(SystemTime),
}

/// A validated SET invocation, ready to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPlan {
    pub condition: Condition,
    pub ttl: TtlPolicy,
}

impl SetPlan {
    /// Parses, validates and resolves option tokens. Relative TTLs are
    /// measured from `now`.
    pub fn from_tokens(tokens: &[String], now: SystemTime) -> Result<Self, OptionError> {
        let options = parse_options(tokens)?;
        check_conflicts(&options)?;
        Self::resolve(&options, now)
    }

    /// Builds a plan from an already conflict-checked option list.
    pub fn resolve(options: &[SetOption], now: SystemTime) -> Result<Self, OptionError> {
        let mut plan = SetPlan {
            condition: Condition::Always,
            ttl: TtlPolicy::Clear,
        };

        for option in options {
            match option {
                SetOption::Nx => plan.condition = Condition::IfAbsent,
                SetOption::Xx => plan.condition = Condition::IfPresent,
                SetOption::KeepTtl => plan.ttl = TtlPolicy::Keep,
                SetOption::Ex(p) => plan.ttl = TtlPolicy::At(offset(now, p, 1000)?),
                SetOption::Px(p) => plan.ttl = TtlPolicy::At(offset(now, p, 1)?),
                SetOption::ExAt(p) => plan.ttl = TtlPolicy::At(offset(UNIX_EPOCH, p, 1000)?),
                SetOption::PxAt(p) => plan.ttl = TtlPolicy::At(offset(UNIX_EPOCH, p, 1)?),
            }
        }

        Ok(plan)
    }

    /// Expiry for the new entry, given the current entry's expiry.
    pub fn expiry(&self, current: Option<SystemTime>) -> Option<SystemTime> {
        match self.ttl {
            TtlPolicy::Clear => None,
            TtlPolicy::Keep => current,
            TtlPolicy::At(at) => Some(at),
        }
    }
}

/// `base + payload * unit_ms` milliseconds. Negative payloads move backwards.
fn offset(base: SystemTime, payload: &str, unit_ms: i64) -> Result<SystemTime, OptionError> {
    let invalid = || OptionError::InvalidExpireTime(payload.to_string());

    let amount: i64 = payload.trim().parse().map_err(|_| invalid())?;
    let millis = amount.checked_mul(unit_ms).ok_or_else(invalid)?;
    let delta = Duration::from_millis(millis.unsigned_abs());

    let at = if millis >= 0 {
        base.checked_add(delta)
    } else {
        base.checked_sub(delta)
    };
    at.ok_or_else(invalid)
}
