//! Declarative query grammar.
//!
//! A query is a list of `&`-separated tokens of the form `name[=arg,arg...]`
//! (`+` also separates arguments). Integer-looking arguments become integers,
//! decimals become floats and `true`/`false` become booleans. For a token
//! naming an engine, `key=value` arguments are folded into a single options
//! map. Tokens no registered engine understands are handed back untouched.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::operation::{Arg, Operation};
use crate::registry::EngineRegistry;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedQuery {
    pub operations: Vec<Operation>,
    /// The tokens that were turned into operations.
    pub consumed: Vec<String>,
    /// The tokens that were not understood, joined with `&`.
    pub leftover: String,
}

pub fn parse(query: &str, registry: &EngineRegistry) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut leftover = Vec::new();

    for token in query.trim_start_matches('?').split('&') {
        if token.is_empty() {
            continue;
        }
        let (name, raw_args) = match token.split_once('=') {
            Some((name, args)) => (name, Some(args)),
            None => (token, None),
        };

        if !is_known(name, registry) {
            leftover.push(token);
            continue;
        }

        let pieces: Vec<&str> = raw_args
            .map(|args| args.split([',', '+']).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let args = if registry.is_engine(name) {
            engine_args(&pieces)
        } else {
            pieces.iter().map(|p| coerce(p)).collect()
        };

        parsed.operations.push(Operation::new(name, args));
        parsed.consumed.push(token.to_string());
    }

    parsed.leftover = leftover.join("&");
    parsed
}

fn is_known(name: &str, registry: &EngineRegistry) -> bool {
    name == "type"
        || registry.supports_operation(name)
        || media_types::canonical_name(name).is_some_and(|c| registry.supports_operation(c))
}

/// Fold `key=value` pieces into one options map.
fn engine_args(pieces: &[&str]) -> Vec<Arg> {
    if pieces.is_empty() || !pieces.iter().all(|p| p.contains('=')) {
        return pieces.iter().map(|p| coerce(p)).collect();
    }
    let options: BTreeMap<String, Arg> = pieces
        .iter()
        .filter_map(|p| p.split_once('='))
        .map(|(key, value)| (key.to_string(), coerce(value)))
        .collect();
    vec![Arg::Map(options)]
}

fn coerce(value: &str) -> Arg {
    match value {
        "true" => return Arg::Bool(true),
        "false" => return Arg::Bool(false),
        _ => {}
    }

    let digits = value.strip_prefix('-').unwrap_or(value);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = value.parse::<i64>() {
            return Arg::Integer(n);
        }
    } else if digits.contains('.')
        && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && let Ok(x) = value.parse::<f64>()
    {
        return Arg::Float(x);
    }
    Arg::Str(value.to_string())
}
