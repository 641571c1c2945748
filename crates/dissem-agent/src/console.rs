//! Operator console commands.
//!
//! One command per line:
//!
//! ```text
//! get <key>
//! set <key> <base64>
//! change <key> <base64>
//! keys
//! ```
//!
//! Keys are decimal or `0x`-prefixed hex.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dissem_core::{Key, Node, StoreError};
use std::fmt::Write;
use std::time::Instant;

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the current value of a key
    Get(Key),
    /// Preset a key that has not been activated yet
    Set(Key, Vec<u8>),
    /// Write a new value and disseminate it
    Change(Key, Vec<u8>),
    /// List registered keys
    Keys,
}

/// Console input errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    /// First word is not a command
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// A required argument is missing
    #[error("missing {0}")]
    MissingArgument(&'static str),
    /// Extra words after the last argument
    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),
    /// Key is not a 16-bit number
    #[error("invalid key '{0}'")]
    InvalidKey(String),
    /// Value is not base64
    #[error("invalid base64 value: {0}")]
    InvalidValue(String),
}

impl Command {
    /// Parse one console line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns error if the line is not a well-formed command.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };

        let command = match name {
            "get" => Self::Get(parse_key(words.next())?),
            "set" => Self::Set(parse_key(words.next())?, parse_value(words.next())?),
            "change" => Self::Change(parse_key(words.next())?, parse_value(words.next())?),
            "keys" => Self::Keys,
            other => return Err(ConsoleError::UnknownCommand(other.to_string())),
        };

        match words.next() {
            Some(extra) => Err(ConsoleError::UnexpectedArgument(extra.to_string())),
            None => Ok(Some(command)),
        }
    }

    /// Run the command against `node` and return the text to print.
    ///
    /// # Errors
    ///
    /// Returns the node's usage error; the node is unchanged in that case.
    pub fn execute(&self, node: &mut Node, now: Instant) -> Result<String, StoreError> {
        match self {
            Self::Get(key) => {
                let view = node.get(*key)?;
                Ok(format!(
                    "{} version={} value={}",
                    key,
                    view.version(),
                    STANDARD.encode(view.bytes())
                ))
            }
            Self::Set(key, value) => {
                node.set(*key, value)?;
                Ok(format!("{key} set"))
            }
            Self::Change(key, value) => {
                let version = node.change(*key, value, now)?;
                Ok(format!("{key} version={version}"))
            }
            Self::Keys => {
                let mut out = String::new();
                for (key, slot) in node.registry().iter() {
                    let _ = writeln!(
                        out,
                        "{} size={} version={} activated={}",
                        key,
                        slot.variable.size(),
                        slot.variable.version(),
                        slot.variable.is_activated()
                    );
                }
                Ok(out.trim_end().to_string())
            }
        }
    }
}

fn parse_key(word: Option<&str>) -> Result<Key, ConsoleError> {
    let word = word.ok_or(ConsoleError::MissingArgument("key"))?;
    let raw = match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => word.parse(),
    };
    raw.map(Key::from_raw)
        .map_err(|_| ConsoleError::InvalidKey(word.to_string()))
}

fn parse_value(word: Option<&str>) -> Result<Vec<u8>, ConsoleError> {
    let word = word.ok_or(ConsoleError::MissingArgument("value"))?;
    STANDARD
        .decode(word)
        .map_err(|e| ConsoleError::InvalidValue(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dissem_core::{NodeConfig, TrickleParams};

    const KEY: Key = Key::from_raw(5);

    fn node(now: Instant) -> Node {
        let mut node = Node::with_seed(NodeConfig::default(), 7);
        node.register(KEY, 2, TrickleParams::default(), now).unwrap();
        node
    }

    #[test]
    fn parses_every_command() {
        assert_eq!(Command::parse("get 5").unwrap(), Some(Command::Get(KEY)));
        assert_eq!(Command::parse("  get 0x0005 ").unwrap(), Some(Command::Get(KEY)));
        assert_eq!(
            Command::parse("set 5 AQI=").unwrap(),
            Some(Command::Set(KEY, vec![1, 2]))
        );
        assert_eq!(
            Command::parse("change 5 AQI=").unwrap(),
            Some(Command::Change(KEY, vec![1, 2]))
        );
        assert_eq!(Command::parse("keys").unwrap(), Some(Command::Keys));
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            Command::parse("put 5"),
            Err(ConsoleError::UnknownCommand("put".to_string()))
        );
        assert_eq!(Command::parse("get"), Err(ConsoleError::MissingArgument("key")));
        assert_eq!(Command::parse("change 5"), Err(ConsoleError::MissingArgument("value")));
        assert_eq!(
            Command::parse("get 70000"),
            Err(ConsoleError::InvalidKey("70000".to_string()))
        );
        assert!(matches!(
            Command::parse("set 5 !!"),
            Err(ConsoleError::InvalidValue(_))
        ));
        assert_eq!(
            Command::parse("keys now"),
            Err(ConsoleError::UnexpectedArgument("now".to_string()))
        );
    }

    #[test]
    fn executes_against_node() {
        let now = Instant::now();
        let mut node = node(now);

        let out = Command::Set(KEY, vec![9, 9]).execute(&mut node, now).unwrap();
        assert_eq!(out, "0x0005 set");

        let out = Command::Change(KEY, vec![1, 2]).execute(&mut node, now).unwrap();
        assert_eq!(out, "0x0005 version=1");

        let out = Command::Get(KEY).execute(&mut node, now).unwrap();
        assert_eq!(out, "0x0005 version=1 value=AQI=");

        let out = Command::Keys.execute(&mut node, now).unwrap();
        assert_eq!(out, "0x0005 size=2 version=1 activated=true");
    }

    #[test]
    fn usage_errors_leave_node_unchanged() {
        let now = Instant::now();
        let mut node = node(now);

        assert_eq!(
            Command::Change(KEY, vec![1]).execute(&mut node, now),
            Err(StoreError::SizeMismatch {
                key: KEY,
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            Command::Get(Key::from_raw(6)).execute(&mut node, now),
            Err(StoreError::UnknownKey(Key::from_raw(6)))
        );
        assert_eq!(node.get(KEY).unwrap().bytes(), &[0, 0]);
    }
}
