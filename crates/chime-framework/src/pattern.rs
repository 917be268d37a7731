//! Patterns for listeners addressed to the robot.
//!
//! [`response_pattern`] turns a user pattern into one that only matches when
//! the message starts with the robot's name or alias:
//!
//! ```text
//! ^\s*[@]?(?:NAME[:,]?|ALIAS[:,]?)\s*(?:PATTERN)
//! ```
//!
//! The name and alias are matched literally and case-sensitively. When
//! both are set, the longer one is tried first so that a short alias that
//! is a prefix of the name (`"al"` / `"alfred"`) never wins.

use regex::Regex;
use tracing::warn;

/// Builds the pattern used by `Robot::respond`.
pub fn response_pattern(
    name: &str,
    alias: Option<&str>,
    pattern: &str,
) -> Result<Regex, regex::Error> {
    if pattern.starts_with('^') {
        warn!(
            pattern,
            "Anchors don't work well with respond, perhaps you want to use hear?"
        );
    }

    let name = regex::escape(name);
    let prefix = match alias.filter(|a| !a.is_empty()) {
        None => format!("{name}[:,]?"),
        Some(alias) => {
            let alias = regex::escape(alias);
            let (first, second) = if name.len() >= alias.len() {
                (name, alias)
            } else {
                (alias, name)
            };
            format!("(?:{first}[:,]?|{second}[:,]?)")
        }
    };

    Regex::new(&format!(r"^\s*[@]?{prefix}\s*(?:{pattern})"))
}
