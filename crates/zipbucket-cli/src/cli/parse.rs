use std::fmt;

use anyhow::{bail, ensure};

/// A `scheme://container/path` reference.
///
/// The path may be empty (`gs://bucket/` names the whole container).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub scheme:    String,
    pub container: String,
    pub path:      String,
}

impl TryFrom<&str> for Location {
    type Error = anyhow::Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let s = s.trim();
        let Some((scheme, rest)) = s.split_once("://") else {
            bail!("'{s}' is not of the form scheme://container/path");
        };
        ensure!(
            !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
            "invalid scheme in '{s}'"
        );
        let Some((container, path)) = rest.split_once('/') else {
            bail!("'{s}' has no path after the container");
        };
        ensure!(!container.is_empty(), "'{s}' has an empty container");

        Ok(Location {
            scheme:    scheme.to_string(),
            container: container.to_string(),
            path:      path.to_string(),
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.container, self.path)
    }
}

/// Parse a `KEY=VALUE` metadata pair.
pub fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
