use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::utils::error::{AppError, Result};

/// Lines starting with this marker are ignored in the query list.
pub const COMMENT_MARKER: char = '#';

/// A search string, identified by its literal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Query(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form used in diagnostic file names.
    pub fn slug(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses a newline separated query list, keeping file order.
pub fn parse_queries(text: &str) -> Vec<Query> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
        .map(Query::new)
        .collect()
}

pub fn load_queries(path: &Path) -> Result<Vec<Query>> {
    let text = std::fs::read_to_string(path)?;
    let queries = parse_queries(&text);
    if queries.is_empty() {
        return Err(AppError::Validation(format!(
            "query list {} contains no queries",
            path.display()
        )));
    }
    Ok(queries)
}
