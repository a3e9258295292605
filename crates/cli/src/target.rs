//! `database@branch` connection targets.

use std::fmt;
use std::str::FromStr;

/// A database label with an optional branch. Without a branch the target
/// means the trunk.
///
/// Each branch holds exactly one database file, so the label is only
/// carried for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub database: String,
    pub branch: Option<String>,
}

impl Target {
    pub fn branch_or<'a>(&'a self, trunk: &'a str) -> &'a str {
        self.branch.as_deref().unwrap_or(trunk)
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (database, branch) = match s.split_once('@') {
            Some((db, branch)) => {
                if branch.is_empty() {
                    return Err(format!("'{}': branch name after '@' is empty", s));
                }
                (db, Some(branch.to_string()))
            }
            None => (s, None),
        };
        if database.is_empty() {
            return Err(format!("'{}': database name is empty", s));
        }
        Ok(Self {
            database: database.to_string(),
            branch,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch {
            Some(branch) => write!(f, "{}@{}", self.database, branch),
            None => write!(f, "{}", self.database),
        }
    }
}
