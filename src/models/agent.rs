//! Agent Data Models
//!
//! Records parsed from the manage_agents listing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::error::OssecError;

/// One row of the agent registry.
///
/// Agents carry no identity beyond the listing line they were parsed from;
/// two records are the same agent when their identifiers match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub ip: String,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ip: ip.into(),
        }
    }

    /// Value of the field selected by `key`
    pub fn field(&self, key: SearchKey) -> &str {
        match key {
            SearchKey::Id => &self.id,
            SearchKey::Name => &self.name,
            SearchKey::Ip => &self.ip,
        }
    }

    /// Case-insensitive, whitespace-trimmed comparison of one field
    pub fn matches(&self, key: SearchKey, value: &str) -> bool {
        self.field(key).trim().to_lowercase() == value.trim().to_lowercase()
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {}, Name: {}, IP: {}", self.id, self.name, self.ip)
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Agent {}

/// Field an agent lookup is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKey {
    Id,
    Name,
    Ip,
}

impl FromStr for SearchKey {
    type Err = OssecError;

    /// An empty key means `name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "name" => Ok(SearchKey::Name),
            "id" => Ok(SearchKey::Id),
            "ip" => Ok(SearchKey::Ip),
            other => Err(OssecError::InvalidSearchKey(other.to_string())),
        }
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchKey::Id => "id",
            SearchKey::Name => "name",
            SearchKey::Ip => "ip",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_key_parse() {
        assert_eq!("id".parse::<SearchKey>().unwrap(), SearchKey::Id);
        assert_eq!("name".parse::<SearchKey>().unwrap(), SearchKey::Name);
        assert_eq!("ip".parse::<SearchKey>().unwrap(), SearchKey::Ip);
        assert_eq!("".parse::<SearchKey>().unwrap(), SearchKey::Name);
        assert!(matches!(
            "ID".parse::<SearchKey>(),
            Err(OssecError::InvalidSearchKey(k)) if k == "ID"
        ));
        assert!("hostname".parse::<SearchKey>().is_err());
    }

    #[test]
    fn test_agent_equality_by_id() {
        let a = Agent::new("001", "web-1", "10.0.0.1");
        let b = Agent::new("001", "renamed", "any");
        let c = Agent::new("002", "web-1", "10.0.0.1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_agent_matches_trimmed_case_insensitive() {
        let agent = Agent::new("001", "Web-1.Example.com", "10.0.0.1");
        assert!(agent.matches(SearchKey::Name, "  web-1.example.COM "));
        assert!(agent.matches(SearchKey::Id, "001"));
        assert!(!agent.matches(SearchKey::Id, "1"));
        assert!(agent.matches(SearchKey::Ip, "10.0.0.1"));
    }
}
