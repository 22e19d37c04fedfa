use regex::Regex;

use crate::models::agent::Agent;
use crate::models::error::OssecError;

/// One `ID: <id>, Name: <name>, IP: <ip>` row of `manage_agents -l`
pub const AGENT_ENTRY_PATTERN: &str = r"(?i)^\s*ID:\s*(\d+),\s*Name:\s*([^,]+),\s*IP:\s*(\S+)\s*$";

/// Any run of 20+ non-whitespace characters in `manage_agents -e` output
pub const AGENT_KEY_PATTERN: &str = r"\S{20,}";

/// Compiled patterns used to read manage_agents output
#[derive(Debug, Clone)]
pub struct ParserConfig {
    agent_entry: Regex,
    agent_key: Regex,
}

impl ParserConfig {
    pub fn new() -> Result<Self, OssecError> {
        Self::with_patterns(AGENT_ENTRY_PATTERN, AGENT_KEY_PATTERN)
    }

    /// Build from custom patterns. The entry pattern needs three capture groups: id, name, ip.
    pub fn with_patterns(agent_entry: &str, agent_key: &str) -> Result<Self, OssecError> {
        let agent_entry = Regex::new(agent_entry)
            .map_err(|e| OssecError::Internal(format!("Invalid agent entry pattern: {}", e)))?;
        let agent_key = Regex::new(agent_key)
            .map_err(|e| OssecError::Internal(format!("Invalid agent key pattern: {}", e)))?;

        if agent_entry.captures_len() < 4 {
            return Err(OssecError::Internal(
                "Agent entry pattern must capture id, name and ip".to_string(),
            ));
        }

        Ok(Self {
            agent_entry,
            agent_key,
        })
    }
}

/// Parser for manage_agents output
pub struct OutputParser;

impl OutputParser {
    /// Extract agents from a listing. Lines that are not agent rows are skipped.
    pub fn parse_agent_list(output: &str, config: &ParserConfig) -> Vec<Agent> {
        output
            .lines()
            .filter_map(|line| {
                let caps = config.agent_entry.captures(line)?;
                Some(Agent::new(
                    caps.get(1)?.as_str(),
                    caps.get(2)?.as_str().trim(),
                    caps.get(3)?.as_str(),
                ))
            })
            .collect()
    }

    /// First token that looks like an agent key
    pub fn parse_agent_key(output: &str, config: &ParserConfig) -> Result<String, OssecError> {
        config
            .agent_key
            .find(output)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| OssecError::ParseError("No agent key found in output".to_string()))
    }
}
