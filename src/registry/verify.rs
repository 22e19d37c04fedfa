use crate::executor::CommandRunner;
use crate::models::agent::{Agent, SearchKey};
use crate::models::error::{OssecError, Result};

use super::RegistryClient;

/// Registry state a mutation is expected to leave behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCondition {
    Present,
    Absent,
}

/// A post-condition on the agent selected by `key == value`
#[derive(Debug, Clone)]
pub struct Expectation {
    pub key: SearchKey,
    pub value: String,
    pub condition: PostCondition,
}

impl Expectation {
    pub fn present(key: SearchKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            condition: PostCondition::Present,
        }
    }

    pub fn absent(key: SearchKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            condition: PostCondition::Absent,
        }
    }

    /// Compare what a lookup observed with the expected state.
    /// `output` is the mutation's response, quoted in the failure message.
    pub fn check(&self, observed: Option<Agent>, output: &str) -> Result<Option<Agent>> {
        match (self.condition, observed) {
            (PostCondition::Present, Some(agent)) => Ok(Some(agent)),
            (PostCondition::Absent, None) => Ok(None),
            (PostCondition::Present, None) => Err(OssecError::VerificationFailed(format!(
                "no agent with {} {:?} after the change: {}",
                self.key,
                self.value,
                output.trim()
            ))),
            (PostCondition::Absent, Some(agent)) => Err(OssecError::VerificationFailed(format!(
                "agent is still registered ({}): {}",
                agent,
                output.trim()
            ))),
        }
    }
}

impl<R: CommandRunner> RegistryClient<R> {
    /// Run `command`, look the agent up again, and check the result against `expected`.
    /// The tool's exit status alone is not trusted.
    pub async fn mutate_and_verify(
        &self,
        command: &str,
        expected: &Expectation,
    ) -> Result<Option<Agent>> {
        let output = self.run(command).await?;
        let observed = self.find_by(expected.key, &expected.value).await?;
        expected.check(observed, &output).map_err(|e| {
            tracing::warn!("Post-condition {:?} failed: {}", expected.condition, e);
            e
        })
    }
}
