use crate::process::{CommandSpec, run_with_stdin};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// The external critic. Receives a review prompt, returns free text.
#[async_trait]
pub trait ReviewClient: Send + Sync {
    async fn review(&self, prompt: &str) -> Result<String>;
}

/// Runs a configured command with the prompt on stdin.
pub struct CommandReviewClient {
    spec: CommandSpec,
    timeout: Duration,
}

impl CommandReviewClient {
    pub fn new(spec: CommandSpec, timeout: Duration) -> Self {
        Self { spec, timeout }
    }
}

#[async_trait]
impl ReviewClient for CommandReviewClient {
    async fn review(&self, prompt: &str) -> Result<String> {
        debug!(command = %self.spec.display(), prompt_chars = prompt.len(), "Requesting critic review");
        run_with_stdin(&self.spec, prompt, self.timeout).await
    }
}
