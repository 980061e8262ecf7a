//! Long-running operations
//!
//! Mutating calls return an [`Operation`] that has to be polled until `done`.
//! Polling backs off exponentially and gives up after the policy timeout.

use super::client::YcClient;
use super::types::Operation;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff and timeout used while waiting for an operation
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    /// `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
            timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

impl WaitPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        current
            .checked_mul(self.multiplier.max(1))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Fetch the current state of an operation
pub async fn get_operation(client: &YcClient, operation_id: &str) -> Result<Operation> {
    let url = client.operation_url(operation_id)?;
    client.get(url).await
}

/// Poll `op` through `poll` until it is done.
///
/// Transport failures while polling are logged and retried; API errors abort.
pub async fn wait_for_operation<F, Fut>(mut op: Operation, policy: &WaitPolicy, mut poll: F) -> Result<Operation>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Operation>>,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;

    while !op.done {
        let mut sleep_for = delay;
        if let Some(timeout) = policy.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(Error::OperationTimeout {
                    operation_id: op.id,
                    waited_secs: elapsed.as_secs(),
                });
            }
            sleep_for = sleep_for.min(timeout - elapsed);
        }

        tokio::time::sleep(sleep_for).await;

        match poll(op.id.clone()).await {
            Ok(next) => op = next,
            Err(Error::Http(e)) => {
                tracing::warn!("Polling operation {} failed, retrying: {}", op.id, e);
            }
            Err(e) => return Err(e),
        }
        delay = policy.next_delay(delay);
    }

    tracing::debug!("Operation {} done after {:?}", op.id, started.elapsed());
    Ok(op)
}
