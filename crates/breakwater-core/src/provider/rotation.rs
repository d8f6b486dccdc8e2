//! Credential rotation with validate-then-commit-or-rollback semantics.

use crate::{
    config::Credential,
    metrics::MetricsCollector,
    provider::{
        errors::RpcError,
        executor::{CallOptions, RpcExecutor},
    },
};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// Time budget for the validation probe against the candidate credential.
const PROBE_DEADLINE: Duration = Duration::from_secs(10);

/// Rotates the credential of a running executor.
///
/// `rotate` never touches the live executor until the new credential has
/// proven itself: a candidate profile is built, a throwaway executor is
/// constructed against it, and a synchronous chain-id probe must both succeed
/// and report the expected chain. Only then is the live profile swapped
/// atomically. On any failure the candidate is discarded and the running
/// executor keeps serving with its old credential - no partial state is ever
/// visible to callers.
pub struct KeyRotationManager {
    executor: Arc<RpcExecutor>,
}

impl KeyRotationManager {
    #[must_use]
    pub fn new(executor: Arc<RpcExecutor>) -> Self {
        Self { executor }
    }

    /// Validates and commits a new credential.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidConfig`] if the candidate profile fails validation
    /// - [`RpcError::InvalidCredentials`] if the probe is rejected by the
    ///   provider or answers for the wrong chain
    /// - the underlying transport error if the probe cannot reach the
    ///   provider at all
    pub async fn rotate(&self, new_credential: impl Into<Credential>) -> Result<(), RpcError> {
        let live_profile = self.executor.profile();
        let candidate = live_profile.with_credential(new_credential);
        candidate.validate()?;

        // Throwaway executor against the candidate; its metrics collector is
        // private so probe traffic never pollutes the client's exports.
        let probe_executor =
            RpcExecutor::new(candidate.clone(), Arc::new(MetricsCollector::new()))?;

        let probe_result = probe_executor
            .call_with_options(
                "eth_chainId",
                None,
                CallOptions { deadline: Some(PROBE_DEADLINE) },
            )
            .await;

        match probe_result {
            Ok(value) => {
                let reported_chain = value
                    .as_str()
                    .and_then(|text| u64::from_str_radix(text.trim_start_matches("0x"), 16).ok());
                if reported_chain != Some(candidate.chain_id) {
                    warn!(
                        provider = %candidate.name,
                        expected_chain = candidate.chain_id,
                        reported_chain,
                        "rotation probe answered for the wrong chain, keeping old credential"
                    );
                    return Err(RpcError::InvalidCredentials { provider: candidate.name.clone() });
                }

                self.executor.swap_profile(candidate);
                info!(provider = %live_profile.name, "credential rotated");
                Ok(())
            }
            Err(RpcError::Unauthorized | RpcError::InvalidCredentials { .. }) => {
                warn!(
                    provider = %candidate.name,
                    "rotation probe rejected, keeping old credential"
                );
                Err(RpcError::InvalidCredentials { provider: candidate.name.clone() })
            }
            Err(error) => {
                warn!(
                    provider = %candidate.name,
                    error = %error,
                    "rotation probe failed, keeping old credential"
                );
                Err(error)
            }
        }
    }
}
