use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

use crate::flac::io::{Config, RetryConfig};
use crate::flac::sender::entries::CatalogEntry;
use crate::flac::sender::{ApiError, ResolveEndpoint};

#[derive(Error, Debug)]
pub(crate) enum ResolveError {
    #[error("No quality tier resolvable for \"{name}\" ({id}), tried {tiers:?}")]
    Unresolvable {
        id: String,
        name: String,
        tiers: Vec<String>,
    },
}

pub(crate) type ResolveResult<T> = Result<T, ResolveError>;

/// Exponential backoff for a single network call: attempt `n` (from zero) is followed, when it
/// fails, by a sleep of `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            attempts: config.attempts,
            base_delay: Duration::from_secs(config.base_delay_secs),
        }
    }
}

/// Runs `operation` until it succeeds or the policy's attempts run out, returning the last error.
///
/// # Arguments
///
/// * `policy`: How many attempts to make and how long to back off after each failure.
/// * `label`: Describes the call in log lines.
/// * `operation`: The call to retry. Receives the zero-based attempt number.
pub(crate) fn retry_with_backoff<T, E, F>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Waiting {:?}",
                    label,
                    attempt + 1,
                    policy.attempts,
                    err,
                    delay
                );
                sleep(delay);

                attempt += 1;
                if attempt >= policy.attempts {
                    return Err(err);
                }
            }
        }
    }
}

/// A resolved download link and the tier it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolution {
    pub url: String,
    pub tier: String,
    /// Position of `tier` in the configured list. Zero is the lossless tier.
    pub tier_index: usize,
}

impl Resolution {
    pub(crate) fn is_primary(&self) -> bool {
        self.tier_index == 0
    }
}

/// Walks the configured quality tiers, best first, until one yields a download URL.
pub(crate) struct Resolver {
    endpoint: Arc<dyn ResolveEndpoint>,
    tiers: Vec<String>,
    policy: RetryPolicy,
}

impl Resolver {
    pub(crate) fn new(endpoint: Arc<dyn ResolveEndpoint>, tiers: Vec<String>, policy: RetryPolicy) -> Self {
        Resolver { endpoint, tiers, policy }
    }

    pub(crate) fn from_config(endpoint: Arc<dyn ResolveEndpoint>, config: &Config) -> Self {
        Self::new(endpoint, config.catalog.quality.clone(), RetryPolicy::from(&config.retry))
    }

    /// Each tier gets its own full retry budget. An empty URL counts as a failed attempt.
    pub(crate) fn resolve(&self, entry: &CatalogEntry, unlock_code: &str) -> ResolveResult<Resolution> {
        for (tier_index, tier) in self.tiers.iter().enumerate() {
            let label = format!("Resolving \"{}\" at {}", entry.name, tier);
            let result = retry_with_backoff(&self.policy, &label, |_| {
                let url = self.endpoint.resolve_url(&entry.id, tier, unlock_code)?;
                if url.is_empty() {
                    return Err(ApiError::Api(format!("empty URL for tier {tier}")));
                }
                Ok(url)
            });

            match result {
                Ok(url) => {
                    debug!("Resolved \"{}\" at tier {}", entry.name, tier);
                    return Ok(Resolution {
                        url,
                        tier: tier.clone(),
                        tier_index,
                    });
                }
                Err(err) => {
                    info!("Tier {} exhausted for \"{}\": {}", tier, entry.name, err);
                }
            }
        }

        Err(ResolveError::Unresolvable {
            id: entry.id.clone(),
            name: entry.name.clone(),
            tiers: self.tiers.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers each tier from a fixed table and records every call.
    #[derive(Default)]
    pub(crate) struct ScriptedEndpoint {
        urls: HashMap<String, String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedEndpoint {
        /// Tiers missing from `urls` fail with an API error.
        pub(crate) fn new(urls: &[(&str, &str)]) -> Self {
            ScriptedEndpoint {
                urls: urls.iter().map(|(tier, url)| (tier.to_string(), url.to_string())).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls_for(&self, tier: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|called| called.as_str() == tier).count()
        }

        pub(crate) fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ResolveEndpoint for ScriptedEndpoint {
        fn resolve_url(&self, _entry_id: &str, quality: &str, _unlock_code: &str) -> Result<String, ApiError> {
            self.calls.lock().unwrap().push(quality.to_string());
            self.urls
                .get(quality)
                .cloned()
                .ok_or_else(|| ApiError::Api(format!("{quality} unavailable")))
        }
    }
}
