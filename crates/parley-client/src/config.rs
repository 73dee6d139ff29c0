use std::time::Duration;

use anyhow::Context;

use parley_gateway::Backoff;

/// Runtime settings, read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub gateway_url: String,
    pub token: String,
    pub user_id: String,
    pub backoff: Backoff,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.into());

        let token = get("PARLEY_TOKEN").context("PARLEY_TOKEN must be set")?;
        let user_id = get("PARLEY_USER_ID").context("PARLEY_USER_ID must be set")?;

        let defaults = Backoff::default();
        let base_ms: u64 = var("PARLEY_BACKOFF_BASE_MS", &defaults.base.as_millis().to_string())
            .parse()
            .context("PARLEY_BACKOFF_BASE_MS")?;
        let ceiling_ms: u64 = var(
            "PARLEY_BACKOFF_CEILING_MS",
            &defaults.ceiling.as_millis().to_string(),
        )
        .parse()
        .context("PARLEY_BACKOFF_CEILING_MS")?;
        let max_attempts: u32 = var(
            "PARLEY_BACKOFF_ATTEMPTS",
            &defaults.max_attempts.to_string(),
        )
        .parse()
        .context("PARLEY_BACKOFF_ATTEMPTS")?;

        if ceiling_ms < base_ms {
            anyhow::bail!("PARLEY_BACKOFF_CEILING_MS must not be below PARLEY_BACKOFF_BASE_MS");
        }

        Ok(Self {
            api_url: var("PARLEY_API_URL", "http://localhost:3210/api"),
            gateway_url: var("PARLEY_GATEWAY_URL", "ws://localhost:3210/gateway"),
            token,
            user_id,
            backoff: Backoff {
                base: Duration::from_millis(base_ms),
                ceiling: Duration::from_millis(ceiling_ms),
                max_attempts,
                jitter: defaults.jitter,
            },
        })
    }
}
