// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;
use crate::models::RegistryConfig;

/// Create a configured asynchronous HTTP client for registry queries.
pub fn create_async_client(config: &RegistryConfig) -> Result<reqwest::Client> {
    build_client(&config.user_agent, config.timeout_secs)
}

/// Create an asynchronous HTTP client with the given identity and timeout.
pub fn build_client(user_agent: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

/// Sleep for `delay_ms`, skipping zero delays.
pub async fn pace(delay_ms: u64) {
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}
