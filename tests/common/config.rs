//! Test configuration helpers pointing the resolver at a mock server

use piece_dl::{Config, LocationResolver, ResolverConfig, RetryConfig};
use std::time::Duration;
use url::Url;
use wiremock::MockServer;

/// Retry policy with millisecond delays
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Resolver configuration for `server`
pub fn resolver_config(server: &MockServer, max_attempts: u32) -> ResolverConfig {
    ResolverConfig {
        endpoint: Url::parse(&server.uri()).unwrap(),
        request_timeout: Duration::from_secs(5),
        retry: fast_retry(max_attempts),
        ..ResolverConfig::default()
    }
}

/// Resolver for `server`
pub fn create_resolver(server: &MockServer, max_attempts: u32) -> LocationResolver {
    LocationResolver::new(&resolver_config(server, max_attempts)).unwrap()
}

/// Full configuration for `server`, validated
pub fn test_config(server: &MockServer) -> Config {
    let config = Config {
        resolver: resolver_config(server, 2),
        ..Config::default()
    };
    config.validate().unwrap();
    config
}
