//! Test helpers for timing-sensitive tests
//!
//! Provides utilities for handling flaky timing tests in CI environments.

use std::time::Duration;

/// Check if running in a CI environment
///
/// Checks common CI environment variables.
pub fn is_ci_environment() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
        || std::env::var("CIRCLECI").is_ok()
        || std::env::var("TRAVIS").is_ok()
}

/// Get CI-adjusted timeout duration
///
/// Returns a timeout that's longer in CI environments to account for
/// slower and more variable execution times.
pub fn ci_timeout(base_timeout: Duration) -> Duration {
    if is_ci_environment() {
        base_timeout * 3
    } else {
        base_timeout
    }
}

/// Poll `condition` every 5ms until it holds or `timeout` elapses.
///
/// Returns whether the condition held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ci_timeout() {
        let base = Duration::from_secs(1);
        let adjusted = ci_timeout(base);

        if is_ci_environment() {
            assert_eq!(adjusted, Duration::from_secs(3));
        } else {
            assert_eq!(adjusted, base);
        }
    }

    #[tokio::test]
    async fn test_wait_until() {
        let mut polls = 0;
        assert!(
            wait_until(Duration::from_secs(1), || {
                polls += 1;
                polls >= 3
            })
            .await
        );
        assert!(!wait_until(Duration::from_millis(20), || false).await);
    }
}
