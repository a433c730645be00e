//! Consumer-side freshness tracking
//!
//! Each node that reads a provider holds a [`ProviderWatch`]. The watch
//! remembers the stamp it last observed; the provider reports an update
//! until the node observes again. Any number of commits between two
//! observations collapse into one update.

use super::{CacheSnapshot, SharedProvider, Stamp};

/// A consumer's view of one provider
#[derive(Debug, Clone)]
pub struct ProviderWatch {
    provider: SharedProvider,
    last_seen: Stamp,
    saw_error: bool,
}

impl ProviderWatch {
    /// Watch `provider`; nothing has been observed yet
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            last_seen: Stamp::NEVER,
            saw_error: false,
        }
    }

    /// The watched provider
    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Stamp recorded by the last `observe`
    pub fn last_seen(&self) -> Stamp {
        self.last_seen
    }

    /// Whether the cache changed since the last `observe`
    ///
    /// True after a successful commit, and when the cache moves into or out
    /// of an error state.
    pub fn has_update(&self) -> bool {
        let (stamp, has_error) = self.provider.cache().status();
        stamp > self.last_seen || has_error != self.saw_error
    }

    /// Record the current stamp and return the cache contents
    pub fn observe(&mut self) -> CacheSnapshot {
        let snapshot = self.provider.cache().snapshot();
        self.last_seen = snapshot.stamp;
        self.saw_error = snapshot.error.is_some();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedSource;
    use crate::provider::DataProvider;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn shared(script: Vec<Result<serde_json::Value, String>>) -> SharedProvider {
        Arc::new(DataProvider::new(
            "watched",
            Arc::new(ScriptedSource::new(script)),
            Duration::from_secs(60),
            Duration::ZERO,
        ))
    }

    #[test]
    fn test_many_commits_collapse_into_one_update() {
        let provider = shared(vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))]);
        let mut watch = ProviderWatch::new(Arc::clone(&provider));
        assert!(!watch.has_update());

        for _ in 0..3 {
            provider.fetch_once();
        }
        assert!(watch.has_update());

        let snap = watch.observe();
        assert_eq!(snap.value, Some(json!(3)));
        assert!(!watch.has_update());
    }

    #[test]
    fn test_each_consumer_sees_update_once() {
        let provider = shared(vec![Ok(json!("v"))]);
        let mut a = ProviderWatch::new(Arc::clone(&provider));
        let mut b = ProviderWatch::new(Arc::clone(&provider));

        provider.fetch_once();
        a.observe();

        assert!(!a.has_update());
        assert!(b.has_update());
        b.observe();
        assert!(!b.has_update());
    }

    #[test]
    fn test_error_transitions_are_updates() {
        let provider = shared(vec![Ok(json!(1)), Err("down".into()), Err("down".into()), Ok(json!(2))]);
        let mut watch = ProviderWatch::new(Arc::clone(&provider));

        provider.fetch_once();
        watch.observe();

        provider.fetch_once();
        assert!(watch.has_update());
        assert_eq!(watch.observe().error.as_deref(), Some("transport error: down"));

        provider.fetch_once();
        assert!(!watch.has_update());

        provider.fetch_once();
        assert!(watch.has_update());
    }
}
