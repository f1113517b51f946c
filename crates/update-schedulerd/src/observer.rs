//! Polling observer.
//!
//! Lists every managed object through the orchestrator client on each call
//! and keeps the last good snapshot for transient failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use update_scheduler_common::{Observer, ObserverError, ObservedSnapshot, OrchestratorClient};

/// Observer that polls `list_objects` with a timeout.
pub struct PollingObserver {
    client: Arc<dyn OrchestratorClient>,
    timeout: Duration,
    cache: RwLock<Option<ObservedSnapshot>>,
}

impl PollingObserver {
    pub fn new(client: Arc<dyn OrchestratorClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            cache: RwLock::new(None),
        }
    }

    /// Time of the last successful listing.
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.cache.read().as_ref().map(|s| s.taken_at())
    }
}

#[async_trait]
impl Observer for PollingObserver {
    #[instrument(skip(self), fields(backend = self.client.backend()))]
    async fn snapshot(&self) -> Result<ObservedSnapshot, ObserverError> {
        let listed = match tokio::time::timeout(self.timeout, self.client.list_objects()).await {
            Ok(listed) => listed,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Observer: listing timed out");
                return Err(ObserverError::Timeout {
                    after: self.timeout,
                });
            }
        };

        match listed {
            Ok(objects) => {
                let snapshot = ObservedSnapshot::new(objects, Utc::now());
                debug!(objects = snapshot.len(), "Observer: fresh snapshot");
                *self.cache.write() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) if e.is_transient() => {
                let cached = self.cache.read().clone();
                match cached {
                    Some(cached) => {
                        warn!(error = %e, taken_at = %cached.taken_at(), "Observer: serving stale snapshot");
                        Err(ObserverError::StaleSnapshot { cached, reason: e })
                    }
                    None => Err(ObserverError::Unavailable(e)),
                }
            }
            Err(e) => Err(ObserverError::Api(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use update_scheduler_common::{
        MockOrchestratorClient, ObjectIdentity, ObjectStatus, ObservedObject, OrchestratorError,
    };

    fn pod(name: &str) -> ObservedObject {
        ObservedObject::new(ObjectIdentity::new("ns", name, "Pod"), None, ObjectStatus::Running)
    }

    fn mock() -> MockOrchestratorClient {
        let mut client = MockOrchestratorClient::new();
        client.expect_backend().return_const("mock");
        client
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_cached() {
        let mut client = mock();
        client
            .expect_list_objects()
            .times(1)
            .returning(|| Ok(vec![pod("a"), pod("b")]));

        let observer = PollingObserver::new(Arc::new(client), Duration::from_secs(1));
        assert!(observer.last_success().is_none());

        let snapshot = observer.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(observer.last_success().is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_returns_stale_snapshot() {
        let mut client = mock();
        let mut seq = mockall::Sequence::new();
        client
            .expect_list_objects()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![pod("a")]));
        client
            .expect_list_objects()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(OrchestratorError::Unavailable("reset".into())));

        let observer = PollingObserver::new(Arc::new(client), Duration::from_secs(1));
        observer.snapshot().await.unwrap();

        match observer.snapshot().await {
            Err(ObserverError::StaleSnapshot { cached, reason }) => {
                assert_eq!(cached.len(), 1);
                assert!(reason.is_transient());
            }
            other => panic!("expected stale snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_without_cache_is_unavailable() {
        let mut client = mock();
        client
            .expect_list_objects()
            .returning(|| Err(OrchestratorError::Server {
                status: 503,
                message: "overloaded".into(),
            }));

        let observer = PollingObserver::new(Arc::new(client), Duration::from_secs(1));
        assert!(matches!(
            observer.snapshot().await,
            Err(ObserverError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_api_error() {
        let mut client = mock();
        client
            .expect_list_objects()
            .returning(|| Err(OrchestratorError::Forbidden("list pods".into())));

        let observer = PollingObserver::new(Arc::new(client), Duration::from_secs(1));
        assert!(matches!(observer.snapshot().await, Err(ObserverError::Api(_))));
    }

    struct SlowClient;

    #[async_trait]
    impl OrchestratorClient for SlowClient {
        fn backend(&self) -> &'static str {
            "slow"
        }
        async fn probe(&self) -> update_scheduler_common::OrchestratorResult<()> {
            Ok(())
        }
        async fn list_objects(
            &self,
        ) -> update_scheduler_common::OrchestratorResult<Vec<ObservedObject>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
        async fn create(
            &self,
            _: &update_scheduler_common::DesiredObject,
        ) -> update_scheduler_common::OrchestratorResult<()> {
            Ok(())
        }
        async fn patch(
            &self,
            _: &update_scheduler_common::DesiredObject,
        ) -> update_scheduler_common::OrchestratorResult<()> {
            Ok(())
        }
        async fn delete(&self, _: &ObjectIdentity) -> update_scheduler_common::OrchestratorResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_listing_times_out() {
        let observer = PollingObserver::new(Arc::new(SlowClient), Duration::from_secs(10));
        match observer.snapshot().await {
            Err(ObserverError::Timeout { after }) => assert_eq!(after, Duration::from_secs(10)),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
