//! Process-wide handle on the remote collection and the startup sequence that
//! brings it from `Uninitialized` to `Ready`.
//!
//! Handlers only ever take a short read lock to look at the current phase, so a
//! slow or failing provisioning run never blocks a request: anything that
//! arrives before `Ready` gets [`SearchError::NotReady`].

use crate::traits::{IndexControlPlane, VectorIndex};
use crate::{IndexDescription, IndexSpec, SearchError};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Clone, Default)]
pub enum IndexPhase {
    #[default]
    Uninitialized,
    Provisioning,
    Ready(Arc<dyn VectorIndex>),
    Failed(String),
}

impl IndexPhase {
    pub fn name(&self) -> &'static str {
        match self {
            IndexPhase::Uninitialized => "uninitialized",
            IndexPhase::Provisioning => "provisioning",
            IndexPhase::Ready(_) => "ready",
            IndexPhase::Failed(_) => "failed",
        }
    }
}

#[derive(Clone, Default)]
pub struct IndexHandle {
    phase: Arc<RwLock<IndexPhase>>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(index: Arc<dyn VectorIndex>) -> Self {
        let handle = Self::new();
        handle.set(IndexPhase::Ready(index));
        handle
    }

    pub fn phase_name(&self) -> &'static str {
        self.read(|phase| phase.name())
    }

    /// Returns the live index, or `NotReady` without waiting.
    pub fn get(&self) -> Result<Arc<dyn VectorIndex>, SearchError> {
        self.read(|phase| match phase {
            IndexPhase::Ready(index) => Ok(Arc::clone(index)),
            other => Err(SearchError::NotReady(format!(
                "vector index is {}",
                other.name()
            ))),
        })
    }

    pub fn set(&self, phase: IndexPhase) {
        let mut guard = match self.phase.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = phase;
    }

    fn read<T>(&self, f: impl FnOnce(&IndexPhase) -> T) -> T {
        match self.phase.read() {
            Ok(guard) => f(&*guard),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
        }
    }
}

impl ReadinessPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_factor.max(1.0)).min(self.max_interval)
    }
}

/// Creates the collection if it is missing, waits for it to report ready and
/// publishes it on `handle`. On error the handle is left in `Failed`.
pub async fn provision<P>(
    control: &P,
    spec: &IndexSpec,
    policy: &ReadinessPolicy,
    handle: &IndexHandle,
) -> Result<IndexDescription, SearchError>
where
    P: IndexControlPlane + ?Sized,
{
    handle.set(IndexPhase::Provisioning);

    match provision_inner(control, spec, policy).await {
        Ok((description, index)) => {
            handle.set(IndexPhase::Ready(index));
            info!(index = %description.name, host = %description.host, "vector index ready");
            Ok(description)
        }
        Err(error) => {
            handle.set(IndexPhase::Failed(error.to_string()));
            Err(error)
        }
    }
}

async fn provision_inner<P>(
    control: &P,
    spec: &IndexSpec,
    policy: &ReadinessPolicy,
) -> Result<(IndexDescription, Arc<dyn VectorIndex>), SearchError>
where
    P: IndexControlPlane + ?Sized,
{
    let existing = control.list_indexes().await?;
    if existing.iter().any(|name| name == &spec.name) {
        info!(index = %spec.name, "vector index already exists");
    } else {
        info!(
            index = %spec.name,
            dimension = spec.dimension,
            cloud = %spec.cloud,
            region = %spec.region,
            "creating vector index"
        );
        control.create_index(spec).await?;
    }

    let description = wait_until_ready(control, &spec.name, policy).await?;
    let index = control.connect(&description)?;
    Ok((description, index))
}

pub async fn wait_until_ready<P>(
    control: &P,
    name: &str,
    policy: &ReadinessPolicy,
) -> Result<IndexDescription, SearchError>
where
    P: IndexControlPlane + ?Sized,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut interval = policy.poll_interval;

    loop {
        let description = control.describe_index(name).await?;
        if description.ready {
            return Ok(description);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(SearchError::ProvisionTimeout {
                name: name.to_string(),
                waited_secs: now.duration_since(started).as_secs(),
            });
        }

        let sleep_for = interval.min(deadline - now);
        debug!(index = %name, wait_ms = sleep_for.as_millis() as u64, "vector index not ready yet");
        tokio::time::sleep(sleep_for).await;
        interval = policy.next_interval(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IndexRecord, QueryMatch};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NullIndex;

    #[async_trait]
    impl VectorIndex for NullIndex {
        async fn upsert_records(&self, _records: &[IndexRecord]) -> Result<(), SearchError> {
            Ok(())
        }

        async fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _include_metadata: bool,
        ) -> Result<Vec<QueryMatch>, SearchError> {
            Ok(Vec::new())
        }
    }

    struct FakeControlPlane {
        existing: Vec<String>,
        ready_after: Option<usize>,
        describes: AtomicUsize,
        created: Mutex<Vec<String>>,
    }

    impl FakeControlPlane {
        fn new(existing: &[&str], ready_after: Option<usize>) -> Self {
            Self {
                existing: existing.iter().map(|name| name.to_string()).collect(),
                ready_after,
                describes: AtomicUsize::new(0),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IndexControlPlane for FakeControlPlane {
        async fn list_indexes(&self) -> Result<Vec<String>, SearchError> {
            Ok(self.existing.clone())
        }

        async fn create_index(&self, spec: &IndexSpec) -> Result<(), SearchError> {
            self.created.lock().unwrap().push(spec.name.clone());
            Ok(())
        }

        async fn describe_index(&self, name: &str) -> Result<IndexDescription, SearchError> {
            let calls = self.describes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IndexDescription {
                name: name.to_string(),
                host: format!("{name}.svc.example"),
                ready: self.ready_after.is_some_and(|after| calls >= after),
            })
        }

        fn connect(&self, _description: &IndexDescription) -> Result<Arc<dyn VectorIndex>, SearchError> {
            Ok(Arc::new(NullIndex))
        }
    }

    fn fast_policy() -> ReadinessPolicy {
        ReadinessPolicy {
            poll_interval: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_interval: Duration::from_millis(4),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn fresh_handle_is_not_ready() {
        let handle = IndexHandle::new();
        assert_eq!(handle.phase_name(), "uninitialized");
        assert!(matches!(handle.get(), Err(SearchError::NotReady(_))));

        handle.set(IndexPhase::Provisioning);
        assert!(matches!(handle.get(), Err(SearchError::NotReady(_))));
    }

    #[tokio::test]
    async fn missing_index_is_created_then_polled_until_ready() {
        let control = FakeControlPlane::new(&["other"], Some(3));
        let handle = IndexHandle::new();
        let spec = IndexSpec::serverless("docs", 1024);

        let description = provision(&control, &spec, &fast_policy(), &handle)
            .await
            .expect("provisioning should succeed");

        assert_eq!(description.host, "docs.svc.example");
        assert_eq!(*control.created.lock().unwrap(), vec!["docs".to_string()]);
        assert_eq!(control.describes.load(Ordering::SeqCst), 3);
        assert_eq!(handle.phase_name(), "ready");
        assert!(handle.get().is_ok());
    }

    #[tokio::test]
    async fn existing_index_is_not_recreated() {
        let control = FakeControlPlane::new(&["docs"], Some(1));
        let handle = IndexHandle::new();

        provision(&control, &IndexSpec::serverless("docs", 1024), &fast_policy(), &handle)
            .await
            .expect("provisioning should succeed");

        assert!(control.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn never_ready_index_times_out_and_marks_failure() {
        let control = FakeControlPlane::new(&[], None);
        let handle = IndexHandle::new();

        let error = provision(&control, &IndexSpec::serverless("docs", 1024), &fast_policy(), &handle)
            .await
            .unwrap_err();

        assert!(matches!(error, SearchError::ProvisionTimeout { ref name, .. } if name == "docs"));
        assert_eq!(handle.phase_name(), "failed");
        assert!(matches!(handle.get(), Err(SearchError::NotReady(_))));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = ReadinessPolicy::default();
        let mut interval = policy.poll_interval;
        for _ in 0..10 {
            interval = policy.next_interval(interval);
        }
        assert_eq!(interval, Duration::from_secs(10));
        assert_eq!(policy.next_interval(Duration::from_secs(2)), Duration::from_secs(3));
    }
}
