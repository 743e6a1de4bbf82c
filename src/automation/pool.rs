//! Fixed-size pool of automation sessions.
//!
//! Sessions are created once at start-up. A caller holds at most one session
//! through a [`Lease`]; dropping or releasing the lease checks the session
//! back in. A lease whose step failed is poisoned: its session is closed and
//! a fresh one is created in its place instead of being reused.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use super::executor::{BlockingExecutor, ExecutorError};
use super::resource::{AutomationError, AutomationResource, ResourceFactory};
use crate::models::{AppliedFilters, FilterField};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to create automation session #{index}: {source}")]
    Create {
        index: usize,
        #[source]
        source: AutomationError,
    },
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

struct Slot {
    id: usize,
    resource: Box<dyn AutomationResource>,
}

struct Shared {
    idle: Mutex<Vec<Slot>>,
    available: Semaphore,
    factory: Arc<dyn ResourceFactory>,
    executor: BlockingExecutor,
    size: usize,
    closed: AtomicBool,
    /// Retirements handed to the executor and not yet finished.
    retiring: AtomicUsize,
    retired: Notify,
}

impl Shared {
    fn checkin(self: &Arc<Self>, id: usize, resource: Option<Box<dyn AutomationResource>>, poisoned: bool) {
        let closed = self.closed.load(Ordering::SeqCst);
        match resource {
            Some(resource) if !poisoned && !closed => {
                self.idle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Slot { id, resource });
                self.available.add_permits(1);
                debug!(
                    "Session #{} returned ({}/{} idle)",
                    id,
                    self.available.available_permits(),
                    self.size
                );
            }
            resource => self.retire(id, resource, !closed),
        }
    }

    /// Close a session off the async threads and optionally replace it.
    fn retire(self: &Arc<Self>, id: usize, resource: Option<Box<dyn AutomationResource>>, replace: bool) {
        let shared = self.clone();
        let work = move || shared.close_and_replace(id, resource, replace);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let executor = self.executor.clone();
                let shared = self.clone();
                self.retiring.fetch_add(1, Ordering::SeqCst);
                handle.spawn(async move {
                    if let Err(e) = executor.run(work).await {
                        error!("Failed to retire session #{}: {}", id, e);
                    }
                    shared.retiring.fetch_sub(1, Ordering::SeqCst);
                    shared.retired.notify_waiters();
                });
            }
            Err(_) => work(),
        }
    }

    fn close_and_replace(&self, id: usize, resource: Option<Box<dyn AutomationResource>>, replace: bool) {
        if let Some(mut resource) = resource {
            resource.close();
            debug!("Session #{} closed", id);
        }
        if !replace || self.closed.load(Ordering::SeqCst) {
            return;
        }

        match self.factory.create() {
            Ok(mut resource) => {
                // Checked under the idle lock so close_all cannot miss the slot
                let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
                if self.closed.load(Ordering::SeqCst) {
                    drop(idle);
                    resource.close();
                    return;
                }
                idle.push(Slot { id, resource });
                drop(idle);
                self.available.add_permits(1);
                info!("Session #{} replaced after failure", id);
            }
            Err(e) => {
                error!("Failed to replace session #{}: {}", id, e);
            }
        }
    }
}

/// Exclusive hold on one pooled session.
///
/// Dropping a lease returns its session to the pool.
pub struct Lease {
    id: usize,
    resource: Option<Box<dyn AutomationResource>>,
    poisoned: bool,
    shared: Arc<Shared>,
}

impl Lease {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Mark the session as unusable; it is replaced on release.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let resource = self.resource.take();
        self.shared.checkin(self.id, resource, self.poisoned);
    }
}

/// Idle and total session counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub size: usize,
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.idle, self.size)
    }
}

/// Pool of automation sessions bounded by a fixed size.
#[derive(Clone)]
pub struct ResourcePool {
    shared: Arc<Shared>,
}

impl ResourcePool {
    /// Create `size` sessions through `factory` on the executor.
    ///
    /// Any creation failure aborts start-up; sessions created so far are closed.
    pub async fn start(
        size: usize,
        executor: BlockingExecutor,
        factory: Arc<dyn ResourceFactory>,
    ) -> Result<Self, PoolError> {
        info!(
            "Starting session pool: size={}, workers={}",
            size,
            executor.workers()
        );

        let mut slots: Vec<Slot> = Vec::with_capacity(size);
        for index in 0..size {
            debug!("Creating session #{}", index + 1);
            let f = factory.clone();
            let created = match executor.run(move || f.create()).await {
                Ok(created) => created,
                Err(e) => {
                    close_slots(&executor, slots).await;
                    return Err(e.into());
                }
            };
            match created {
                Ok(resource) => slots.push(Slot {
                    id: index,
                    resource,
                }),
                Err(source) => {
                    error!("Failed to create session #{}: {}", index + 1, source);
                    close_slots(&executor, slots).await;
                    return Err(PoolError::Create { index, source });
                }
            }
        }

        let shared = Arc::new(Shared {
            available: Semaphore::new(slots.len()),
            idle: Mutex::new(slots),
            factory,
            executor,
            size,
            closed: AtomicBool::new(false),
            retiring: AtomicUsize::new(0),
            retired: Notify::new(),
        });
        info!("Session pool ready ({} sessions)", size);

        Ok(Self { shared })
    }

    /// Wait up to `timeout` for a free session. `None` means none came free.
    pub async fn acquire(&self, timeout: Duration) -> Option<Lease> {
        debug!("Session requested ({} idle)", self.status());

        let permit = match tokio::time::timeout(timeout, self.shared.available.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                warn!("Session pool is closed");
                return None;
            }
            Err(_) => {
                warn!("Session pool exhausted (timeout {:?})", timeout);
                return None;
            }
        };
        permit.forget();

        let slot = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        match slot {
            Some(slot) => {
                debug!("Session #{} leased ({} idle)", slot.id, self.status());
                Some(Lease {
                    id: slot.id,
                    resource: Some(slot.resource),
                    poisoned: false,
                    shared: self.shared.clone(),
                })
            }
            None => {
                self.shared.available.add_permits(1);
                warn!("Session permit granted with no idle session");
                None
            }
        }
    }

    /// Return a lease to the pool. `None` is accepted and ignored.
    pub fn release(&self, lease: Option<Lease>) {
        drop(lease);
    }

    /// Run `f` against the leased session on the executor.
    ///
    /// Errors (including a panic inside `f`) poison the lease.
    pub async fn run_with<T, F>(&self, mut lease: Lease, f: F) -> (Lease, Result<T, AutomationError>)
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn AutomationResource) -> Result<T, AutomationError> + Send + 'static,
    {
        let Some(mut resource) = lease.resource.take() else {
            lease.poisoned = true;
            return (
                lease,
                Err(AutomationError::Other("lease holds no session".to_string())),
            );
        };

        let outcome = self
            .shared
            .executor
            .run(move || {
                let result = f(&mut *resource);
                (resource, result)
            })
            .await;

        match outcome {
            Ok((resource, result)) => {
                lease.resource = Some(resource);
                if result.is_err() {
                    lease.poisoned = true;
                }
                (lease, result)
            }
            Err(e) => {
                lease.poisoned = true;
                (lease, Err(AutomationError::Other(e.to_string())))
            }
        }
    }

    /// Apply `field=value` on the leased session.
    ///
    /// With no filters applied yet the session first loads the unfiltered
    /// page; otherwise it is assumed to already reflect `applied`.
    pub async fn run_filter_step(
        &self,
        lease: Lease,
        applied: AppliedFilters,
        field: FilterField,
        value: String,
    ) -> (Lease, Result<(), AutomationError>) {
        debug!("Applying {}={} on session #{}", field, value, lease.id());
        self.run_with(lease, move |resource| {
            if applied.is_empty() {
                resource.load_base()?;
            }
            resource.select(field, &value, &applied)
        })
        .await
    }

    /// Close every idle session and wait for pending retirements.
    ///
    /// No replacements are created once this starts. Leases still out are
    /// closed when returned.
    pub async fn close_all(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.available.close();

        let slots: Vec<Slot> = std::mem::take(
            &mut *self
                .shared
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let count = slots.len();
        close_slots(&self.shared.executor, slots).await;

        loop {
            let retired = self.shared.retired.notified();
            let pending = self.shared.retiring.load(Ordering::SeqCst);
            if pending == 0 {
                break;
            }
            debug!("Waiting for {} session retirements", pending);
            retired.await;
        }
        info!("Closed {} idle sessions", count);
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.shared.available.available_permits(),
            size: self.shared.size,
        }
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }
}

async fn close_slots(executor: &BlockingExecutor, slots: Vec<Slot>) {
    if slots.is_empty() {
        return;
    }
    let result = executor
        .run(move || {
            for mut slot in slots {
                slot.resource.close();
            }
        })
        .await;
    if let Err(e) = result {
        warn!("Failed to close sessions: {}", e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::FilterOption;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// In-memory session over a static option tree.
    pub(crate) struct FakeResource {
        pub applied: AppliedFilters,
        pub closed: Arc<AtomicUsize>,
    }

    impl AutomationResource for FakeResource {
        fn load_base(&mut self) -> Result<(), AutomationError> {
            self.applied = AppliedFilters::new();
            Ok(())
        }

        fn options(&mut self, field: FilterField) -> Result<Vec<FilterOption>, AutomationError> {
            Ok(match field {
                FilterField::Level => vec![FilterOption::new("1", "Bachelor")],
                FilterField::Institute => vec![
                    FilterOption::new("0", "Main"),
                    FilterOption::new("1", "Branch"),
                ],
                _ => Vec::new(),
            })
        }

        fn select(
            &mut self,
            field: FilterField,
            value: &str,
            applied: &AppliedFilters,
        ) -> Result<(), AutomationError> {
            match value {
                "missing" => Err(AutomationError::ElementNotFound(format!("{}={}", field, value))),
                "disconnect" => Err(AutomationError::ConnectionLost("socket closed".into())),
                "panic" => panic!("driver crashed"),
                _ => {
                    self.applied = applied.clone().with(field, value);
                    Ok(())
                }
            }
        }

        fn page_html(&mut self) -> Result<String, AutomationError> {
            Ok(format!("<p>{}</p>", self.applied))
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeFactory {
        pub created: AtomicUsize,
        pub closed: Arc<AtomicUsize>,
        pub fail_after: Option<usize>,
    }

    impl ResourceFactory for FakeFactory {
        fn create(&self) -> Result<Box<dyn AutomationResource>, AutomationError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(AutomationError::Other("chrome not found".into()));
            }
            Ok(Box::new(FakeResource {
                applied: AppliedFilters::new(),
                closed: self.closed.clone(),
            }))
        }
    }

    pub(crate) async fn fake_pool(size: usize) -> (ResourcePool, Arc<FakeFactory>) {
        let factory = Arc::new(FakeFactory::default());
        let pool = ResourcePool::start(size, BlockingExecutor::new(4), factory.clone())
            .await
            .unwrap();
        (pool, factory)
    }

    async fn wait_for_idle(pool: &ResourcePool, idle: usize) {
        for _ in 0..100 {
            if pool.status().idle == idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pool never reached {} idle sessions: {}", idle, pool.status());
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let (pool, _factory) = fake_pool(2).await;

        let a = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let b = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let ids: HashSet<usize> = [a.id(), b.id()].into_iter().collect();
        assert_eq!(ids.len(), 2);

        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        assert!(pool.acquire(timeout).await.is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));

        pool.release(Some(a));
        let c = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_ne!(c.id(), b.id());
    }

    #[tokio::test]
    async fn test_release_none_is_noop() {
        let (pool, _factory) = fake_pool(1).await;
        pool.release(None);
        assert_eq!(pool.status(), PoolStatus { idle: 1, size: 1 });
    }

    #[tokio::test]
    async fn test_no_session_handed_out_twice() {
        let (pool, _factory) = fake_pool(3).await;
        let mut handles = Vec::new();
        let holders = Arc::new(Mutex::new(HashSet::new()));

        for _ in 0..12 {
            let pool = pool.clone();
            let holders = holders.clone();
            handles.push(tokio::spawn(async move {
                let lease = pool.acquire(Duration::from_secs(5)).await.unwrap();
                assert!(holders.lock().unwrap().insert(lease.id()));
                tokio::time::sleep(Duration::from_millis(5)).await;
                holders.lock().unwrap().remove(&lease.id());
                pool.release(Some(lease));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(pool.status().idle, 3);
    }

    #[tokio::test]
    async fn test_filter_step_updates_session() {
        let (pool, _factory) = fake_pool(1).await;
        let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let (lease, result) = pool
            .run_filter_step(lease, AppliedFilters::new(), FilterField::Level, "1".into())
            .await;
        assert!(result.is_ok());
        assert!(!lease.is_poisoned());

        let applied = AppliedFilters::new().with(FilterField::Level, "1");
        let (lease, result) = pool
            .run_filter_step(lease, applied, FilterField::Institute, "0".into())
            .await;
        assert!(result.is_ok());

        let (lease, html) = pool.run_with(lease, |r| r.page_html()).await;
        assert_eq!(html.unwrap(), "<p>{level=1, inst=0}</p>");
        pool.release(Some(lease));
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_failed_step_replaces_session() {
        let (pool, factory) = fake_pool(1).await;
        let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let (lease, result) = pool
            .run_filter_step(lease, AppliedFilters::new(), FilterField::Level, "missing".into())
            .await;
        assert!(matches!(result, Err(AutomationError::ElementNotFound(_))));
        assert!(lease.is_poisoned());

        pool.release(Some(lease));
        wait_for_idle(&pool, 1).await;
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_session_is_contained() {
        let (pool, factory) = fake_pool(1).await;
        let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let (lease, result) = pool
            .run_filter_step(lease, AppliedFilters::new(), FilterField::Level, "panic".into())
            .await;
        assert!(matches!(result, Err(AutomationError::Other(_))));
        drop(lease);

        wait_for_idle(&pool, 1).await;
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert!(pool.acquire(Duration::from_secs(1)).await.is_some());
    }

    #[tokio::test]
    async fn test_start_fails_when_creation_fails() {
        let factory = Arc::new(FakeFactory {
            fail_after: Some(1),
            ..Default::default()
        });
        let result = ResourcePool::start(2, BlockingExecutor::new(2), factory.clone()).await;

        assert!(matches!(result, Err(PoolError::Create { index: 1, .. })));
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let (pool, factory) = fake_pool(2).await;
        let held = pool.acquire(Duration::from_secs(1)).await.unwrap();

        pool.close_all().await;
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert!(pool.acquire(Duration::from_millis(10)).await.is_none());

        drop(held);
        for _ in 0..100 {
            if factory.closed.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(factory.closed.load(Ordering::SeqCst), 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_all_waits_for_failed_session() {
        let executor = BlockingExecutor::new(2);
        let factory = Arc::new(FakeFactory::default());
        let pool = ResourcePool::start(1, executor.clone(), factory.clone())
            .await
            .unwrap();
        let lease = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let (lease, result) = pool
            .run_filter_step(lease, AppliedFilters::new(), FilterField::Level, "missing".into())
            .await;
        assert!(result.is_err());

        pool.release(Some(lease));
        pool.close_all().await;
        executor.close();

        // The failed session is closed and no replacement is launched
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().idle, 0);
    }
}
