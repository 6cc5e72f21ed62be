//! Container pool cache — warm containers per function on one worker.
//!
//! Each container moves through
//! `absent → (provision) → busy → (release) → warm-idle → (acquire) → busy`
//! and leaves the pool only from warm-idle (eviction, reset, trim) or when
//! its invocation reports it unusable.
//!
//! Bounds: the containers of one function (idle, busy, provisioning, or
//! draining after a reset) never exceed `container_pool_limit`, and all
//! resident containers on the worker never exceed `container_pool_num`.
//!
//! When no slot is free an acquire waits until a release, eviction or reset
//! frees one, up to the pool's acquire timeout, then fails with
//! [`PoolError::PoolExhausted`]. If only the worker-wide bound blocks, the
//! least recently used idle container of another function is evicted to
//! make room.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use hotfn_core::{
    CachingOptions, CachingOptionsUpdate, ExecutionMeta, FunctionSpec, OptionsError, WorkerConfig,
};

use crate::driver::{ContainerDriver, ContainerHandle, ImageHandle};
use crate::error::PoolError;

/// Configuration for a container pool cache.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub options: CachingOptions,
    /// The functions this worker serves.
    pub functions: Vec<FunctionSpec>,
    /// How long `acquire` waits for a slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            options: CachingOptions::default(),
            functions: Vec::new(),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn from_worker_config(config: &WorkerConfig) -> Self {
        Self {
            options: config.caching.clone(),
            functions: config.functions.clone(),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        }
    }
}

/// Result of a `configure` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureOutcome {
    pub changed: bool,
    /// Rest mode was toggled and the image table dropped.
    pub images_reset: bool,
    pub options: CachingOptions,
}

/// Per-image counts for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStats {
    pub function: String,
    pub image_built: bool,
    pub idle: usize,
    pub busy: usize,
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub options: CachingOptions,
    /// Sorted by function name.
    pub images: Vec<ImageStats>,
    /// Busy containers left over from a previous reset.
    pub draining: usize,
    pub total_resident: usize,
}

struct IdleContainer {
    handle: ContainerHandle,
    last_used: Instant,
}

/// Per-function record: the built image and its containers.
#[derive(Default)]
struct Image {
    image: Option<ImageHandle>,
    /// Least recently used at the front.
    idle: VecDeque<IdleContainer>,
    /// Checked out or being provisioned.
    busy: usize,
}

struct PoolState {
    options: CachingOptions,
    images: HashMap<String, Image>,
    /// Busy containers from before the last reset, per function.
    draining: HashMap<String, usize>,
    /// Bumped on every reset; leases from older epochs are destroyed on release.
    epoch: u64,
}

enum Plan {
    Warm(ContainerHandle),
    Provision {
        image: Option<ImageHandle>,
        evicted: Option<ContainerHandle>,
    },
    Wait,
}

impl PoolState {
    fn resident(&self, function: &str) -> usize {
        let own = self
            .images
            .get(function)
            .map(|img| img.idle.len() + img.busy)
            .unwrap_or(0);
        own + self.draining.get(function).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        let own: usize = self
            .images
            .values()
            .map(|img| img.idle.len() + img.busy)
            .sum();
        own + self.draining.values().sum::<usize>()
    }

    fn plan(&mut self, function: &str) -> Plan {
        if let Some(img) = self.images.get_mut(function) {
            if let Some(idle) = img.idle.pop_back() {
                img.busy += 1;
                return Plan::Warm(idle.handle);
            }
        }

        if self.resident(function) >= self.options.container_pool_limit {
            return Plan::Wait;
        }

        let mut evicted = None;
        if self.total() >= self.options.container_pool_num {
            evicted = self.pop_lru_idle();
            if evicted.is_none() {
                return Plan::Wait;
            }
        }

        let img = self.images.entry(function.to_string()).or_default();
        img.busy += 1;
        Plan::Provision {
            image: img.image.clone(),
            evicted,
        }
    }

    /// Remove the least recently used idle container across all functions.
    fn pop_lru_idle(&mut self) -> Option<ContainerHandle> {
        let victim = self
            .images
            .iter()
            .filter_map(|(name, img)| img.idle.front().map(|c| (name.clone(), c.last_used)))
            .min_by_key(|(_, last_used)| *last_used)
            .map(|(name, _)| name)?;
        self.images
            .get_mut(&victim)
            .and_then(|img| img.idle.pop_front())
            .map(|c| c.handle)
    }

    /// Destroy every idle container and mark busy ones as draining.
    fn retire_all(&mut self, drop_image_table: bool) -> Vec<ContainerHandle> {
        let mut victims = Vec::new();
        for (name, img) in self.images.iter_mut() {
            victims.extend(img.idle.drain(..).map(|c| c.handle));
            if img.busy > 0 {
                *self.draining.entry(name.clone()).or_default() += img.busy;
                img.busy = 0;
            }
        }
        if drop_image_table {
            self.images.clear();
        }
        self.epoch += 1;
        victims
    }

    /// Evict idle containers until both bounds hold again.
    fn trim_to_bounds(&mut self) -> Vec<ContainerHandle> {
        let mut victims = Vec::new();
        let limit = self.options.container_pool_limit;
        let names: Vec<String> = self.images.keys().cloned().collect();
        for name in names {
            while self.resident(&name) > limit {
                match self.images.get_mut(&name).and_then(|img| img.idle.pop_front()) {
                    Some(c) => victims.push(c.handle),
                    None => break,
                }
            }
        }
        while self.total() > self.options.container_pool_num {
            match self.pop_lru_idle() {
                Some(c) => victims.push(c),
                None => break,
            }
        }
        victims
    }

    /// Return a checked-out slot. Yields the container if it must be destroyed.
    fn settle(
        &mut self,
        function: &str,
        epoch: u64,
        container: Option<ContainerHandle>,
        usable: bool,
    ) -> Option<ContainerHandle> {
        if epoch != self.epoch {
            if let Some(count) = self.draining.get_mut(function) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.draining.remove(function);
                }
            }
            return container;
        }

        let Some(img) = self.images.get_mut(function) else {
            return container;
        };
        img.busy = img.busy.saturating_sub(1);
        let container = container?;

        // The slot is free now; keep the container only if it fits again.
        let fits = self.resident(function) < self.options.container_pool_limit
            && self.total() < self.options.container_pool_num;
        if !usable || !fits {
            return Some(container);
        }
        if let Some(img) = self.images.get_mut(function) {
            img.idle.push_back(IdleContainer {
                handle: container,
                last_used: Instant::now(),
            });
        }
        None
    }
}

struct PoolShared {
    driver: Arc<dyn ContainerDriver>,
    catalog: HashMap<String, FunctionSpec>,
    state: Mutex<PoolState>,
    slot_freed: Notify,
    acquire_timeout: Duration,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(
        &self,
        function: &str,
        epoch: u64,
        container: Option<ContainerHandle>,
        usable: bool,
    ) -> Option<ContainerHandle> {
        let doomed = self.lock().settle(function, epoch, container, usable);
        self.slot_freed.notify_waiters();
        doomed
    }

    async fn destroy(&self, containers: Vec<ContainerHandle>) -> usize {
        let count = containers.len();
        let results = join_all(containers.iter().map(|c| self.driver.stop(c))).await;
        for (container, result) in containers.iter().zip(results) {
            if let Err(e) = result {
                warn!(function = %container.function, container = %container.id, error = %e, "failed to stop container");
            }
        }
        count
    }
}

/// A container checked out for one invocation.
///
/// Hand it back with [`ContainerPoolCache::release`]. A lease dropped
/// without release frees its slot and destroys the container.
pub struct Lease {
    shared: Arc<PoolShared>,
    container: Option<ContainerHandle>,
    function: FunctionSpec,
    epoch: u64,
    cold_start: bool,
    image_built: bool,
    image_name: String,
}

impl Lease {
    pub fn container(&self) -> &ContainerHandle {
        self.container
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease container taken before release"))
    }

    pub fn function(&self) -> &FunctionSpec {
        &self.function
    }

    pub fn cold_start(&self) -> bool {
        self.cold_start
    }

    pub fn meta(&self) -> ExecutionMeta {
        ExecutionMeta {
            cold_start: self.cold_start,
            image_built: self.image_built,
            image_name: self.image_name.clone(),
            container_name: self.container().id.clone(),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(container) = self.container.take() else {
            return;
        };
        warn!(function = %self.function.name, container = %container.id, "lease dropped without release");
        let Some(doomed) = self
            .shared
            .settle(&self.function.name, self.epoch, Some(container), false)
        else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            handle.spawn(async move {
                shared.destroy(vec![doomed]).await;
            });
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("function", &self.function.name)
            .field("container", &self.container)
            .field("epoch", &self.epoch)
            .field("cold_start", &self.cold_start)
            .finish()
    }
}

/// A slot reserved for a container that is still being provisioned.
///
/// Dropped before [`Reservation::into_lease`], e.g. when the acquiring
/// future is cancelled or provisioning fails, it hands the slot back.
struct Reservation {
    shared: Arc<PoolShared>,
    function: String,
    epoch: u64,
    armed: bool,
}

impl Reservation {
    fn into_lease(
        mut self,
        container: ContainerHandle,
        function: FunctionSpec,
        image: ImageHandle,
        image_built: bool,
    ) -> Lease {
        self.armed = false;
        Lease {
            shared: Arc::clone(&self.shared),
            container: Some(container),
            image_name: image.name,
            function,
            epoch: self.epoch,
            cold_start: true,
            image_built,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            debug!(function = %self.function, "container slot reservation released");
            self.shared.settle(&self.function, self.epoch, None, false);
        }
    }
}

/// Warm container pools for every function on one worker.
#[derive(Clone)]
pub struct ContainerPoolCache {
    shared: Arc<PoolShared>,
}

impl ContainerPoolCache {
    pub fn new(driver: Arc<dyn ContainerDriver>, config: PoolConfig) -> Self {
        let catalog = config
            .functions
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();
        Self {
            shared: Arc::new(PoolShared {
                driver,
                catalog,
                state: Mutex::new(PoolState {
                    options: config.options,
                    images: HashMap::new(),
                    draining: HashMap::new(),
                    epoch: 0,
                }),
                slot_freed: Notify::new(),
                acquire_timeout: config.acquire_timeout,
            }),
        }
    }

    pub fn driver(&self) -> &Arc<dyn ContainerDriver> {
        &self.shared.driver
    }

    pub fn options(&self) -> CachingOptions {
        self.shared.lock().options.clone()
    }

    /// Configured function names, sorted.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.catalog.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check out a container for `function`, waiting for a slot if needed.
    pub async fn acquire(&self, function: &str) -> Result<Lease, PoolError> {
        self.acquire_inner(function, true).await
    }

    async fn acquire_inner(&self, function: &str, wait: bool) -> Result<Lease, PoolError> {
        let spec = self
            .shared
            .catalog
            .get(function)
            .cloned()
            .ok_or_else(|| PoolError::UnknownFunction(function.to_string()))?;
        let deadline = Instant::now() + self.shared.acquire_timeout;

        loop {
            // Register for wakeups before inspecting state so a release
            // between the check and the wait is not missed.
            let notified = self.shared.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (plan, epoch) = {
                let mut state = self.shared.lock();
                if !state.options.admits_code_size(spec.code_size) {
                    return Err(PoolError::CodeSizeExceeded {
                        function: spec.name.clone(),
                        size: spec.code_size,
                        limit: state.options.user_code_size_limit,
                    });
                }
                (state.plan(function), state.epoch)
            };

            match plan {
                Plan::Warm(container) => {
                    debug!(%function, container = %container.id, "warm container reused");
                    return Ok(Lease {
                        shared: Arc::clone(&self.shared),
                        container: Some(container),
                        image_name: spec.image_name(),
                        function: spec,
                        epoch,
                        cold_start: false,
                        image_built: false,
                    });
                }
                Plan::Provision { image, evicted } => {
                    let reservation = Reservation {
                        shared: Arc::clone(&self.shared),
                        function: spec.name.clone(),
                        epoch,
                        armed: true,
                    };
                    if let Some(victim) = evicted {
                        debug!(%function, victim = %victim.id, victim_function = %victim.function, "evicted idle container for capacity");
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(async move {
                            shared.destroy(vec![victim]).await;
                        });
                    }
                    return self.provision(reservation, spec, image).await;
                }
                Plan::Wait if !wait => return Err(PoolError::PoolExhausted(function.to_string())),
                Plan::Wait => {
                    debug!(%function, "pool full, waiting for a slot");
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        warn!(%function, "timed out waiting for a container slot");
                        return Err(PoolError::PoolExhausted(function.to_string()));
                    }
                }
            }
        }
    }

    /// Cold-provision a container on an already reserved slot.
    async fn provision(
        &self,
        reservation: Reservation,
        spec: FunctionSpec,
        image: Option<ImageHandle>,
    ) -> Result<Lease, PoolError> {
        let driver = &self.shared.driver;
        let (image, image_built) = match image {
            Some(image) => (image, false),
            None => match driver.build_image(&spec).await {
                Ok(image) => {
                    let mut state = self.shared.lock();
                    if state.epoch == reservation.epoch {
                        if let Some(img) = state.images.get_mut(&spec.name) {
                            img.image.get_or_insert_with(|| image.clone());
                        }
                    }
                    (image, true)
                }
                Err(e) => return Err(provision_failure(reservation, e)),
            },
        };

        match driver.start(&spec, &image).await {
            Ok(container) => {
                info!(function = %spec.name, container = %container.id, image_built, "container provisioned");
                Ok(reservation.into_lease(container, spec, image, image_built))
            }
            Err(e) => Err(provision_failure(reservation, e)),
        }
    }

    /// Hand a container back. Usable containers become warm-idle.
    pub async fn release(&self, mut lease: Lease, usable: bool) {
        let Some(container) = lease.container.take() else {
            return;
        };
        let doomed = self
            .shared
            .settle(&lease.function.name, lease.epoch, Some(container), usable);
        if let Some(doomed) = doomed {
            debug!(function = %lease.function.name, container = %doomed.id, usable, "container destroyed on release");
            self.shared.destroy(vec![doomed]).await;
        }
    }

    /// Provision one warm container for every configured function that has none.
    ///
    /// All functions are attempted; the error lists every failure.
    pub async fn prepare_images(&self) -> Result<Vec<String>, PoolError> {
        let pending: Vec<String> = {
            let state = self.shared.lock();
            self.function_names()
                .into_iter()
                .filter(|name| {
                    state
                        .images
                        .get(name)
                        .is_none_or(|img| img.idle.is_empty())
                })
                .collect()
        };

        let results = join_all(pending.iter().map(|name| async move {
            let lease = self.acquire_inner(name, false).await?;
            self.release(lease, true).await;
            Ok::<_, PoolError>(())
        }))
        .await;

        let mut prepared = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in pending.into_iter().zip(results) {
            match result {
                Ok(()) => prepared.push(name),
                Err(e) => failures.push(e.to_string()),
            }
        }
        if !failures.is_empty() {
            warn!(failed = failures.len(), "image preparation incomplete");
            return Err(PoolError::PrepareFailed(failures));
        }
        info!(prepared = prepared.len(), "images prepared");
        Ok(prepared)
    }

    /// Destroy every container. With `drop_image_table` also forget the images.
    pub async fn reset(&self, drop_image_table: bool) -> usize {
        let victims = self.shared.lock().retire_all(drop_image_table);
        self.shared.slot_freed.notify_waiters();
        let destroyed = self.shared.destroy(victims).await;
        info!(destroyed, drop_image_table, "container pool reset");
        destroyed
    }

    /// Apply a partial options update.
    ///
    /// Toggling rest mode in either direction drops the image table, as a
    /// `reset(true)` would.
    pub async fn configure(&self, update: &CachingOptionsUpdate) -> Result<ConfigureOutcome, OptionsError> {
        let (outcome, victims) = {
            let mut state = self.shared.lock();
            let change = state.options.apply(update)?;
            let mut victims = Vec::new();
            if change.rest_mode_toggled {
                victims = state.retire_all(true);
            }
            victims.extend(state.trim_to_bounds());
            let outcome = ConfigureOutcome {
                changed: change.changed,
                images_reset: change.rest_mode_toggled,
                options: state.options.clone(),
            };
            (outcome, victims)
        };
        self.shared.slot_freed.notify_waiters();

        if outcome.images_reset {
            info!(using_rest_mode = outcome.options.using_rest_mode, "rest mode toggled, image table dropped");
        }
        if outcome.changed {
            info!(options = ?outcome.options, "caching options changed");
        }
        self.shared.destroy(victims).await;
        Ok(outcome)
    }

    /// Destroy idle containers unused for longer than the rest lifetime.
    ///
    /// Does nothing unless rest mode is on.
    pub async fn evict_expired(&self) -> usize {
        let victims = {
            let mut state = self.shared.lock();
            if !state.options.using_rest_mode {
                return 0;
            }
            let lifetime = state.options.rest_lifetime();
            let now = Instant::now();
            let mut victims = Vec::new();
            for img in state.images.values_mut() {
                let mut kept = VecDeque::with_capacity(img.idle.len());
                for c in img.idle.drain(..) {
                    if now.duration_since(c.last_used) > lifetime {
                        victims.push(c.handle);
                    } else {
                        kept.push_back(c);
                    }
                }
                img.idle = kept;
            }
            victims
        };
        if victims.is_empty() {
            return 0;
        }
        self.shared.slot_freed.notify_waiters();
        let evicted = self.shared.destroy(victims).await;
        debug!(evicted, "expired idle containers evicted");
        evicted
    }

    /// Containers of `function` counted against its pool limit.
    pub fn resident(&self, function: &str) -> usize {
        self.shared.lock().resident(function)
    }

    pub fn total_resident(&self) -> usize {
        self.shared.lock().total()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        let mut images: Vec<ImageStats> = state
            .images
            .iter()
            .map(|(name, img)| ImageStats {
                function: name.clone(),
                image_built: img.image.is_some(),
                idle: img.idle.len(),
                busy: img.busy,
            })
            .collect();
        images.sort_by(|a, b| a.function.cmp(&b.function));
        PoolStats {
            options: state.options.clone(),
            images,
            draining: state.draining.values().sum(),
            total_resident: state.total(),
        }
    }
}

fn provision_failure(reservation: Reservation, error: anyhow::Error) -> PoolError {
    warn!(function = %reservation.function, error = %error, "container provisioning failed");
    let function = reservation.function.clone();
    drop(reservation);
    PoolError::ProvisionFailure {
        function,
        message: format!("{error:#}"),
    }
}
