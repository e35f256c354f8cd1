//! Model lifecycle manager.
//!
//! A bounded cache of loaded model handles shared by every request of an
//! orchestrator instance.
//!
//! - Entries with `use_count > 0` are pinned and never evicted.
//! - When a new model does not fit, unpinned entries are evicted in least
//!   recently used order. If evicting all of them would still not make
//!   room, the load fails with `CapacityExceeded` and nothing is evicted.
//! - Concurrent requests for the same absent model share one backend load.
//! - All state lives behind a single non-reentrant lock. Helpers that run
//!   while it is held take `&mut RegistryState` and never lock again.
//!   Backend calls (load, unload) always happen after the lock is released.
//!
//! In-flight loads reserve their slot and memory estimate, so the number of
//! resident models never exceeds `max_models` once a load lands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{BackendError, DomainError, DomainResult};
use crate::domain::models::{Device, ModelHandle, ModelSpec, ModelTier, Quantization, RegistryConfig};
use crate::domain::ports::ModelBackend;
use crate::services::event_bus::{
    EventBus, EventCategory, EventPayload, EventSeverity, EvictionReason, OrchestratorEvent,
};
use crate::services::retry::{RetryError, RetryPolicy};

type SharedLoad = Shared<BoxFuture<'static, Result<ModelHandle, DomainError>>>;

/// A resident model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCacheEntry {
    pub model_id: String,
    pub tier: ModelTier,
    pub quantization: Quantization,
    pub device: Device,
    pub handle: ModelHandle,
    pub memory_estimate_mb: u64,
    pub loaded_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Tasks currently holding the model. Non-zero means pinned.
    pub use_count: usize,
    /// Acquisitions since the model was loaded.
    pub total_uses: u64,
    #[serde(skip)]
    last_used_tick: u64,
    #[serde(skip)]
    load_id: u64,
}

impl ModelCacheEntry {
    pub fn is_pinned(&self) -> bool {
        self.use_count > 0
    }
}

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub models_loaded: usize,
    pub loads_in_flight: usize,
    pub max_models: usize,
    pub memory_budget_mb: u64,
    pub total_memory_mb: u64,
    pub total_uses: u64,
    pub pinned: usize,
    /// Resident entries, least recently used first.
    pub models: Vec<ModelCacheEntry>,
}

enum Acquire {
    Hit(ModelHandle),
    Wait {
        future: SharedLoad,
        load_id: u64,
        evicted: Vec<(ModelCacheEntry, EvictionReason)>,
    },
    Rejected(DomainError, Vec<(ModelCacheEntry, EvictionReason)>),
}

struct LoadSlot {
    load_id: u64,
    memory_mb: u64,
    waiters: usize,
    future: SharedLoad,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, ModelCacheEntry>,
    loading: HashMap<String, LoadSlot>,
    clock: u64,
    next_load_id: u64,
}

impl RegistryState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn slots_in_use(&self) -> usize {
        self.entries.len() + self.loading.len()
    }

    fn reserved_mb(&self) -> u64 {
        let resident: u64 = self.entries.values().map(|e| e.memory_estimate_mb).sum();
        let in_flight: u64 = self.loading.values().map(|s| s.memory_mb).sum();
        resident + in_flight
    }

    /// Unpinned entries, least recently used first.
    fn eviction_candidates(&self) -> Vec<(String, u64)> {
        let mut candidates: Vec<&ModelCacheEntry> =
            self.entries.values().filter(|e| !e.is_pinned()).collect();
        candidates.sort_by_key(|e| e.last_used_tick);
        candidates
            .into_iter()
            .map(|e| (e.model_id.clone(), e.memory_estimate_mb))
            .collect()
    }

    /// Remove an entry. Called with the lock held; must not lock again.
    fn remove_locked(&mut self, model_id: &str) -> Option<ModelCacheEntry> {
        self.entries.remove(model_id)
    }
}

struct RegistryShared {
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
    config: RegistryConfig,
    events: Option<Arc<EventBus>>,
    state: Mutex<RegistryState>,
}

/// Bounded, thread-safe cache of loaded models.
///
/// Cloning is cheap and yields another handle to the same registry.
#[derive(Clone)]
pub struct ModelRegistry {
    shared: Arc<RegistryShared>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ModelRegistry")
            .field("backend", &self.shared.backend.name())
            .field("max_models", &self.shared.config.max_models)
            .field("resident", &state.entries.len())
            .field("loading", &state.loading.len())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new(backend: Arc<dyn ModelBackend>, config: RegistryConfig, retry: RetryPolicy) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                backend,
                retry,
                config,
                events: None,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Publish lifecycle events to `events`. Only takes effect before the
    /// registry is cloned.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.events = Some(events),
            None => warn!("event bus attached to a shared registry; events disabled"),
        }
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> Arc<dyn ModelBackend> {
        self.shared.backend.clone()
    }

    /// Acquire a model, loading it if it is not resident.
    ///
    /// The returned handle is pinned until `release` is called for the same
    /// model id. If this future is dropped before it resolves, the pending
    /// acquisition is withdrawn.
    pub async fn get_or_load(&self, spec: &ModelSpec) -> DomainResult<ModelHandle> {
        let (future, load_id, evicted) = match self.begin_acquire(spec) {
            Acquire::Hit(handle) => return Ok(handle),
            Acquire::Rejected(err, evicted) => {
                self.finish_evictions(evicted).await;
                return Err(err);
            }
            Acquire::Wait {
                future,
                load_id,
                evicted,
            } => (future, load_id, evicted),
        };

        let guard = WaiterGuard {
            shared: self.shared.clone(),
            model_id: spec.model_id.clone(),
            load_id,
            armed: true,
        };

        self.finish_evictions(evicted).await;

        let result = future.await;
        guard.disarm();
        result
    }

    /// Decide, under the lock, how `spec` will be acquired.
    fn begin_acquire(&self, spec: &ModelSpec) -> Acquire {
        let mut state = self.shared.state.lock();
        let tick = state.tick();

        if let Some(entry) = state.entries.get_mut(&spec.model_id) {
            entry.use_count += 1;
            entry.total_uses += 1;
            entry.last_used_at = Utc::now();
            entry.last_used_tick = tick;
            debug!(
                model_id = %spec.model_id,
                use_count = entry.use_count,
                "model cache hit"
            );
            return Acquire::Hit(entry.handle.clone());
        }

        if let Some(slot) = state.loading.get_mut(&spec.model_id) {
            slot.waiters += 1;
            debug!(
                model_id = %spec.model_id,
                waiters = slot.waiters,
                "joining in-flight model load"
            );
            return Acquire::Wait {
                future: slot.future.clone(),
                load_id: slot.load_id,
                evicted: Vec::new(),
            };
        }

        let memory_mb = spec.memory_estimate_mb();
        let mut evicted: Vec<(ModelCacheEntry, EvictionReason)> =
            relieve_pressure_locked(&mut state, &self.shared.config)
                .into_iter()
                .map(|e| (e, EvictionReason::Pressure))
                .collect();
        match make_room_locked(&mut state, &self.shared.config, &spec.model_id, memory_mb) {
            Ok(more) => evicted.extend(more.into_iter().map(|e| (e, EvictionReason::Capacity))),
            Err(err) => {
                warn!(model_id = %spec.model_id, error = %err, "model rejected");
                return Acquire::Rejected(err, evicted);
            }
        }

        state.next_load_id += 1;
        let load_id = state.next_load_id;
        let future = self.start_load(spec.clone(), load_id);
        state.loading.insert(
            spec.model_id.clone(),
            LoadSlot {
                load_id,
                memory_mb,
                waiters: 1,
                future: future.clone(),
            },
        );
        info!(
            model_id = %spec.model_id,
            tier = spec.tier.as_str(),
            quantization = spec.quantization.as_str(),
            device = %spec.device,
            memory_estimate_mb = memory_mb,
            "loading model"
        );
        Acquire::Wait {
            future,
            load_id,
            evicted,
        }
    }

    /// Fail if `spec` can never be loaded under this registry's limits.
    ///
    /// Does not load, pin or evict anything.
    pub fn check_admissible(&self, spec: &ModelSpec) -> DomainResult<()> {
        check_admissible(&self.shared.config, &spec.model_id, spec.memory_estimate_mb())
    }

    /// Give back one acquisition of `model_id`.
    ///
    /// Never evicts. Returns false if the model was not held.
    pub fn release(&self, model_id: &str) -> bool {
        let mut state = self.shared.state.lock();
        match state.entries.get_mut(model_id) {
            Some(entry) if entry.use_count > 0 => {
                entry.use_count -= 1;
                debug!(model_id, use_count = entry.use_count, "model released");
                true
            }
            Some(_) => {
                warn!(model_id, "release of a model that is not in use");
                false
            }
            None => {
                warn!(model_id, "release of a model that is not resident");
                false
            }
        }
    }

    /// Remove an idle model and free its backend memory.
    ///
    /// Returns `Ok(false)` if the model is not resident.
    pub async fn unload(&self, model_id: &str) -> DomainResult<bool> {
        let entry = {
            let mut state = self.shared.state.lock();
            match state.entries.get(model_id).map(|e| e.use_count) {
                None => return Ok(false),
                Some(use_count) if use_count > 0 => {
                    return Err(DomainError::ModelInUse {
                        model_id: model_id.to_string(),
                        use_count,
                    });
                }
                Some(_) => state.remove_locked(model_id),
            }
        };

        let Some(entry) = entry else {
            return Ok(false);
        };
        self.shared.backend.unload(&entry.handle).await?;
        info!(model_id, "model unloaded");
        self.publish(EventPayload::ModelUnloaded {
            model_id: model_id.to_string(),
        });
        Ok(true)
    }

    /// Evict every unpinned model.
    pub async fn evict_idle(&self) -> Vec<String> {
        let evicted: Vec<ModelCacheEntry> = {
            let mut state = self.shared.state.lock();
            let ids: Vec<String> = state
                .eviction_candidates()
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            ids.iter().filter_map(|id| state.remove_locked(id)).collect()
        };
        let ids = evicted.iter().map(|e| e.model_id.clone()).collect();
        self.finish_evictions(
            evicted
                .into_iter()
                .map(|e| (e, EvictionReason::Forced))
                .collect(),
        )
        .await;
        ids
    }

    /// Evict idle models while usage is above the soft threshold.
    pub async fn relieve_pressure(&self) -> Vec<String> {
        let evicted = {
            let mut state = self.shared.state.lock();
            relieve_pressure_locked(&mut state, &self.shared.config)
        };
        let ids = evicted.iter().map(|e| e.model_id.clone()).collect();
        self.finish_evictions(
            evicted
                .into_iter()
                .map(|e| (e, EvictionReason::Pressure))
                .collect(),
        )
        .await;
        ids
    }

    /// Unload everything. Fails without evicting if any model is pinned.
    pub async fn clear(&self) -> DomainResult<usize> {
        {
            let state = self.shared.state.lock();
            if let Some(pinned) = state.entries.values().find(|e| e.is_pinned()) {
                return Err(DomainError::ModelInUse {
                    model_id: pinned.model_id.clone(),
                    use_count: pinned.use_count,
                });
            }
        }
        let evicted = self.evict_idle().await;
        info!(count = evicted.len(), "model registry cleared");
        Ok(evicted.len())
    }

    /// Resident model ids, least recently used first.
    pub fn list(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut entries: Vec<&ModelCacheEntry> = state.entries.values().collect();
        entries.sort_by_key(|e| e.last_used_tick);
        entries.into_iter().map(|e| e.model_id.clone()).collect()
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.shared.state.lock().entries.contains_key(model_id)
    }

    /// Snapshot of one resident entry.
    pub fn entry(&self, model_id: &str) -> Option<ModelCacheEntry> {
        self.shared.state.lock().entries.get(model_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.shared.state.lock();
        let mut models: Vec<ModelCacheEntry> = state.entries.values().cloned().collect();
        models.sort_by_key(|e| e.last_used_tick);
        RegistryStats {
            models_loaded: models.len(),
            loads_in_flight: state.loading.len(),
            max_models: self.shared.config.max_models,
            memory_budget_mb: self.shared.config.memory_budget_mb,
            total_memory_mb: models.iter().map(|e| e.memory_estimate_mb).sum(),
            total_uses: models.iter().map(|e| e.total_uses).sum(),
            pinned: models.iter().filter(|e| e.is_pinned()).count(),
            models,
        }
    }

    /// Run `relieve_pressure` on the configured interval until stopped.
    pub fn spawn_pressure_monitor(&self) -> MonitorHandle {
        let registry = self.clone();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicU64::new(0));
        let period = Duration::from_millis(self.shared.config.pressure_check_interval_ms.max(1));

        let flag = stop_flag.clone();
        let counter = runs.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis() as u64, "pressure monitor started");
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                let evicted = registry.relieve_pressure().await;
                counter.fetch_add(1, Ordering::Relaxed);
                if !evicted.is_empty() {
                    info!(evicted = ?evicted, "pressure monitor evicted idle models");
                }
            }
            info!("pressure monitor stopped");
        });

        MonitorHandle {
            stop_flag,
            runs,
            join,
        }
    }

    /// Spawn the backend load for `spec`. The spawned task records the
    /// outcome in the registry so the load completes even if every waiter
    /// goes away.
    fn start_load(&self, spec: ModelSpec, load_id: u64) -> SharedLoad {
        let shared = self.shared.clone();
        let model_id = spec.model_id.clone();

        let task = tokio::spawn({
            let shared = shared.clone();
            async move {
                let started = Instant::now();
                let backend = shared.backend.clone();
                let outcome = shared
                    .retry
                    .execute(&CancellationToken::new(), || backend.load(&spec))
                    .await;
                complete_load(&shared, &spec, load_id, outcome, started)
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    let mut state = shared.state.lock();
                    if state
                        .loading
                        .get(&model_id)
                        .is_some_and(|slot| slot.load_id == load_id)
                    {
                        state.loading.remove(&model_id);
                    }
                    Err(DomainError::ModelUnavailable {
                        model_id,
                        source: BackendError::Generation(format!("load task aborted: {join_err}")),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn finish_evictions(&self, evicted: Vec<(ModelCacheEntry, EvictionReason)>) {
        for (entry, reason) in evicted {
            info!(
                model_id = %entry.model_id,
                reason = ?reason,
                memory_estimate_mb = entry.memory_estimate_mb,
                "model evicted"
            );
            if let Err(err) = self.shared.backend.unload(&entry.handle).await {
                warn!(model_id = %entry.model_id, error = %err, "backend unload failed after eviction");
            }
            self.publish(EventPayload::ModelEvicted {
                model_id: entry.model_id,
                reason,
            });
        }
    }

    fn publish(&self, payload: EventPayload) {
        publish(&self.shared, payload);
    }
}

fn publish(shared: &RegistryShared, payload: EventPayload) {
    if let Some(events) = &shared.events {
        events.publish(OrchestratorEvent::new(
            EventSeverity::Info,
            EventCategory::Model,
            None,
            payload,
        ));
    }
}

/// Record a finished backend load. Waiters that joined the load become the
/// new entry's use count.
fn complete_load(
    shared: &RegistryShared,
    spec: &ModelSpec,
    load_id: u64,
    outcome: Result<ModelHandle, RetryError>,
    started: Instant,
) -> Result<ModelHandle, DomainError> {
    let load_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let mut state = shared.state.lock();
    let slot = match state.loading.get(&spec.model_id) {
        Some(slot) if slot.load_id == load_id => state.loading.remove(&spec.model_id),
        _ => None,
    };

    match outcome {
        Ok(handle) => {
            let waiters = slot.as_ref().map_or(0, |s| s.waiters);
            let memory_mb = slot.map_or_else(|| spec.memory_estimate_mb(), |s| s.memory_mb);
            let tick = state.tick();
            let now = Utc::now();
            state.entries.insert(
                spec.model_id.clone(),
                ModelCacheEntry {
                    model_id: spec.model_id.clone(),
                    tier: spec.tier,
                    quantization: spec.quantization,
                    device: spec.device,
                    handle: handle.clone(),
                    memory_estimate_mb: memory_mb,
                    loaded_at: now,
                    last_used_at: now,
                    use_count: waiters,
                    total_uses: waiters as u64,
                    last_used_tick: tick,
                    load_id,
                },
            );
            drop(state);
            info!(
                model_id = %spec.model_id,
                load_ms,
                use_count = waiters,
                "model loaded"
            );
            publish(
                shared,
                EventPayload::ModelLoaded {
                    model_id: spec.model_id.clone(),
                    memory_estimate_mb: memory_mb,
                    load_ms,
                },
            );
            Ok(handle)
        }
        Err(err) => {
            drop(state);
            let source = match err {
                RetryError::Backend(source) => source,
                RetryError::Cancelled { attempts } => {
                    BackendError::Unreachable(format!("load cancelled after {attempts} attempt(s)"))
                }
            };
            warn!(model_id = %spec.model_id, error = %source, "model load failed");
            Err(DomainError::ModelUnavailable {
                model_id: spec.model_id.clone(),
                source,
            })
        }
    }
}

/// Free enough slots and memory for an incoming model of `incoming_mb`.
///
/// Checks feasibility first so a failed insert evicts nothing.
fn make_room_locked(
    state: &mut RegistryState,
    config: &RegistryConfig,
    model_id: &str,
    incoming_mb: u64,
) -> DomainResult<Vec<ModelCacheEntry>> {
    let fail = |reason: String| DomainError::CapacityExceeded {
        model_id: model_id.to_string(),
        reason,
    };

    check_admissible(config, model_id, incoming_mb)?;

    let mut slots_needed = (state.slots_in_use() + 1).saturating_sub(config.max_models);
    let mut mb_needed = (state.reserved_mb() + incoming_mb).saturating_sub(config.memory_budget_mb);
    if slots_needed == 0 && mb_needed == 0 {
        return Ok(Vec::new());
    }

    let mut victims = Vec::new();
    for (id, mb) in state.eviction_candidates() {
        if slots_needed == 0 && mb_needed == 0 {
            break;
        }
        slots_needed = slots_needed.saturating_sub(1);
        mb_needed = mb_needed.saturating_sub(mb);
        victims.push(id);
    }

    if slots_needed > 0 || mb_needed > 0 {
        return Err(fail(format!(
            "{} of {} slots and {} of {} MB held by pinned or loading models",
            state.slots_in_use(),
            config.max_models,
            state.reserved_mb(),
            config.memory_budget_mb
        )));
    }

    Ok(victims
        .iter()
        .filter_map(|id| state.remove_locked(id))
        .collect())
}

/// Whether a model of `incoming_mb` could ever be resident, regardless of
/// what is currently loaded.
fn check_admissible(config: &RegistryConfig, model_id: &str, incoming_mb: u64) -> DomainResult<()> {
    let fail = |reason: String| DomainError::CapacityExceeded {
        model_id: model_id.to_string(),
        reason,
    };
    if config.max_models == 0 {
        return Err(fail("registry capacity is zero".to_string()));
    }
    if incoming_mb > config.memory_budget_mb {
        return Err(fail(format!(
            "estimate {incoming_mb} MB exceeds budget {} MB",
            config.memory_budget_mb
        )));
    }
    Ok(())
}

/// Evict idle models, least recently used first, while reserved memory is
/// above `soft_threshold` of the budget.
fn relieve_pressure_locked(state: &mut RegistryState, config: &RegistryConfig) -> Vec<ModelCacheEntry> {
    let soft_limit = soft_limit_mb(config);
    let mut evicted = Vec::new();
    if state.reserved_mb() <= soft_limit {
        return evicted;
    }
    for (id, _) in state.eviction_candidates() {
        if state.reserved_mb() <= soft_limit {
            break;
        }
        if let Some(entry) = state.remove_locked(&id) {
            evicted.push(entry);
        }
    }
    evicted
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn soft_limit_mb(config: &RegistryConfig) -> u64 {
    (config.memory_budget_mb as f64 * config.soft_threshold.clamp(0.0, 1.0)) as u64
}

/// Withdraws a pending acquisition if the waiting future is dropped.
struct WaiterGuard {
    shared: Arc<RegistryShared>,
    model_id: String,
    load_id: u64,
    armed: bool,
}

impl WaiterGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.state.lock();
        if let Some(slot) = state.loading.get_mut(&self.model_id) {
            if slot.load_id == self.load_id {
                slot.waiters = slot.waiters.saturating_sub(1);
                return;
            }
        }
        if let Some(entry) = state.entries.get_mut(&self.model_id) {
            if entry.load_id == self.load_id {
                entry.use_count = entry.use_count.saturating_sub(1);
            }
        }
    }
}

/// Handle to control the pressure monitor.
pub struct MonitorHandle {
    stop_flag: Arc<AtomicBool>,
    runs: Arc<AtomicU64>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Request the monitor to stop after its current check.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Completed pressure checks.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the monitor and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        self.join.abort();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::backends::MockModelBackend;

    fn tiny(id: &str) -> ModelSpec {
        ModelSpec::for_tier(id, ModelTier::Tier1)
    }

    fn registry(backend: Arc<MockModelBackend>, max_models: usize, budget_mb: u64) -> ModelRegistry {
        ModelRegistry::new(
            backend,
            RegistryConfig {
                max_models,
                memory_budget_mb: budget_mb,
                soft_threshold: 1.0,
                pressure_check_interval_ms: 10,
            },
            RetryPolicy::new(0, 1, 1, Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn test_admission_check_touches_nothing() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = registry(backend.clone(), 2, 1_000);

        assert!(reg.check_admissible(&tiny("a")).is_ok());
        let oversized = ModelSpec::for_tier("big", ModelTier::Tier3);
        let err = reg.check_admissible(&oversized).unwrap_err();
        assert!(matches!(err, DomainError::CapacityExceeded { .. }));
        assert!(reg.is_empty());
        assert_eq!(backend.load_count(), 0);
    }

    #[tokio::test]
    async fn test_hit_increments_use_count() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = registry(backend.clone(), 2, 16_384);

        let first = reg.get_or_load(&tiny("a")).await.unwrap();
        let second = reg.get_or_load(&tiny("a")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.load_count(), 1);
        assert_eq!(reg.entry("a").unwrap().use_count, 2);

        assert!(reg.release("a"));
        assert!(reg.release("a"));
        assert!(!reg.release("a"));
        assert_eq!(reg.entry("a").unwrap().use_count, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = registry(backend.clone(), 2, 16_384);

        for id in ["a", "b"] {
            reg.get_or_load(&tiny(id)).await.unwrap();
            reg.release(id);
        }
        // Touch a so b becomes least recently used.
        reg.get_or_load(&tiny("a")).await.unwrap();
        reg.release("a");

        reg.get_or_load(&tiny("c")).await.unwrap();
        reg.release("c");

        assert_eq!(reg.list(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(backend.unloaded_models(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_pinned_entries_are_never_evicted() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = registry(backend.clone(), 1, 16_384);

        reg.get_or_load(&tiny("a")).await.unwrap();
        let err = reg.get_or_load(&tiny("b")).await.unwrap_err();
        assert!(matches!(err, DomainError::CapacityExceeded { .. }));
        assert!(reg.is_loaded("a"));
        assert!(!reg.is_loaded("b"));
        assert_eq!(backend.unload_count(), 0);

        reg.release("a");
        reg.get_or_load(&tiny("b")).await.unwrap();
        assert_eq!(reg.list(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_budget_evicts_until_fit() {
        let backend = Arc::new(MockModelBackend::new());
        // Tier1 unquantized is 440 MB; room for two.
        let reg = registry(backend.clone(), 10, 1_000);

        for id in ["a", "b"] {
            reg.get_or_load(&tiny(id)).await.unwrap();
            reg.release(id);
        }
        reg.get_or_load(&tiny("c")).await.unwrap();
        assert_eq!(reg.list(), vec!["b".to_string(), "c".to_string()]);
        assert!(reg.stats().total_memory_mb <= 1_000);
    }

    #[tokio::test]
    async fn test_oversized_model_rejected_without_eviction() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = registry(backend.clone(), 3, 1_000);
        reg.get_or_load(&tiny("a")).await.unwrap();
        reg.release("a");

        let big = ModelSpec::for_tier("big", ModelTier::Tier3);
        let err = reg.get_or_load(&big).await.unwrap_err();
        assert!(matches!(err, DomainError::CapacityExceeded { .. }));
        assert!(reg.is_loaded("a"));
        assert_eq!(backend.load_count(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_load() {
        let backend = Arc::new(MockModelBackend::new().with_load_delay(Duration::from_millis(50)));
        let reg = registry(backend.clone(), 2, 16_384);

        let mut joins = Vec::new();
        for _ in 0..8 {
            let reg = reg.clone();
            joins.push(tokio::spawn(async move { reg.get_or_load(&tiny("x")).await }));
        }
        let mut handles = Vec::new();
        for join in joins {
            handles.push(join.await.unwrap().unwrap());
        }

        assert_eq!(backend.load_count(), 1);
        assert!(handles.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(reg.entry("x").unwrap().use_count, 8);
    }

    #[tokio::test]
    async fn test_failed_load_is_reported_and_not_cached() {
        let backend = Arc::new(MockModelBackend::new());
        backend.fail_load_for("a", BackendError::InvalidRequest("no such model".to_string()));
        let reg = registry(backend.clone(), 2, 16_384);

        let err = reg.get_or_load(&tiny("a")).await.unwrap_err();
        assert!(matches!(err, DomainError::ModelUnavailable { .. }));
        assert!(reg.is_empty());
        assert_eq!(reg.stats().loads_in_flight, 0);
    }

    #[tokio::test]
    async fn test_unload_requires_idle() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = registry(backend.clone(), 2, 16_384);

        reg.get_or_load(&tiny("a")).await.unwrap();
        let err = reg.unload("a").await.unwrap_err();
        assert!(matches!(err, DomainError::ModelInUse { use_count: 1, .. }));

        reg.release("a");
        assert!(reg.unload("a").await.unwrap());
        assert!(!reg.unload("a").await.unwrap());
        assert_eq!(backend.unload_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_waiter_withdraws_acquisition() {
        let backend = Arc::new(MockModelBackend::new().with_load_delay(Duration::from_millis(50)));
        let reg = registry(backend.clone(), 2, 16_384);

        let waiting = tokio::time::timeout(Duration::from_millis(5), reg.get_or_load(&tiny("a"))).await;
        assert!(waiting.is_err());

        // The load still lands, unpinned.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reg.entry("a").unwrap().use_count, 0);
    }

    #[tokio::test]
    async fn test_pressure_relief_evicts_idle_only() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = ModelRegistry::new(
            backend.clone(),
            RegistryConfig {
                max_models: 5,
                memory_budget_mb: 2_000,
                soft_threshold: 0.5,
                pressure_check_interval_ms: 10,
            },
            RetryPolicy::new(0, 1, 1, Duration::from_secs(5)),
        );

        // 440 MB each; the soft limit is 1000 MB.
        reg.get_or_load(&tiny("a")).await.unwrap();
        reg.get_or_load(&tiny("b")).await.unwrap();
        reg.get_or_load(&tiny("c")).await.unwrap();
        reg.release("a");
        reg.release("b");

        let evicted = reg.relieve_pressure().await;
        assert_eq!(evicted, vec!["a".to_string()]);
        assert!(reg.is_loaded("c"));
    }

    #[tokio::test]
    async fn test_pressure_monitor_runs_until_stopped() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = registry(backend, 2, 16_384);
        let monitor = reg.spawn_pressure_monitor();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(monitor.runs() >= 1);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_refuses_while_pinned() {
        let backend = Arc::new(MockModelBackend::new());
        let reg = registry(backend.clone(), 3, 16_384);
        reg.get_or_load(&tiny("a")).await.unwrap();
        reg.get_or_load(&tiny("b")).await.unwrap();
        reg.release("b");

        assert!(reg.clear().await.is_err());
        assert_eq!(reg.len(), 2);

        reg.release("a");
        assert_eq!(reg.clear().await.unwrap(), 2);
        assert!(reg.is_empty());
    }
}
