use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use crawlgate_model::{CounterKind, QueueKey, QueuedJob};

use super::{AcquireOutcome, ClaimRecord, LeaseStore, QueueStore, Scope, StoredClaim};
use crate::error::Result;

/// Single-process store. Every trait method runs under one lock, which gives
/// the same atomicity as a server-side script.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<tokio::sync::Mutex<State>>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MemoryStore");

        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("lease_sets", &state.leases.len())
                    .field("team_queues", &state.queues.len())
                    .field("claimed_jobs", &state.claims.len())
                    .field("claim_seq", &state.claim_seq);
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }

        debug.finish()
    }
}

#[derive(Debug, Default)]
struct State {
    /// lease key -> holder -> expires_at
    leases: HashMap<String, HashMap<String, i64>>,
    /// team -> jobs in serving order
    queues: HashMap<String, BTreeMap<QueueKey, QueuedJob>>,
    crawl_index: HashMap<String, BTreeSet<QueueKey>>,
    ttl_index: BTreeSet<(i64, QueueKey)>,
    /// job id -> version -> claim
    claims: BTreeMap<String, BTreeMap<u64, ClaimRecord>>,
    claim_seq: u64,
    /// scope -> owner -> job id -> expires_at
    active: HashMap<Scope, BTreeMap<String, BTreeMap<String, i64>>>,
    counters: HashMap<CounterKind, BTreeMap<String, i64>>,
}

impl State {
    fn bump(&mut self, kind: CounterKind, id: &str, delta: i64) {
        let values = self.counters.entry(kind).or_default();
        let value = values.entry(id.to_string()).or_insert(0);
        *value += delta;
        if *value == 0 {
            values.remove(id);
        }
    }

    fn remove_job(&mut self, key: &QueueKey) -> Option<QueuedJob> {
        let queue = self.queues.get_mut(&key.team_id)?;
        let job = queue.remove(key)?;
        if queue.is_empty() {
            self.queues.remove(&key.team_id);
        }

        if let Some(at) = job.times_out_at {
            self.ttl_index.remove(&(at, key.clone()));
        }
        if let Some(crawl_id) = &job.crawl_id {
            if let Some(index) = self.crawl_index.get_mut(crawl_id) {
                index.remove(key);
                if index.is_empty() {
                    self.crawl_index.remove(crawl_id);
                }
            }
            self.bump(CounterKind::CrawlQueue, crawl_id, -1);
        }
        self.claims.remove(&job.id);
        self.bump(CounterKind::TeamQueue, &key.team_id, -1);

        Some(job)
    }

    fn ground_truth(&self, kind: CounterKind, id: &str, now_ms: i64) -> i64 {
        let live_markers = |scope: Scope| {
            self.active
                .get(&scope)
                .and_then(|owners| owners.get(id))
                .map(|markers| markers.values().filter(|at| **at >= now_ms).count())
                .unwrap_or(0)
        };

        let count = match kind {
            CounterKind::TeamQueue => self.queues.get(id).map(BTreeMap::len).unwrap_or(0),
            CounterKind::CrawlQueue => self.crawl_index.get(id).map(BTreeSet::len).unwrap_or(0),
            CounterKind::TeamActive => live_markers(Scope::Team),
            CounterKind::CrawlActive => live_markers(Scope::Crawl),
        };
        count as i64
    }

    fn contains_job(&self, key: &QueueKey) -> bool {
        self.queues
            .get(&key.team_id)
            .is_some_and(|queue| queue.contains_key(key))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stored(job_id: &str, version: u64, claim: &ClaimRecord) -> StoredClaim {
    StoredClaim {
        job_id: job_id.to_string(),
        version,
        claim: claim.clone(),
    }
}

fn after_bound(after: Option<&str>) -> (Bound<&str>, Bound<&str>) {
    match after {
        Some(after) => (Bound::Excluded(after), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn acquire(
        &self,
        key: &str,
        holder_id: &str,
        limit: u32,
        now_ms: i64,
        ttl_ms: u64,
    ) -> Result<AcquireOutcome> {
        let mut state = self.state.lock().await;
        let set = state.leases.entry(key.to_string()).or_default();

        let before = set.len();
        set.retain(|_, expires_at| *expires_at > now_ms);
        let removed = (before - set.len()) as u64;
        let expires_at = now_ms + ttl_ms as i64;

        let granted = if let Some(existing) = set.get_mut(holder_id) {
            *existing = expires_at;
            true
        } else if (set.len() as u64) < u64::from(limit) {
            set.insert(holder_id.to_string(), expires_at);
            true
        } else {
            false
        };

        let count = set.len() as u64;
        if set.is_empty() {
            state.leases.remove(key);
        }

        Ok(AcquireOutcome {
            granted,
            count,
            removed,
        })
    }

    async fn renew(&self, key: &str, holder_id: &str, now_ms: i64, ttl_ms: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(set) = state.leases.get_mut(key) else {
            return Ok(false);
        };

        set.retain(|_, expires_at| *expires_at > now_ms);
        let renewed = match set.get_mut(holder_id) {
            Some(expires_at) => {
                *expires_at = now_ms + ttl_ms as i64;
                true
            }
            None => false,
        };

        if set.is_empty() {
            state.leases.remove(key);
        }
        Ok(renewed)
    }

    async fn release(&self, key: &str, holder_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.leases.get_mut(key) {
            set.remove(holder_id);
            if set.is_empty() {
                state.leases.remove(key);
            }
        }
        Ok(())
    }

    async fn count(&self, key: &str, now_ms: i64) -> Result<u64> {
        let mut state = self.state.lock().await;
        let Some(set) = state.leases.get_mut(key) else {
            return Ok(0);
        };

        set.retain(|_, expires_at| *expires_at > now_ms);
        let count = set.len() as u64;
        if count == 0 {
            state.leases.remove(key);
        }
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert_job(&self, job: &QueuedJob) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = job.queue_key();

        let replaced = state
            .queues
            .entry(job.team_id.clone())
            .or_default()
            .insert(key.clone(), job.clone());

        if let Some(previous) = &replaced
            && let Some(at) = previous.times_out_at
        {
            state.ttl_index.remove(&(at, key.clone()));
        }
        if let Some(at) = job.times_out_at {
            state.ttl_index.insert((at, key.clone()));
        }

        if let Some(crawl_id) = &job.crawl_id {
            state
                .crawl_index
                .entry(crawl_id.clone())
                .or_default()
                .insert(key.clone());
        }

        if replaced.is_none() {
            state.bump(CounterKind::TeamQueue, &job.team_id, 1);
            if let Some(crawl_id) = &job.crawl_id {
                state.bump(CounterKind::CrawlQueue, crawl_id, 1);
            }
        }
        Ok(())
    }

    async fn scan_team(&self, team_id: &str, limit: usize) -> Result<Vec<QueuedJob>> {
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(team_id)
            .map(|queue| queue.values().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_job(&self, key: &QueueKey) -> Result<Option<QueuedJob>> {
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(&key.team_id)
            .and_then(|queue| queue.get(key))
            .cloned())
    }

    async fn remove_job(&self, key: &QueueKey) -> Result<Option<QueuedJob>> {
        let mut state = self.state.lock().await;
        Ok(state.remove_job(key))
    }

    async fn remove_expired_job(&self, key: &QueueKey, now_ms: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let expired = state
            .queues
            .get(&key.team_id)
            .and_then(|queue| queue.get(key))
            .is_some_and(|job| job.is_expired(now_ms));

        if !expired || state.claims.contains_key(&key.job_id) {
            return Ok(false);
        }
        Ok(state.remove_job(key).is_some())
    }

    async fn expired_jobs(
        &self,
        now_ms: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<QueueKey>> {
        let state = self.state.lock().await;
        Ok(state
            .ttl_index
            .iter()
            .take_while(|(at, _)| *at < now_ms)
            .skip(offset)
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn append_claim(&self, key: &QueueKey, claim: &ClaimRecord) -> Result<Option<u64>> {
        let mut state = self.state.lock().await;
        if !state.contains_job(key) {
            return Ok(None);
        }

        state.claim_seq += 1;
        let version = state.claim_seq;
        state
            .claims
            .entry(key.job_id.clone())
            .or_default()
            .insert(version, claim.clone());
        Ok(Some(version))
    }

    async fn first_claim(&self, job_id: &str) -> Result<Option<StoredClaim>> {
        let state = self.state.lock().await;
        Ok(state
            .claims
            .get(job_id)
            .and_then(|claims| claims.first_key_value())
            .map(|(version, claim)| stored(job_id, *version, claim)))
    }

    async fn renew_claim(&self, job_id: &str, worker_id: &str, now_ms: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(mut owner) = state
            .claims
            .get_mut(job_id)
            .and_then(|claims| claims.first_entry())
        else {
            return Ok(false);
        };

        if owner.get().worker_id != worker_id {
            return Ok(false);
        }
        owner.get_mut().claimed_at = now_ms;
        Ok(true)
    }

    async fn clear_claims(&self, job_id: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        Ok(state
            .claims
            .remove(job_id)
            .map(|claims| claims.len() as u64)
            .unwrap_or(0))
    }

    async fn claimed_jobs(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .claims
            .range::<str, _>(after_bound(after))
            .take(limit)
            .map(|(job_id, _)| job_id.clone())
            .collect())
    }

    async fn team_job_ids(&self, team_id: &str, limit: usize) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(team_id)
            .map(|queue| queue.keys().take(limit).map(|k| k.job_id.clone()).collect())
            .unwrap_or_default())
    }

    async fn put_active(
        &self,
        scope: Scope,
        owner: &str,
        job_id: &str,
        expires_at: i64,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let is_new = state
            .active
            .entry(scope)
            .or_default()
            .entry(owner.to_string())
            .or_default()
            .insert(job_id.to_string(), expires_at)
            .is_none();

        if is_new {
            state.bump(scope.active_counter(), owner, 1);
        }
        Ok(is_new)
    }

    async fn remove_active(&self, scope: Scope, owner: &str, job_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(owners) = state.active.get_mut(&scope) else {
            return Ok(false);
        };
        let Some(markers) = owners.get_mut(owner) else {
            return Ok(false);
        };

        let existed = markers.remove(job_id).is_some();
        if markers.is_empty() {
            owners.remove(owner);
        }
        if existed {
            state.bump(scope.active_counter(), owner, -1);
        }
        Ok(existed)
    }

    async fn list_active(&self, scope: Scope, owner: &str) -> Result<Vec<(String, i64)>> {
        let state = self.state.lock().await;
        Ok(state
            .active
            .get(&scope)
            .and_then(|owners| owners.get(owner))
            .map(|markers| {
                markers
                    .iter()
                    .map(|(job_id, expires_at)| (job_id.clone(), *expires_at))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn expire_active(&self, scope: Scope, now_ms: i64, limit: usize) -> Result<u64> {
        let mut state = self.state.lock().await;
        let Some(owners) = state.active.get_mut(&scope) else {
            return Ok(0);
        };

        let mut expired: Vec<(String, String)> = Vec::new();
        'owners: for (owner, markers) in owners.iter() {
            for (job_id, expires_at) in markers {
                if expired.len() >= limit {
                    break 'owners;
                }
                if *expires_at < now_ms {
                    expired.push((owner.clone(), job_id.clone()));
                }
            }
        }

        for (owner, job_id) in &expired {
            if let Some(markers) = owners.get_mut(owner) {
                markers.remove(job_id);
                if markers.is_empty() {
                    owners.remove(owner);
                }
            }
        }
        for (owner, _) in &expired {
            state.bump(scope.active_counter(), owner, -1);
        }

        Ok(expired.len() as u64)
    }

    async fn get_counter(&self, kind: CounterKind, id: &str) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .counters
            .get(&kind)
            .and_then(|values| values.get(id))
            .copied()
            .unwrap_or(0))
    }

    async fn set_counter(&self, kind: CounterKind, id: &str, value: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let values = state.counters.entry(kind).or_default();
        if value == 0 {
            values.remove(id);
        } else {
            values.insert(id.to_string(), value);
        }
        Ok(())
    }

    async fn reconcile_counter(
        &self,
        kind: CounterKind,
        id: &str,
        now_ms: i64,
        tolerance: i64,
    ) -> Result<i64> {
        let mut state = self.state.lock().await;
        let truth = state.ground_truth(kind, id, now_ms);
        let cached = state
            .counters
            .get(&kind)
            .and_then(|values| values.get(id))
            .copied()
            .unwrap_or(0);

        let delta = truth - cached;
        if delta.abs() <= tolerance {
            return Ok(0);
        }

        let values = state.counters.entry(kind).or_default();
        if truth == 0 {
            values.remove(id);
        } else {
            values.insert(id.to_string(), truth);
        }
        Ok(delta)
    }

    async fn counter_ids(
        &self,
        kind: CounterKind,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .counters
            .get(&kind)
            .map(|values| {
                values
                    .range::<str, _>(after_bound(after))
                    .take(limit)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
