use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use crawlgate_model::{CounterKind, QueueKey, QueuedJob};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{AcquireOutcome, ClaimRecord, LeaseStore, QueueStore, Scope, StoredClaim};
use crate::error::{GateError, Result};

/// Redis scripts for atomic operations
mod scripts {
    use redis::Script;

    /// Counter helper shared by every script that touches cached counters.
    /// A counter that reaches zero is dropped together with its index entry.
    const COUNTERS: &str = r#"
        local function bump(prefix, kind, id, delta)
            local hash = prefix .. ':counter:' .. kind
            local index = prefix .. ':counter-ids:' .. kind
            local value = redis.call('HINCRBY', hash, id, delta)
            if value == 0 then
                redis.call('HDEL', hash, id)
                redis.call('ZREM', index, id)
            else
                redis.call('ZADD', index, 0, id)
            end
            return value
        end
    "#;

    /// Removes a job with all of its index entries and claims.
    const REMOVE_JOB: &str = r#"
        local function remove_job(prefix, team, member, token, job_id)
            local jobs = prefix .. ':jobs:' .. team
            local raw = redis.call('HGET', jobs, member)
            if not raw then
                return false
            end
            local job = cjson.decode(raw)

            redis.call('HDEL', jobs, member)
            redis.call('ZREM', prefix .. ':queue:' .. team, member)
            redis.call('ZREM', prefix .. ':ttl', token)
            if type(job.crawlId) == 'string' then
                redis.call('SREM', prefix .. ':crawl:' .. job.crawlId, token)
                bump(prefix, 'crawl_queue', job.crawlId, -1)
            end
            redis.call('DEL', prefix .. ':claims:' .. job_id)
            redis.call('ZREM', prefix .. ':claimed', job_id)
            bump(prefix, 'team_queue', team, -1)
            return raw
        end
    "#;

    /// Evict expired leases, then grant when the holder already owns a lease
    /// or the live count is below the limit.
    pub fn lease_acquire() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local ttl = tonumber(ARGV[2])
            local limit = tonumber(ARGV[3])
            local holder = ARGV[4]

            local removed = redis.call('ZREMRANGEBYSCORE', key, '-inf', now)
            local current = redis.call('ZCARD', key)

            if redis.call('ZSCORE', key, holder) then
                redis.call('ZADD', key, now + ttl, holder)
                return {1, current, removed}
            end

            if current < limit then
                redis.call('ZADD', key, now + ttl, holder)
                return {1, current + 1, removed}
            end

            return {0, current, removed}
            "#,
        )
    }

    pub fn lease_renew() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local ttl = tonumber(ARGV[2])
            local holder = ARGV[3]

            redis.call('ZREMRANGEBYSCORE', key, '-inf', now)
            if redis.call('ZSCORE', key, holder) then
                redis.call('ZADD', key, 'XX', now + ttl, holder)
                return 1
            end
            return 0
            "#,
        )
    }

    pub fn lease_count() -> Script {
        Script::new(
            r#"
            redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', tonumber(ARGV[1]))
            return redis.call('ZCARD', KEYS[1])
            "#,
        )
    }

    pub fn insert_job() -> Script {
        let body = r#"
            local prefix = ARGV[1]
            local team = ARGV[2]
            local member = ARGV[3]
            local token = ARGV[4]
            local json = ARGV[5]
            local timeout = ARGV[6]
            local crawl = ARGV[7]

            local existed = redis.call('HEXISTS', KEYS[2], member) == 1
            redis.call('ZADD', KEYS[1], 0, member)
            redis.call('HSET', KEYS[2], member, json)

            if timeout ~= '' then
                redis.call('ZADD', KEYS[3], tonumber(timeout), token)
            else
                redis.call('ZREM', KEYS[3], token)
            end

            if crawl ~= '' then
                redis.call('SADD', prefix .. ':crawl:' .. crawl, token)
            end

            if not existed then
                bump(prefix, 'team_queue', team, 1)
                if crawl ~= '' then
                    bump(prefix, 'crawl_queue', crawl, 1)
                end
                return 1
            end
            return 0
        "#;
        Script::new(&format!("{COUNTERS}{body}"))
    }

    pub fn scan_team() -> Script {
        Script::new(
            r#"
            local members = redis.call('ZRANGE', KEYS[1], 0, tonumber(ARGV[1]) - 1)
            if #members == 0 then
                return {}
            end
            return redis.call('HMGET', KEYS[2], unpack(members))
            "#,
        )
    }

    pub fn remove_job() -> Script {
        let body = r#"
            return remove_job(ARGV[1], ARGV[2], ARGV[3], ARGV[4], ARGV[5])
        "#;
        Script::new(&format!("{COUNTERS}{REMOVE_JOB}{body}"))
    }

    /// Only removes a job that is still queued, unclaimed and past its
    /// timeout.
    pub fn remove_expired_job() -> Script {
        let body = r#"
            local prefix = ARGV[1]
            local team = ARGV[2]
            local member = ARGV[3]
            local job_id = ARGV[5]
            local now = tonumber(ARGV[6])

            local raw = redis.call('HGET', prefix .. ':jobs:' .. team, member)
            if not raw then
                return 0
            end
            local job = cjson.decode(raw)
            if type(job.timesOutAt) ~= 'number' or job.timesOutAt >= now then
                return 0
            end
            if redis.call('EXISTS', prefix .. ':claims:' .. job_id) == 1 then
                return 0
            end

            remove_job(prefix, team, member, ARGV[4], job_id)
            return 1
        "#;
        Script::new(&format!("{COUNTERS}{REMOVE_JOB}{body}"))
    }

    /// Claims get a store-wide increasing version so that the lowest version
    /// of a job names its single owner.
    pub fn append_claim() -> Script {
        Script::new(
            r#"
            if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
                return false
            end
            local version = redis.call('INCR', KEYS[4])
            redis.call('ZADD', KEYS[2], version, ARGV[3])
            redis.call('ZADD', KEYS[3], 0, ARGV[2])
            return version
            "#,
        )
    }

    /// Rewrites the owning claim with a fresh `claimedAt`, keeping its
    /// version.
    pub fn renew_claim() -> Script {
        Script::new(
            r#"
            local first = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
            if #first == 0 then
                return 0
            end
            local claim = cjson.decode(first[1])
            if claim.workerId ~= ARGV[1] then
                return 0
            end
            claim.claimedAt = tonumber(ARGV[2])
            redis.call('ZREM', KEYS[1], first[1])
            redis.call('ZADD', KEYS[1], first[2], cjson.encode(claim))
            return 1
            "#,
        )
    }

    pub fn clear_claims() -> Script {
        Script::new(
            r#"
            local removed = redis.call('ZCARD', KEYS[1])
            redis.call('DEL', KEYS[1])
            redis.call('ZREM', KEYS[2], ARGV[1])
            return removed
            "#,
        )
    }

    pub fn put_active() -> Script {
        let body = r#"
            local added = redis.call('ZADD', KEYS[1], tonumber(ARGV[5]), ARGV[4])
            redis.call('ZADD', KEYS[2], 0, ARGV[3])
            if added == 1 then
                bump(ARGV[1], ARGV[2], ARGV[3], 1)
            end
            return added
        "#;
        Script::new(&format!("{COUNTERS}{body}"))
    }

    pub fn remove_active() -> Script {
        let body = r#"
            local removed = redis.call('ZREM', KEYS[1], ARGV[4])
            if removed == 1 then
                bump(ARGV[1], ARGV[2], ARGV[3], -1)
            end
            if redis.call('ZCARD', KEYS[1]) == 0 then
                redis.call('ZREM', KEYS[2], ARGV[3])
            end
            return removed
        "#;
        Script::new(&format!("{COUNTERS}{body}"))
    }

    pub fn expire_active() -> Script {
        let body = r#"
            local prefix = ARGV[1]
            local kind = ARGV[2]
            local scope = ARGV[3]
            local now = ARGV[4]
            local budget = tonumber(ARGV[5])
            local total = 0

            local owners = redis.call('ZRANGE', KEYS[1], 0, -1)
            for _, owner in ipairs(owners) do
                if budget <= 0 then
                    break
                end
                local key = prefix .. ':active:' .. scope .. ':' .. owner
                local expired = redis.call(
                    'ZRANGEBYSCORE', key, '-inf', '(' .. now, 'LIMIT', 0, budget
                )
                if #expired > 0 then
                    redis.call('ZREM', key, unpack(expired))
                    bump(prefix, kind, owner, -#expired)
                    total = total + #expired
                    budget = budget - #expired
                end
                if redis.call('ZCARD', key) == 0 then
                    redis.call('ZREM', KEYS[1], owner)
                end
            end
            return total
        "#;
        Script::new(&format!("{COUNTERS}{body}"))
    }

    /// Recount from the authoritative structures and rewrite the cached
    /// counter when the drift exceeds the tolerance.
    pub fn reconcile_counter() -> Script {
        Script::new(
            r#"
            local prefix = ARGV[1]
            local kind = ARGV[2]
            local id = ARGV[3]
            local now = ARGV[4]
            local tolerance = tonumber(ARGV[5])

            local truth
            if kind == 'team_queue' then
                truth = redis.call('ZCARD', prefix .. ':queue:' .. id)
            elseif kind == 'crawl_queue' then
                truth = redis.call('SCARD', prefix .. ':crawl:' .. id)
            elseif kind == 'team_active' then
                truth = redis.call('ZCOUNT', prefix .. ':active:team:' .. id, now, '+inf')
            else
                truth = redis.call('ZCOUNT', prefix .. ':active:crawl:' .. id, now, '+inf')
            end

            local cached = tonumber(redis.call('HGET', KEYS[1], id) or '0')
            local delta = truth - cached
            if math.abs(delta) <= tolerance then
                return 0
            end

            if truth == 0 then
                redis.call('HDEL', KEYS[1], id)
                redis.call('ZREM', KEYS[2], id)
            else
                redis.call('HSET', KEYS[1], id, truth)
                redis.call('ZADD', KEYS[2], 0, id)
            end
            return delta
            "#,
        )
    }

    pub fn set_counter() -> Script {
        Script::new(
            r#"
            local value = tonumber(ARGV[2])
            if value == 0 then
                redis.call('HDEL', KEYS[1], ARGV[1])
                redis.call('ZREM', KEYS[2], ARGV[1])
            else
                redis.call('HSET', KEYS[1], ARGV[1], value)
                redis.call('ZADD', KEYS[2], 0, ARGV[1])
            end
            return 1
            "#,
        )
    }
}

/// Store backed by a single Redis deployment. Each trait method maps to one
/// command or one Lua script.
///
/// Only standalone Redis (optionally with replicas) is supported. Several
/// scripts derive keys from their arguments at run time, which Redis Cluster
/// rejects, so [`RedisStore::connect`] refuses cluster-enabled servers.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    prefix: String,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisStore {
    /// Connect to `redis_url`. Queue keys live under `prefix`; lease keys are
    /// passed in whole by the caller.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let mut redis = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;

        let info: String = redis::cmd("INFO")
            .arg("cluster")
            .query_async(&mut redis)
            .await
            .context("Failed to query Redis server info")?;
        if cluster_enabled(&info) {
            anyhow::bail!(
                "Redis Cluster is not supported; point the store at a standalone Redis server"
            );
        }

        Ok(Self {
            redis,
            prefix: prefix.into(),
        })
    }

    fn queue_key(&self, team_id: &str) -> String {
        format!("{}:queue:{team_id}", self.prefix)
    }

    fn jobs_key(&self, team_id: &str) -> String {
        format!("{}:jobs:{team_id}", self.prefix)
    }

    fn ttl_key(&self) -> String {
        format!("{}:ttl", self.prefix)
    }

    fn claims_key(&self, job_id: &str) -> String {
        format!("{}:claims:{job_id}", self.prefix)
    }

    fn claimed_key(&self) -> String {
        format!("{}:claimed", self.prefix)
    }

    fn claim_seq_key(&self) -> String {
        format!("{}:claim-seq", self.prefix)
    }

    fn counter_key(&self, kind: CounterKind) -> String {
        format!("{}:counter:{kind}", self.prefix)
    }

    fn counter_index_key(&self, kind: CounterKind) -> String {
        format!("{}:counter-ids:{kind}", self.prefix)
    }

    fn active_key(&self, scope: Scope, owner: &str) -> String {
        format!("{}:active:{}:{owner}", self.prefix, scope.as_str())
    }

    fn active_owners_key(&self, scope: Scope) -> String {
        format!("{}:active-owners:{}", self.prefix, scope.as_str())
    }
}

/// Lexicographically sortable member for a team queue entry. Sign bits are
/// flipped so that byte order matches numeric order.
fn sort_member(key: &QueueKey) -> String {
    format!(
        "{:08x}{:016x}:{}",
        (key.priority as u32) ^ 0x8000_0000,
        (key.created_at as u64) ^ (1 << 63),
        key.job_id
    )
}

fn job_id_of_member(member: &str) -> Option<&str> {
    member.split_once(':').map(|(_, job_id)| job_id)
}

fn cluster_enabled(info: &str) -> bool {
    info.lines().any(|line| line.trim() == "cluster_enabled:1")
}

fn lex_after(after: Option<&str>) -> String {
    match after {
        Some(after) => format!("({after}"),
        None => "-".to_string(),
    }
}

fn parse_claims(job_id: &str, raw: Vec<(String, f64)>) -> Result<Vec<StoredClaim>> {
    raw.into_iter()
        .map(|(json, version)| {
            Ok(StoredClaim {
                job_id: job_id.to_string(),
                version: version as u64,
                claim: serde_json::from_str(&json)?,
            })
        })
        .collect()
}

fn to_limit(limit: usize) -> isize {
    isize::try_from(limit).unwrap_or(isize::MAX)
}

#[async_trait]
impl LeaseStore for RedisStore {
    async fn acquire(
        &self,
        key: &str,
        holder_id: &str,
        limit: u32,
        now_ms: i64,
        ttl_ms: u64,
    ) -> Result<AcquireOutcome> {
        let mut conn = self.redis.clone();
        let result = scripts::lease_acquire()
            .key(key)
            .arg(now_ms)
            .arg(ttl_ms)
            .arg(limit)
            .arg(holder_id)
            .invoke_async::<Vec<i64>>(&mut conn)
            .await?;

        match result.as_slice() {
            [granted, count, removed] => Ok(AcquireOutcome {
                granted: *granted == 1,
                count: (*count).max(0) as u64,
                removed: (*removed).max(0) as u64,
            }),
            other => Err(GateError::Store(format!(
                "unexpected lease acquire reply: {other:?}"
            ))),
        }
    }

    async fn renew(&self, key: &str, holder_id: &str, now_ms: i64, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.redis.clone();
        let renewed = scripts::lease_renew()
            .key(key)
            .arg(now_ms)
            .arg(ttl_ms)
            .arg(holder_id)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release(&self, key: &str, holder_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: i64 = conn.zrem(key, holder_id).await?;
        Ok(())
    }

    async fn count(&self, key: &str, now_ms: i64) -> Result<u64> {
        let mut conn = self.redis.clone();
        let count = scripts::lease_count()
            .key(key)
            .arg(now_ms)
            .invoke_async::<u64>(&mut conn)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn insert_job(&self, job: &QueuedJob) -> Result<()> {
        let key = job.queue_key();
        let json = serde_json::to_string(job)?;
        let timeout = job.times_out_at.map(|at| at.to_string()).unwrap_or_default();

        let mut conn = self.redis.clone();
        scripts::insert_job()
            .key(self.queue_key(&job.team_id))
            .key(self.jobs_key(&job.team_id))
            .key(self.ttl_key())
            .arg(&self.prefix)
            .arg(&job.team_id)
            .arg(sort_member(&key))
            .arg(key.encode())
            .arg(json)
            .arg(timeout)
            .arg(job.crawl_id.as_deref().unwrap_or_default())
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan_team(&self, team_id: &str, limit: usize) -> Result<Vec<QueuedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let raw = scripts::scan_team()
            .key(self.queue_key(team_id))
            .key(self.jobs_key(team_id))
            .arg(limit)
            .invoke_async::<Vec<Option<String>>>(&mut conn)
            .await?;

        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(GateError::from))
            .collect()
    }

    async fn get_job(&self, key: &QueueKey) -> Result<Option<QueuedJob>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .hget(self.jobs_key(&key.team_id), sort_member(key))
            .await?;
        raw.map(|json| serde_json::from_str(&json).map_err(GateError::from))
            .transpose()
    }

    async fn remove_job(&self, key: &QueueKey) -> Result<Option<QueuedJob>> {
        let mut conn = self.redis.clone();
        let raw = scripts::remove_job()
            .arg(&self.prefix)
            .arg(&key.team_id)
            .arg(sort_member(key))
            .arg(key.encode())
            .arg(&key.job_id)
            .invoke_async::<Option<String>>(&mut conn)
            .await?;
        raw.map(|json| serde_json::from_str(&json).map_err(GateError::from))
            .transpose()
    }

    async fn remove_expired_job(&self, key: &QueueKey, now_ms: i64) -> Result<bool> {
        let mut conn = self.redis.clone();
        let removed = scripts::remove_expired_job()
            .arg(&self.prefix)
            .arg(&key.team_id)
            .arg(sort_member(key))
            .arg(key.encode())
            .arg(&key.job_id)
            .arg(now_ms)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn expired_jobs(
        &self,
        now_ms: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<QueueKey>> {
        let mut conn = self.redis.clone();
        let tokens: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.ttl_key())
            .arg("-inf")
            .arg(format!("({now_ms}"))
            .arg("LIMIT")
            .arg(offset)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut keys = Vec::with_capacity(tokens.len());
        for token in tokens {
            match QueueKey::decode(&token) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    tracing::warn!("Dropping unreadable TTL index entry: {}", err);
                    let _: i64 = conn.zrem(self.ttl_key(), &token).await?;
                }
            }
        }
        Ok(keys)
    }

    async fn append_claim(&self, key: &QueueKey, claim: &ClaimRecord) -> Result<Option<u64>> {
        let json = serde_json::to_string(claim)?;
        let mut conn = self.redis.clone();
        let version = scripts::append_claim()
            .key(self.jobs_key(&key.team_id))
            .key(self.claims_key(&key.job_id))
            .key(self.claimed_key())
            .key(self.claim_seq_key())
            .arg(sort_member(key))
            .arg(&key.job_id)
            .arg(json)
            .invoke_async::<Option<u64>>(&mut conn)
            .await?;
        Ok(version)
    }

    async fn first_claim(&self, job_id: &str) -> Result<Option<StoredClaim>> {
        let mut conn = self.redis.clone();
        let raw: Vec<(String, f64)> = conn
            .zrange_withscores(self.claims_key(job_id), 0, 0)
            .await?;
        Ok(parse_claims(job_id, raw)?.into_iter().next())
    }

    async fn renew_claim(&self, job_id: &str, worker_id: &str, now_ms: i64) -> Result<bool> {
        let mut conn = self.redis.clone();
        let renewed = scripts::renew_claim()
            .key(self.claims_key(job_id))
            .arg(worker_id)
            .arg(now_ms)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn clear_claims(&self, job_id: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        let removed = scripts::clear_claims()
            .key(self.claims_key(job_id))
            .key(self.claimed_key())
            .arg(job_id)
            .invoke_async::<u64>(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn claimed_jobs(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn
            .zrangebylex_limit(self.claimed_key(), lex_after(after), "+", 0, to_limit(limit))
            .await?;
        Ok(ids)
    }

    async fn team_job_ids(&self, team_id: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let members: Vec<String> = conn
            .zrange(self.queue_key(team_id), 0, to_limit(limit) - 1)
            .await?;
        Ok(members
            .iter()
            .filter_map(|member| job_id_of_member(member))
            .map(str::to_string)
            .collect())
    }

    async fn put_active(
        &self,
        scope: Scope,
        owner: &str,
        job_id: &str,
        expires_at: i64,
    ) -> Result<bool> {
        let mut conn = self.redis.clone();
        let added = scripts::put_active()
            .key(self.active_key(scope, owner))
            .key(self.active_owners_key(scope))
            .arg(&self.prefix)
            .arg(scope.active_counter().as_str())
            .arg(owner)
            .arg(job_id)
            .arg(expires_at)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn remove_active(&self, scope: Scope, owner: &str, job_id: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let removed = scripts::remove_active()
            .key(self.active_key(scope, owner))
            .key(self.active_owners_key(scope))
            .arg(&self.prefix)
            .arg(scope.active_counter().as_str())
            .arg(owner)
            .arg(job_id)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn list_active(&self, scope: Scope, owner: &str) -> Result<Vec<(String, i64)>> {
        let mut conn = self.redis.clone();
        let raw: Vec<(String, f64)> = conn
            .zrange_withscores(self.active_key(scope, owner), 0, -1)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(job_id, expires_at)| (job_id, expires_at as i64))
            .collect())
    }

    async fn expire_active(&self, scope: Scope, now_ms: i64, limit: usize) -> Result<u64> {
        let mut conn = self.redis.clone();
        let removed = scripts::expire_active()
            .key(self.active_owners_key(scope))
            .arg(&self.prefix)
            .arg(scope.active_counter().as_str())
            .arg(scope.as_str())
            .arg(now_ms)
            .arg(limit)
            .invoke_async::<u64>(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn get_counter(&self, kind: CounterKind, id: &str) -> Result<i64> {
        let mut conn = self.redis.clone();
        let value: Option<i64> = conn.hget(self.counter_key(kind), id).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_counter(&self, kind: CounterKind, id: &str, value: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        scripts::set_counter()
            .key(self.counter_key(kind))
            .key(self.counter_index_key(kind))
            .arg(id)
            .arg(value)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn reconcile_counter(
        &self,
        kind: CounterKind,
        id: &str,
        now_ms: i64,
        tolerance: i64,
    ) -> Result<i64> {
        let mut conn = self.redis.clone();
        let delta = scripts::reconcile_counter()
            .key(self.counter_key(kind))
            .key(self.counter_index_key(kind))
            .arg(&self.prefix)
            .arg(kind.as_str())
            .arg(id)
            .arg(now_ms)
            .arg(tolerance)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(delta)
    }

    async fn counter_ids(
        &self,
        kind: CounterKind,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn
            .zrangebylex_limit(
                self.counter_index_key(kind),
                lex_after(after),
                "+",
                0,
                to_limit(limit),
            )
            .await?;
        Ok(ids)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(priority: i32, created_at: i64, job_id: &str) -> QueueKey {
        QueueKey {
            team_id: "t".into(),
            priority,
            created_at,
            job_id: job_id.into(),
        }
    }

    #[test]
    fn sort_member_orders_like_queue_key() {
        let mut keys = vec![
            key(3, 5, "a"),
            key(-2, 9, "b"),
            key(-2, -1, "c"),
            key(0, 0, "d"),
            key(0, 0, "c"),
        ];
        let mut by_member = keys.clone();
        keys.sort();
        by_member.sort_by_key(sort_member);
        assert_eq!(keys, by_member);
    }

    #[test]
    fn cluster_mode_is_detected_from_info() {
        assert!(cluster_enabled("# Cluster\r\ncluster_enabled:1\r\n"));
        assert!(!cluster_enabled("# Cluster\r\ncluster_enabled:0\r\n"));
        assert!(!cluster_enabled(""));
    }

    #[test]
    fn member_yields_job_id_with_colons() {
        let member = sort_member(&key(1, 1, "crawl:42"));
        assert_eq!(job_id_of_member(&member), Some("crawl:42"));
    }
}
