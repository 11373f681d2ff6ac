use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{CreateOutcome, LockStore, SagaError, SagaResult, SeatKey, SeatLock};
use marquee_shared::{EventDeduplicator, EventError};
use redis::aio::MultiplexedConnection;
use tracing::{debug, warn};
use uuid::Uuid;

// Splits "{holder}|{expiresAtMillis}" from the right; holder ids may contain '|'.
macro_rules! lock_script {
    ($body:literal) => {
        concat!(
            r#"
            local function parse(value)
                local sep = string.find(value, "|[^|]*$")
                if not sep then return nil, nil, nil end
                local raw = string.sub(value, sep + 1)
                return string.sub(value, 1, sep - 1), tonumber(raw), raw
            end
            "#,
            $body
        )
    };
}

const CREATE_IF_VACANT: &str = lock_script!(
    r#"
    local current = redis.call("GET", KEYS[1])
    if not current then
        redis.call("SET", KEYS[1], ARGV[1])
        return false
    end
    local holder, expires = parse(current)
    if not holder or not expires or expires > tonumber(ARGV[2]) then return {"held", current} end
    redis.call("SET", KEYS[1], ARGV[1])
    return {"replaced", current}
    "#
);

const EXTEND_LIVE: &str = lock_script!(
    r#"
    local current = redis.call("GET", KEYS[1])
    if not current then return 0 end
    local holder, expires = parse(current)
    if not holder or not expires or expires <= tonumber(ARGV[3]) then return 0 end
    if ARGV[2] ~= "" and holder ~= ARGV[2] then return 0 end
    redis.call("SET", KEYS[1], holder .. "|" .. ARGV[1])
    return 1
    "#
);

const REBIND_LIVE: &str = lock_script!(
    r#"
    local current = redis.call("GET", KEYS[1])
    if not current then return 0 end
    local holder, expires, raw = parse(current)
    if not holder or not expires then return 0 end
    if holder == ARGV[1] then return 1 end
    if expires <= tonumber(ARGV[3]) then return 0 end
    if ARGV[2] ~= "" and holder ~= ARGV[2] then return 0 end
    redis.call("SET", KEYS[1], ARGV[1] .. "|" .. raw)
    return 1
    "#
);

const DELETE_RETURNING: &str = r#"
    local current = redis.call("GET", KEYS[1])
    if current then redis.call("DEL", KEYS[1]) end
    return current
"#;

const DELETE_IF_HOLDER: &str = lock_script!(
    r#"
    local current = redis.call("GET", KEYS[1])
    if not current then return false end
    local holder = parse(current)
    if holder ~= ARGV[1] then return false end
    redis.call("DEL", KEYS[1])
    return current
    "#
);

const DELETE_IF_EXPIRED: &str = lock_script!(
    r#"
    local current = redis.call("GET", KEYS[1])
    if not current then return false end
    local holder, expires = parse(current)
    if not expires or expires > tonumber(ARGV[1]) then return false end
    redis.call("DEL", KEYS[1])
    return current
    "#
);

struct LockScripts {
    create_if_vacant: redis::Script,
    extend_live: redis::Script,
    rebind_live: redis::Script,
    delete_returning: redis::Script,
    delete_if_holder: redis::Script,
    delete_if_expired: redis::Script,
}

impl LockScripts {
    fn new() -> Self {
        Self {
            create_if_vacant: redis::Script::new(CREATE_IF_VACANT),
            extend_live: redis::Script::new(EXTEND_LIVE),
            rebind_live: redis::Script::new(REBIND_LIVE),
            delete_returning: redis::Script::new(DELETE_RETURNING),
            delete_if_holder: redis::Script::new(DELETE_IF_HOLDER),
            delete_if_expired: redis::Script::new(DELETE_IF_EXPIRED),
        }
    }
}

/// Lock Store and dedup store backed by Redis.
///
/// Every mutation is a single Lua script so the read-check-write happens atomically
/// on the server; no application-level locking is involved.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    scripts: std::sync::Arc<LockScripts>,
    dedup_ttl_seconds: u64,
}

impl RedisClient {
    pub async fn new(connection_string: &str, dedup_ttl_seconds: u64) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        // Fail fast on a bad URL or unreachable server.
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self {
            client,
            scripts: std::sync::Arc::new(LockScripts::new()),
            dedup_ttl_seconds,
        })
    }

    async fn conn(&self) -> SagaResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(SagaError::store)
    }

    fn decode(value: Option<String>) -> SagaResult<Option<SeatLock>> {
        value.map(|v| SeatLock::decode(&v)).transpose()
    }

    fn dedup_key(consumer: &str, event_id: Uuid) -> String {
        format!("event:{}:{}", consumer, event_id)
    }

    /// Reads raw lock keys in MGET batches. Keys that vanished since they were
    /// listed, or that do not hold a well-formed lock, are skipped.
    pub async fn load(&self, keys: &[String], batch_size: usize) -> SagaResult<Vec<(SeatKey, SeatLock)>> {
        let mut conn = self.conn().await?;
        let mut entries = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(batch_size.max(1)) {
            let values: Vec<Option<String>> = redis::cmd("MGET")
                .arg(chunk.to_vec())
                .query_async(&mut conn)
                .await
                .map_err(SagaError::store)?;

            for (raw_key, value) in chunk.iter().zip(values) {
                let Some(value) = value else { continue };
                let Some(key) = SeatKey::parse(raw_key) else {
                    warn!(key = %raw_key, "Skipping unparseable lock key");
                    continue;
                };
                match SeatLock::decode(&value) {
                    Ok(lock) => entries.push((key, lock)),
                    Err(e) => warn!(key = %raw_key, error = %e, "Skipping malformed lock entry"),
                }
            }
        }
        Ok(entries)
    }

    pub async fn ping(&self) -> SagaResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(SagaError::store)?;
        Ok(())
    }
}

#[async_trait]
impl LockStore for RedisClient {
    async fn try_create(&self, key: &SeatKey, lock: &SeatLock, now: DateTime<Utc>) -> SagaResult<CreateOutcome> {
        let mut conn = self.conn().await?;

        let existing: Option<(String, String)> = self
            .scripts
            .create_if_vacant
            .key(key.to_string())
            .arg(lock.encode())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(SagaError::store)?;

        match existing {
            None => Ok(CreateOutcome::Created),
            Some((status, value)) if status == "replaced" => match SeatLock::decode(&value) {
                Ok(lapsed) => Ok(CreateOutcome::Replaced(lapsed)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Replaced malformed lock entry");
                    Ok(CreateOutcome::Created)
                }
            },
            Some((_, value)) => Ok(CreateOutcome::Held(SeatLock::decode(&value)?)),
        }
    }

    async fn get(&self, key: &SeatKey) -> SagaResult<Option<SeatLock>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key.to_string())
            .query_async(&mut conn)
            .await
            .map_err(SagaError::store)?;
        Self::decode(value)
    }

    async fn extend(
        &self,
        key: &SeatKey,
        holder: Option<&str>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SagaResult<bool> {
        let mut conn = self.conn().await?;
        let extended: i64 = self
            .scripts
            .extend_live
            .key(key.to_string())
            .arg(expires_at.timestamp_millis())
            .arg(holder.unwrap_or(""))
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(SagaError::store)?;
        Ok(extended == 1)
    }

    async fn rebind(&self, key: &SeatKey, from: Option<&str>, to: &str, now: DateTime<Utc>) -> SagaResult<bool> {
        let mut conn = self.conn().await?;
        let bound: i64 = self
            .scripts
            .rebind_live
            .key(key.to_string())
            .arg(to)
            .arg(from.unwrap_or(""))
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(SagaError::store)?;
        Ok(bound == 1)
    }

    async fn delete(&self, key: &SeatKey) -> SagaResult<Option<SeatLock>> {
        let mut conn = self.conn().await?;
        let removed: Option<String> = self
            .scripts
            .delete_returning
            .key(key.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(SagaError::store)?;

        match removed {
            Some(value) => match SeatLock::decode(&value) {
                Ok(lock) => Ok(Some(lock)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Deleted malformed lock entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn delete_if_holder(&self, key: &SeatKey, holder: &str) -> SagaResult<Option<SeatLock>> {
        let mut conn = self.conn().await?;
        let removed: Option<String> = self
            .scripts
            .delete_if_holder
            .key(key.to_string())
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(SagaError::store)?;
        Self::decode(removed)
    }

    async fn delete_if_expired(&self, key: &SeatKey, now: DateTime<Utc>) -> SagaResult<Option<SeatLock>> {
        let mut conn = self.conn().await?;
        let removed: Option<String> = self
            .scripts
            .delete_if_expired
            .key(key.to_string())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(SagaError::store)?;
        Self::decode(removed)
    }

    async fn scan(&self, showtime_id: Option<&str>, batch_size: usize) -> SagaResult<Vec<(SeatKey, SeatLock)>> {
        let mut conn = self.conn().await?;
        let pattern = match showtime_id {
            Some(id) => SeatKey::showtime_pattern(id),
            None => SeatKey::pattern(),
        };

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(batch_size.max(1))
                .query_async(&mut conn)
                .await
                .map_err(SagaError::store)?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();

        let entries = self.load(&keys, batch_size).await?;
        debug!(pattern = %pattern, count = entries.len(), "Scanned seat locks");
        Ok(entries)
    }
}

#[async_trait]
impl EventDeduplicator for RedisClient {
    async fn first_delivery(&self, consumer: &str, event_id: Uuid) -> Result<bool, EventError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventError::Dedup(e.to_string()))?;

        // SET NX: only the first delivery creates the marker
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::dedup_key(consumer, event_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.dedup_ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| EventError::Dedup(e.to_string()))?;

        Ok(result.is_some())
    }

    async fn forget(&self, consumer: &str, event_id: Uuid) -> Result<(), EventError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventError::Dedup(e.to_string()))?;

        let _: i64 = redis::cmd("DEL")
            .arg(Self::dedup_key(consumer, event_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| EventError::Dedup(e.to_string()))?;
        Ok(())
    }
}
