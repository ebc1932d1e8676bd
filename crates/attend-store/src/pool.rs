use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{StoreError, StoreResult};
use crate::traits::{SessionProvider, StoreSession};

/// Bounds for the session pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of sessions open at once.
    pub max_sessions: usize,
    /// How long `acquire` waits for a free slot and an open session.
    #[serde(rename = "acquire_timeout_ms", with = "duration_millis")]
    pub acquire_timeout: Duration,
    /// Deadline for every statement issued through one session.
    #[serde(rename = "statement_timeout_ms", with = "duration_millis")]
    pub statement_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(10),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Bounded pool of storage sessions.
///
/// Constructed explicitly and shared by handle; there is no process-wide
/// pool. Each acquired session holds one permit until it is committed,
/// rolled back or dropped.
pub struct SessionPool<P: SessionProvider> {
    provider: Arc<P>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
}

impl<P: SessionProvider> SessionPool<P> {
    pub fn new(provider: P, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_sessions.max(1)));
        Self {
            provider: Arc::new(provider),
            permits,
            config,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Sessions that could be acquired right now without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a slot and open a session, both within `acquire_timeout`.
    pub async fn acquire(&self) -> StoreResult<PooledSession<P::Session>> {
        self.checkout(Access::ReadWrite).await
    }

    /// Like [`acquire`](Self::acquire), but the session only reads.
    pub async fn acquire_read(&self) -> StoreResult<PooledSession<P::Session>> {
        self.checkout(Access::ReadOnly).await
    }

    async fn checkout(&self, access: Access) -> StoreResult<PooledSession<P::Session>> {
        let timeout = self.config.acquire_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        let permit = match tokio::time::timeout_at(deadline, self.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::Unavailable("session pool closed".into())),
            Err(_) => return Err(Self::timed_out(timeout)),
        };

        // The permit travels with the opening task. If we stop waiting, the
        // task still owns it until the late session is rolled back, so the
        // number of open sessions never exceeds `max_sessions`.
        let provider = Arc::clone(&self.provider);
        let statement_timeout = self.config.statement_timeout;
        let opening = tokio::spawn(async move {
            let session = match access {
                Access::ReadWrite => provider.begin(statement_timeout).await?,
                Access::ReadOnly => provider.begin_read(statement_timeout).await?,
            };
            Ok::<_, StoreError>(PooledSession {
                session: Some(session),
                _permit: permit,
            })
        });

        match tokio::time::timeout_at(deadline, opening).await {
            Ok(Ok(Ok(session))) => {
                tracing::debug!(?access, available = self.available(), "session acquired");
                Ok(session)
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(err)) => Err(StoreError::Unavailable(format!("session task failed: {err}"))),
            Err(_) => Err(Self::timed_out(timeout)),
        }
    }

    fn timed_out(timeout: Duration) -> StoreError {
        tracing::warn!(?timeout, "timed out acquiring storage session");
        StoreError::Timeout(format!(
            "no session available within {}ms",
            timeout.as_millis()
        ))
    }

    /// Refuse all future acquisitions.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl<P: SessionProvider> Clone for SessionPool<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            permits: Arc::clone(&self.permits),
            config: self.config.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Access {
    ReadWrite,
    ReadOnly,
}

/// A session checked out of a [`SessionPool`].
///
/// Dereferences to the backend session. The pool slot is released when
/// this guard goes away, on every path.
pub struct PooledSession<S: StoreSession> {
    session: Option<S>,
    _permit: OwnedSemaphorePermit,
}

impl<S: StoreSession> PooledSession<S> {
    pub fn commit(mut self) -> StoreResult<()> {
        match self.session.take() {
            Some(session) => session.commit(),
            None => Err(StoreError::SessionFinished),
        }
    }

    pub fn rollback(mut self) -> StoreResult<()> {
        match self.session.take() {
            Some(session) => session.rollback(),
            None => Err(StoreError::SessionFinished),
        }
    }
}

impl<S: StoreSession> Deref for PooledSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        // `session` is only taken by `commit`/`rollback`, which consume self.
        match self.session.as_ref() {
            Some(session) => session,
            None => unreachable!("pooled session used after it finished"),
        }
    }
}

impl<S: StoreSession> DerefMut for PooledSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        match self.session.as_mut() {
            Some(session) => session,
            None => unreachable!("pooled session used after it finished"),
        }
    }
}

impl<S: StoreSession> Drop for PooledSession<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.rollback() {
                tracing::warn!(error = %err, "rollback of abandoned session failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::traits::UserDirectory;
    use attend_types::{UserId, UserRecord};

    fn small_pool(max_sessions: usize) -> SessionPool<InMemoryStore> {
        SessionPool::new(
            InMemoryStore::new(),
            PoolConfig {
                max_sessions,
                acquire_timeout: Duration::from_millis(50),
                statement_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn acquire_times_out_when_store_is_held() {
        let pool = small_pool(2);
        let held = pool.acquire().await.unwrap();

        // A second slot exists, but the in-memory store admits one
        // session at a time, so opening it waits past the deadline.
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, StoreError::Timeout(_)));
        drop(held);

        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn permit_is_released_on_every_path() {
        let pool = small_pool(1);
        assert_eq!(pool.available(), 1);

        let session = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        session.commit().unwrap();
        assert_eq!(pool.available(), 1);

        let session = pool.acquire().await.unwrap();
        session.rollback().unwrap();
        assert_eq!(pool.available(), 1);

        let session = pool.acquire().await.unwrap();
        drop(session);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn dropped_session_rolls_back() {
        let pool = small_pool(1);
        {
            let mut session = pool.acquire().await.unwrap();
            session
                .upsert_user(&UserRecord::active("emp-1", "Ada"))
                .unwrap();
        }
        let mut session = pool.acquire().await.unwrap();
        assert!(session.find_user(&UserId::from("emp-1")).unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_pool_is_unavailable() {
        let pool = small_pool(1);
        pool.close();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn read_sessions_share_the_store() {
        let pool = small_pool(2);
        let mut first = pool.acquire_read().await.unwrap();
        let second = pool.acquire_read().await.unwrap();
        assert_eq!(pool.available(), 0);
        assert!(first.find_user(&UserId::from("emp-1")).unwrap().is_none());
        assert!(matches!(
            first.upsert_user(&UserRecord::active("emp-1", "Ada")),
            Err(StoreError::ReadOnly)
        ));
        drop(second);
        first.commit().unwrap();
        assert_eq!(pool.available(), 2);
    }

    /// Opens sessions only after a fixed delay.
    struct SlowOpen {
        inner: InMemoryStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl SessionProvider for SlowOpen {
        type Session = <InMemoryStore as SessionProvider>::Session;

        async fn begin(&self, statement_timeout: Duration) -> StoreResult<Self::Session> {
            tokio::time::sleep(self.delay).await;
            self.inner.begin(statement_timeout).await
        }

        async fn begin_read(&self, statement_timeout: Duration) -> StoreResult<Self::Session> {
            tokio::time::sleep(self.delay).await;
            self.inner.begin_read(statement_timeout).await
        }
    }

    #[tokio::test]
    async fn late_session_keeps_its_slot_until_rolled_back() {
        let pool = SessionPool::new(
            SlowOpen {
                inner: InMemoryStore::new(),
                delay: Duration::from_millis(100),
            },
            PoolConfig {
                max_sessions: 1,
                acquire_timeout: Duration::from_millis(20),
                statement_timeout: Duration::from_secs(5),
            },
        );

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, StoreError::Timeout(_)));
        // The session is still being opened in the background.
        assert_eq!(pool.available(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.provider().inner.event_count().await, 0);
    }

    #[test]
    fn config_reads_millisecond_fields() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"max_sessions": 3, "acquire_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.statement_timeout, PoolConfig::default().statement_timeout);
    }
}
