//! Replication sessions between a local database and an endpoint.

use crate::database::{Database, DatabaseInner};
use crate::error::{ClientError, ClientResult};
use ferrydb_boundary::{
    Endpoint, Engine, ReplicatorConfig, ReplicatorDirection, ReplicatorHandle, ReplicatorStatus,
};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// The remote side of a replication session.
pub enum ReplicatorEndpoint {
    /// Another open database on the same engine.
    Database(Database),
    /// A URL-like address of a remote peer.
    Url(String),
}

/// Configuration for a replicator, captured when the replicator is
/// created.
///
/// The builder resolves both databases' handles immediately, so the
/// databases must be open when the configuration is constructed. After
/// [`Replicator::create`], the configuration is immutable; stop the
/// replicator and create a new one to change it.
pub struct ReplicatorConfiguration {
    db: Weak<DatabaseInner>,
    engine: Arc<dyn Engine>,
    config: ReplicatorConfig,
}

impl std::fmt::Debug for ReplicatorConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatorConfiguration")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReplicatorConfiguration {
    /// Starts a configuration for syncing `database` with `endpoint`.
    ///
    /// Defaults: push-and-pull, one-shot, 10 connection attempts, 300 s
    /// attempt wait and heartbeat.
    pub fn new(database: &Database, endpoint: ReplicatorEndpoint) -> ClientResult<Self> {
        let handle = database.inner.require_open("replicate")?;
        let endpoint = match endpoint {
            ReplicatorEndpoint::Database(target) => {
                Endpoint::LocalDatabase(target.inner.require_open("replicate to")?)
            }
            ReplicatorEndpoint::Url(url) => Endpoint::Url(url),
        };
        Ok(Self {
            db: Arc::downgrade(&database.inner),
            engine: Arc::clone(&database.inner.engine),
            config: ReplicatorConfig::new(handle, endpoint),
        })
    }

    /// Sets the sync direction.
    #[must_use]
    pub fn with_direction(mut self, direction: ReplicatorDirection) -> Self {
        self.config = self.config.with_direction(direction);
        self
    }

    /// Makes the replicator continuous: it stays active after catching up
    /// and resumes when either side changes.
    #[must_use]
    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.config = self.config.with_continuous(continuous);
        self
    }

    /// Suppresses automatic purge of documents on access loss.
    #[must_use]
    pub fn with_disable_auto_purge(mut self, disable: bool) -> Self {
        self.config = self.config.with_disable_auto_purge(disable);
        self
    }

    /// Sets the maximum number of connection attempts before the
    /// replicator gives up with an `Error` status.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config = self.config.with_max_attempts(attempts);
        self
    }

    /// Sets the wait between connection attempts.
    #[must_use]
    pub fn with_max_attempt_wait_time(mut self, wait: Duration) -> Self {
        self.config = self.config.with_max_attempt_wait_time(wait);
        self
    }

    /// Sets the idle heartbeat interval.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.config = self.config.with_heartbeat(heartbeat);
        self
    }
}

/// A configured synchronization session.
///
/// Status transitions are driven entirely by the engine; the client can
/// only request transitions. `start` and `stop` submit requests and
/// return; observe [`status`] until it reflects the requested state.
///
/// [`status`]: Replicator::status
pub struct Replicator {
    db: Weak<DatabaseInner>,
    engine: Arc<dyn Engine>,
    handle: ReplicatorHandle,
}

impl Replicator {
    /// Creates a replicator from a captured configuration.
    pub fn create(configuration: ReplicatorConfiguration) -> ClientResult<Self> {
        match configuration.db.upgrade() {
            Some(inner) if inner.is_open() => {}
            _ => {
                return Err(ClientError::invalid_state(
                    "cannot create a replicator for a closed database",
                ))
            }
        }
        let handle = configuration.engine.create_replicator(configuration.config)?;
        Ok(Self {
            db: configuration.db,
            engine: configuration.engine,
            handle,
        })
    }

    fn guard(&self, action: &str) -> ClientResult<()> {
        match self.db.upgrade() {
            Some(inner) if inner.is_open() => Ok(()),
            _ => Err(ClientError::invalid_state(format!(
                "cannot {action} a replicator of a closed database"
            ))),
        }
    }

    /// Requests that the replicator start.
    ///
    /// Moves `Stopped → Connecting`. Passing `reset_checkpoint` discards
    /// recorded sync progress and performs a full re-sync. Starting an
    /// already-active replicator is a no-op.
    pub fn start(&self, reset_checkpoint: bool) -> ClientResult<()> {
        self.guard("start")?;
        Ok(self.engine.replicator_start(&self.handle, reset_checkpoint)?)
    }

    /// Requests that the replicator stop.
    ///
    /// Cooperative, not immediate: poll [`status`](Replicator::status)
    /// until it reports `Stopped` to know synchronization has ceased.
    pub fn stop(&self) -> ClientResult<()> {
        self.guard("stop")?;
        Ok(self.engine.replicator_stop(&self.handle)?)
    }

    /// Returns a point-in-time status snapshot.
    pub fn status(&self) -> ClientResult<ReplicatorStatus> {
        self.guard("read the status of")?;
        Ok(self.engine.replicator_status(&self.handle)?)
    }

    /// Returns the configuration the replicator was created with.
    pub fn config(&self) -> ClientResult<ReplicatorConfig> {
        self.guard("read the configuration of")?;
        Ok(self.engine.replicator_config(&self.handle)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrydb_boundary::ReplicatorActivity;
    use ferrydb_engine::LocalEngine;

    fn engine() -> Arc<dyn Engine> {
        Arc::new(LocalEngine::new())
    }

    #[test]
    fn create_requires_open_databases() {
        let engine = engine();
        let db = Database::open(Arc::clone(&engine), "local", None).unwrap();
        let target = Database::open(Arc::clone(&engine), "remote", None).unwrap();

        target.close().unwrap();
        let err =
            ReplicatorConfiguration::new(&db, ReplicatorEndpoint::Database(target)).unwrap_err();
        assert!(err.is_invalid_state());

        db.close().unwrap();
        let err =
            ReplicatorConfiguration::new(&db, ReplicatorEndpoint::Url("wss://peer".into()))
                .unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn config_round_trips_through_the_engine() {
        let engine = engine();
        let db = Database::open(Arc::clone(&engine), "local", None).unwrap();

        let configuration =
            ReplicatorConfiguration::new(&db, ReplicatorEndpoint::Url("wss://peer".into()))
                .unwrap()
                .with_direction(ReplicatorDirection::Pull)
                .with_continuous(true)
                .with_disable_auto_purge(true)
                .with_max_attempts(7)
                .with_heartbeat(Duration::from_secs(42));
        let replicator = Replicator::create(configuration).unwrap();

        let config = replicator.config().unwrap();
        assert_eq!(config.direction, ReplicatorDirection::Pull);
        assert!(config.continuous);
        assert!(config.disable_auto_purge);
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.heartbeat, Duration::from_secs(42));
    }

    #[test]
    fn fresh_replicator_reports_stopped() {
        let engine = engine();
        let db = Database::open(Arc::clone(&engine), "local", None).unwrap();

        let configuration =
            ReplicatorConfiguration::new(&db, ReplicatorEndpoint::Url("wss://peer".into()))
                .unwrap();
        let replicator = Replicator::create(configuration).unwrap();

        let status = replicator.status().unwrap();
        assert_eq!(status.activity, ReplicatorActivity::Stopped);
        assert!(status.error.is_none());
    }

    #[test]
    fn replicator_of_a_closed_database_is_unusable() {
        let engine = engine();
        let db = Database::open(Arc::clone(&engine), "local", None).unwrap();

        let configuration =
            ReplicatorConfiguration::new(&db, ReplicatorEndpoint::Url("wss://peer".into()))
                .unwrap();
        let replicator = Replicator::create(configuration).unwrap();

        db.close().unwrap();
        assert!(replicator.start(false).unwrap_err().is_invalid_state());
        assert!(replicator.stop().unwrap_err().is_invalid_state());
        assert!(replicator.status().unwrap_err().is_invalid_state());
        assert!(replicator.config().unwrap_err().is_invalid_state());
    }
}
