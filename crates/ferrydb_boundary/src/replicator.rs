//! Replicator configuration and status types.

use crate::handle::DatabaseHandle;
use std::time::Duration;

/// Direction of synchronization for a replicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorDirection {
    /// Push local changes and pull remote ones.
    PushAndPull,
    /// Push local changes only.
    Push,
    /// Pull remote changes only.
    Pull,
}

/// The remote side of a replication session.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Another database open in the same engine.
    LocalDatabase(DatabaseHandle),
    /// A URL-like address of a remote peer.
    Url(String),
}

/// Configuration for a replicator, captured at creation time.
///
/// Configuration is immutable once the replicator is created; to change it,
/// stop the replicator and create a new one.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// The local database to synchronize.
    pub database: DatabaseHandle,
    /// The remote side.
    pub endpoint: Endpoint,
    /// Direction of synchronization.
    pub direction: ReplicatorDirection,
    /// Whether the replicator keeps running after a cycle completes.
    pub continuous: bool,
    /// Suppresses automatic purge of documents on access loss.
    pub disable_auto_purge: bool,
    /// Maximum connection attempts before giving up with an error status.
    pub max_attempts: u32,
    /// Wait between connection attempts.
    pub max_attempt_wait_time: Duration,
    /// Idle heartbeat interval for continuous replicators.
    pub heartbeat: Duration,
}

impl ReplicatorConfig {
    /// Creates a configuration with the original client defaults:
    /// push-and-pull, one-shot, 10 attempts, 300 s attempt wait and
    /// heartbeat.
    pub fn new(database: DatabaseHandle, endpoint: Endpoint) -> Self {
        Self {
            database,
            endpoint,
            direction: ReplicatorDirection::PushAndPull,
            continuous: false,
            disable_auto_purge: false,
            max_attempts: 10,
            max_attempt_wait_time: Duration::from_secs(300),
            heartbeat: Duration::from_secs(300),
        }
    }

    /// Sets the sync direction.
    #[must_use]
    pub fn with_direction(mut self, direction: ReplicatorDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Sets whether the replicator is continuous.
    #[must_use]
    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    /// Suppresses automatic purge on access loss.
    #[must_use]
    pub fn with_disable_auto_purge(mut self, disable: bool) -> Self {
        self.disable_auto_purge = disable;
        self
    }

    /// Sets the maximum number of connection attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the wait between connection attempts.
    #[must_use]
    pub fn with_max_attempt_wait_time(mut self, wait: Duration) -> Self {
        self.max_attempt_wait_time = wait;
        self
    }

    /// Sets the idle heartbeat interval.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

/// Activity level of a replicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorActivity {
    /// Not running.
    Stopped,
    /// Resolving and connecting to the endpoint.
    Connecting,
    /// Transferring documents.
    Busy,
    /// Caught up; continuous replicators wait here for changes.
    Idle,
    /// Endpoint temporarily unreachable; retrying per the retry policy.
    Offline,
    /// Retries exhausted or a non-retryable fault occurred.
    Error,
}

impl ReplicatorActivity {
    /// Returns true while the replicator is doing or awaiting work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReplicatorActivity::Connecting
                | ReplicatorActivity::Busy
                | ReplicatorActivity::Idle
                | ReplicatorActivity::Offline
        )
    }

    /// Returns true if `start` may launch a new session from this state.
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, ReplicatorActivity::Stopped | ReplicatorActivity::Error)
    }
}

/// Progress of the current sync cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicatorProgress {
    /// Completed fraction of the current cycle, in `0.0..=1.0`.
    ///
    /// Non-decreasing within a cycle; resets to 0 when a new cycle starts.
    pub complete: f64,
    /// Documents transferred since the session started.
    pub document_count: u64,
}

/// A point-in-time snapshot of a replicator's state.
#[derive(Debug, Clone)]
pub struct ReplicatorStatus {
    /// Current activity level.
    pub activity: ReplicatorActivity,
    /// Description of the most recent fault, if any.
    pub error: Option<String>,
    /// Progress of the current cycle.
    pub progress: ReplicatorProgress,
}

impl ReplicatorStatus {
    /// The status of a replicator that has never been started.
    #[must_use]
    pub fn stopped() -> Self {
        Self {
            activity: ReplicatorActivity::Stopped,
            error: None,
            progress: ReplicatorProgress {
                complete: 0.0,
                document_count: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DatabaseHandle;

    #[test]
    fn config_defaults() {
        let db = DatabaseHandle::mint();
        let config = ReplicatorConfig::new(db, Endpoint::Url("wss://peer.example.com".into()));

        assert_eq!(config.direction, ReplicatorDirection::PushAndPull);
        assert!(!config.continuous);
        assert!(!config.disable_auto_purge);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.max_attempt_wait_time, Duration::from_secs(300));
        assert_eq!(config.heartbeat, Duration::from_secs(300));
    }

    #[test]
    fn config_builder() {
        let db = DatabaseHandle::mint();
        let target = DatabaseHandle::mint();
        let config = ReplicatorConfig::new(db, Endpoint::LocalDatabase(target))
            .with_direction(ReplicatorDirection::Push)
            .with_continuous(true)
            .with_max_attempts(3)
            .with_max_attempt_wait_time(Duration::from_millis(50))
            .with_heartbeat(Duration::from_millis(20));

        assert_eq!(config.direction, ReplicatorDirection::Push);
        assert!(config.continuous);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_attempt_wait_time, Duration::from_millis(50));
        assert_eq!(config.heartbeat, Duration::from_millis(20));
    }

    #[test]
    fn activity_predicates() {
        assert!(ReplicatorActivity::Stopped.can_start());
        assert!(ReplicatorActivity::Error.can_start());
        assert!(!ReplicatorActivity::Busy.can_start());
        assert!(!ReplicatorActivity::Idle.can_start());

        assert!(ReplicatorActivity::Connecting.is_active());
        assert!(ReplicatorActivity::Busy.is_active());
        assert!(ReplicatorActivity::Idle.is_active());
        assert!(ReplicatorActivity::Offline.is_active());
        assert!(!ReplicatorActivity::Stopped.is_active());
        assert!(!ReplicatorActivity::Error.is_active());
    }

    #[test]
    fn stopped_status() {
        let status = ReplicatorStatus::stopped();
        assert_eq!(status.activity, ReplicatorActivity::Stopped);
        assert!(status.error.is_none());
        assert_eq!(status.progress.complete, 0.0);
        assert_eq!(status.progress.document_count, 0);
    }
}
