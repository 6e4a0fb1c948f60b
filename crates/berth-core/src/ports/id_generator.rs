//! IdGenerator port.

use std::sync::Mutex;
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::{ArtifactId, AttemptId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_attempt_id(&self) -> AttemptId;

    fn generate_artifact_id(&self) -> ArtifactId;
}

/// Monotonic ULIDs stamped from a `Clock`.
///
/// Ids minted within the same millisecond still sort in issue order, so a
/// backup taken right after another is always the `latest`.
pub struct UlidGenerator<C> {
    clock: C,
    inner: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            inner: Mutex::new(Generator::new()),
        }
    }

    fn next_ulid(&self) -> Ulid {
        let now = SystemTime::from(self.clock.now());
        let monotonic = match self.inner.lock() {
            Ok(mut generator) => generator.generate_from_datetime(now).ok(),
            Err(_) => None,
        };
        // random bits exhausted within one millisecond, or a poisoned lock
        monotonic.unwrap_or_else(|| Ulid::from_datetime(now))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_attempt_id(&self) -> AttemptId {
        AttemptId::from_ulid(self.next_ulid())
    }

    fn generate_artifact_id(&self) -> ArtifactId {
        ArtifactId::from_ulid(self.next_ulid())
    }
}
