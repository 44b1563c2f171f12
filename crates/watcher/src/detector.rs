//! Change detection between stored resource state and a fresh observation.

use crate::types::{Aspect, ChangeEvent, ChangeSet, Observation, Resource};

/// Compare `stored` against `observation` and build the resulting event.
///
/// The event carries a copy of `stored` as the previous snapshot and the
/// updated resource as the current one. An event is returned even when
/// nothing changed; callers filter on [`ChangeEvent::is_empty`].
///
/// An error text that differs from the stored one takes precedence over a
/// status difference within the same observation.
pub fn detect(stored: &Resource, observation: &Observation) -> ChangeEvent {
    let mut current = stored.clone();
    let mut changed = ChangeSet::default();

    if current.fingerprint != observation.fingerprint {
        changed.insert(Aspect::Content);
        current.fingerprint = observation.fingerprint;
    }

    if observation.is_failure() && observation.error != current.error {
        changed.insert(Aspect::StatusOrError);
        current.error = observation.error.clone();
        current.status = 0;
    } else if observation.status != current.status {
        changed.insert(Aspect::StatusOrError);
        current.status = observation.status;
        current.error.clear();
    }

    current.last_check = observation.observed_at;
    if !changed.is_empty() {
        current.last_change = observation.observed_at;
    }

    ChangeEvent {
        resource_id: stored.id,
        previous: stored.clone(),
        current,
        changed,
        detected_at: observation.observed_at,
    }
}
