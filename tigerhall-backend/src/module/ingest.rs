//! Sighting ingestion: validate, store the photo, gate on distance, persist,
//! then fan out notifications to earlier observers of the same tiger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tigerhall_common::{NotificationMessage, Sighting, SightingReport};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use super::dispatcher::{DispatchError, NotificationDispatcher};
use super::image::ImageStore;
use super::proximity::{Admission, MIN_SIGHTING_DISTANCE_KM, admit};
use super::repository::SightingRepository;
use super::validator::{ValidationError, validate};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("new sighting is {distance_km:.2} km from the previous one (minimum {} km)", MIN_SIGHTING_DISTANCE_KM)]
    TooClose { distance_km: f64 },

    #[error("image processing failed: {0:#}")]
    Image(anyhow::Error),

    #[error("{operation} failed for tiger {tiger_id}: {source:#}")]
    Repository {
        operation: &'static str,
        tiger_id: i64,
        source: anyhow::Error,
    },
}

fn repository_error(operation: &'static str, tiger_id: i64) -> impl FnOnce(anyhow::Error) -> IngestError {
    move |source| IngestError::Repository {
        operation,
        tiger_id,
        source,
    }
}

/// One async mutex per tiger, created on first use and removed again once
/// nobody holds or waits for it.
#[derive(Default)]
struct SubjectLocks {
    locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SubjectLocks {
    fn table(&self) -> MutexGuard<'_, HashMap<i64, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn lock(&self, tiger_id: i64) -> SubjectGuard<'_> {
        // waiters clone under the table lock, so the count check on release sees them
        let lock = self.table().entry(tiger_id).or_default().clone();
        let guard = lock.lock_owned().await;
        SubjectGuard {
            locks: self,
            tiger_id,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().len()
    }
}

struct SubjectGuard<'a> {
    locks: &'a SubjectLocks,
    tiger_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SubjectGuard<'_> {
    fn drop(&mut self) {
        // the owned guard keeps its own reference to the mutex
        drop(self.guard.take());

        let mut table = self.locks.table();
        if table
            .get(&self.tiger_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.tiger_id);
        }
    }
}

pub struct SightingIngestor {
    repository: Arc<dyn SightingRepository>,
    images: Arc<dyn ImageStore>,
    dispatcher: Arc<NotificationDispatcher>,
    subject_locks: Option<SubjectLocks>,
}

impl SightingIngestor {
    /// Ingestions of the same tiger are serialized by default.
    pub fn new(
        repository: Arc<dyn SightingRepository>,
        images: Arc<dyn ImageStore>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            repository,
            images,
            dispatcher,
            subject_locks: Some(SubjectLocks::default()),
        }
    }

    /// Turn per-tiger serialization on or off. Without it two concurrent
    /// reports for one tiger may both pass the distance check.
    pub fn with_subject_serialization(mut self, enabled: bool) -> Self {
        self.subject_locks = enabled.then(SubjectLocks::default);
        self
    }

    pub fn repository(&self) -> &Arc<dyn SightingRepository> {
        &self.repository
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Record a sighting report.
    ///
    /// Nothing is written when validation or the distance check fails.
    /// `update_last_seen` runs before `save_sighting`; if the save then fails
    /// the tiger's last-known position is left pointing at a sighting that
    /// was never stored, and that is logged rather than rolled back.
    pub async fn ingest(
        &self,
        report: &SightingReport,
        image: &[u8],
        image_ext: &str,
    ) -> Result<Sighting, IngestError> {
        let mut sighting = validate(report)?;
        let tiger_id = sighting.tiger_id;

        sighting.image_path = self
            .images
            .store(image, image_ext)
            .await
            .map_err(IngestError::Image)?;

        let subject_guard = match &self.subject_locks {
            Some(locks) => Some(locks.lock(tiger_id).await),
            None => None,
        };

        let last = self
            .repository
            .last_sighting(tiger_id)
            .await
            .map_err(repository_error("last_sighting", tiger_id))?;

        if let Admission::Reject { distance_km } = admit(last.as_ref(), &sighting) {
            info!(
                tiger_id,
                user_id = sighting.user_id,
                "Rejected sighting {:.3} km from the previous one",
                distance_km
            );
            return Err(IngestError::TooClose { distance_km });
        }

        let observers: Vec<i64> = if last.is_some() {
            self.repository
                .list_observers(tiger_id)
                .await
                .map_err(repository_error("list_observers", tiger_id))?
                .into_iter()
                .filter(|&observer| observer != sighting.user_id)
                .collect()
        } else {
            Vec::new()
        };

        self.repository
            .update_last_seen(tiger_id, sighting.timestamp, sighting.lat, sighting.lon)
            .await
            .map_err(repository_error("update_last_seen", tiger_id))?;

        let saved = match self.repository.save_sighting(sighting).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(
                    tiger_id,
                    operation = "save_sighting",
                    "Consistency gap: last-seen position updated but sighting was not stored"
                );
                return Err(repository_error("save_sighting", tiger_id)(e));
            }
        };

        drop(subject_guard);

        info!(
            sighting_id = saved.id,
            tiger_id,
            user_id = saved.user_id,
            "Sighting recorded"
        );

        if !observers.is_empty() {
            self.queue_notification(NotificationMessage {
                tiger_id,
                observer_ids: observers,
            });
        }

        Ok(saved)
    }

    /// Hand a message to the dispatcher without holding up the request.
    /// A full queue is retried from a background task.
    fn queue_notification(&self, message: NotificationMessage) {
        info!(
            tiger_id = message.tiger_id,
            observers = ?message.observer_ids,
            "Queuing notifications"
        );

        match self.dispatcher.try_enqueue(message) {
            Ok(()) => {}
            Err(DispatchError::Full(message)) => {
                warn!(
                    tiger_id = message.tiger_id,
                    "Notification queue full, deferring enqueue"
                );
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    // a closed queue has already been logged by the dispatcher
                    let _ = dispatcher.enqueue(message).await;
                });
            }
            // logged by the dispatcher
            Err(DispatchError::Closed(_)) => {}
        }
    }
}
