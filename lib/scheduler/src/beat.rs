//! The beat: tick loop, resync policy, reconciliation, dispatch.
//!
//! The beat owns an in-memory map of enabled schedules and runs a serial
//! tick loop. Each tick optionally refreshes the map from the store
//! (periodic cadence, or early when the listener flags a mutation event,
//! both throttled through a coalesce window) and then fires due entries
//! onto the dispatch queue.

use crate::entry::ScheduleEntry;
use crate::error::BeatError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use marketbeat_bus::DispatchQueue;
use marketbeat_core::ScheduleId;
use marketbeat_schedule::{DispatchMessage, Schedule};
use marketbeat_store::{ScheduleFilter, ScheduleStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, watch};
use tokio::time::Duration;

/// Tunables for the beat loop.
#[derive(Debug, Clone)]
pub struct BeatOptions {
    /// Timezone cron expressions are evaluated in.
    pub timezone: Tz,
    /// Periodic resync cadence.
    pub default_resync_interval: Duration,
    /// Coalesce window: consecutive resyncs closer than this are merged.
    pub min_sync_interval: Duration,
    /// Upper bound on the sleep between ticks.
    pub max_tick_interval: Duration,
}

impl Default for BeatOptions {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            default_resync_interval: Duration::from_secs(60),
            min_sync_interval: Duration::from_secs(5),
            max_tick_interval: Duration::from_secs(5),
        }
    }
}

/// The "resync wanted" flag shared between the beat and the event listener.
///
/// The listener requests; the beat's next tick services the request once the
/// coalesce window allows. This bounds reaction latency at
/// `min_sync_interval + max_tick_interval` while preventing resync storms
/// under rapid edits.
#[derive(Clone)]
pub struct ResyncHandle {
    wanted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ResyncHandle {
    pub(crate) fn new() -> Self {
        Self {
            wanted: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Flags that the schedule set changed and wakes the beat.
    pub fn request(&self) {
        self.wanted.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn is_wanted(&self) -> bool {
        self.wanted.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.wanted.store(false, Ordering::SeqCst);
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// The database-backed scheduler.
///
/// Single-instance by contract: a second beat against the same store would
/// double-fire every schedule.
pub struct Beat {
    store: Arc<dyn ScheduleStore>,
    queue: Arc<dyn DispatchQueue>,
    options: BeatOptions,
    entries: HashMap<ScheduleId, ScheduleEntry>,
    last_resync_at: DateTime<Utc>,
    resync: ResyncHandle,
}

impl Beat {
    /// Boots the beat: loads all enabled schedules and seeds every entry's
    /// `last_fire_at` with the boot instant, so the first fire is the next
    /// cron match after boot rather than a catch-up flood.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial snapshot cannot be read.
    pub async fn load(
        store: Arc<dyn ScheduleStore>,
        queue: Arc<dyn DispatchQueue>,
        options: BeatOptions,
    ) -> Result<Self, BeatError> {
        let snapshot = store
            .list(&ScheduleFilter::enabled_only())
            .await
            .map_err(|e| BeatError::LoadFailed {
                reason: e.to_string(),
            })?;

        let now = Utc::now();
        let mut beat = Self {
            store,
            queue,
            options,
            entries: HashMap::new(),
            last_resync_at: now,
            resync: ResyncHandle::new(),
        };
        beat.reconcile(snapshot, now);

        tracing::info!(schedules = beat.entries.len(), "Loaded schedule snapshot");
        Ok(beat)
    }

    /// Returns the handle the event listener uses to request resyncs.
    #[must_use]
    pub fn resync_handle(&self) -> ResyncHandle {
        self.resync.clone()
    }

    /// Runs one tick at `now`: resync if needed, fire due entries, return
    /// the sleep hint until the next tick.
    ///
    /// Ticks are serial; this is only ever called from the run loop (or
    /// directly from tests driving a virtual clock).
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Duration {
        if self.should_resync(now) {
            self.try_resync(now).await;
        }

        let mut sleep_hint = self.options.max_tick_interval;

        for entry in self.entries.values_mut() {
            let (due, until_next) = entry.cron.is_due(entry.last_fire_at, now);

            if due {
                let message = DispatchMessage::from_schedule(&entry.schedule);
                match self.queue.enqueue(&message).await {
                    Ok(()) => {
                        tracing::info!(
                            schedule_id = %entry.schedule.id,
                            schedule_name = %entry.schedule.name,
                            task_name = %entry.schedule.task_name,
                            dispatch_id = %message.dispatch_id,
                            "Dispatched schedule firing"
                        );
                        entry.last_fire_at = now;
                    }
                    Err(e) => {
                        // The entry stays due; a flapping queue defers the
                        // fire to a later tick instead of losing it.
                        tracing::error!(
                            schedule_id = %entry.schedule.id,
                            error = %e,
                            "Dispatch enqueue failed; deferring fire"
                        );
                    }
                }
            }

            if let Ok(until) = u64::try_from(until_next) {
                sleep_hint = sleep_hint.min(Duration::from_secs(until));
            }
        }

        sleep_hint
    }

    /// Runs the tick loop until shutdown, completing the in-flight tick.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(schedules = self.entries.len(), "Beat started");

        loop {
            let sleep_hint = self.tick(Utc::now()).await;
            // Floor keeps a sub-second hint from spinning the loop.
            let sleep_for = sleep_hint.max(Duration::from_millis(500));

            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                () = self.resync.notified() => {}
                _ = shutdown.changed() => break,
            }

            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!("Beat stopped");
    }

    fn should_resync(&self, now: DateTime<Utc>) -> bool {
        let since = (now - self.last_resync_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if since < self.options.min_sync_interval {
            // Coalesce: a wanted flag set inside the window is serviced by
            // a later tick.
            return false;
        }

        since >= self.options.default_resync_interval || self.resync.is_wanted()
    }

    /// Refreshes the entry map from the store, keeping the last good
    /// snapshot when the read fails.
    async fn try_resync(&mut self, now: DateTime<Utc>) {
        match self.store.list(&ScheduleFilter::enabled_only()).await {
            Ok(snapshot) => {
                self.resync.clear();
                self.last_resync_at = now;
                self.reconcile(snapshot, now);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Schedule snapshot read failed; keeping last good snapshot"
                );
            }
        }
    }

    /// Applies a fresh snapshot to the entry map.
    ///
    /// Additions seed `last_fire_at = now` (no backfiring for schedules
    /// created in the past); updates replace the record but preserve
    /// `last_fire_at` so a metadata edit never causes a re-fire; removals
    /// and disabled schedules drop out of the working set.
    fn reconcile(&mut self, snapshot: Vec<Schedule>, now: DateTime<Utc>) {
        let mut seen: HashSet<ScheduleId> = HashSet::with_capacity(snapshot.len());

        for schedule in snapshot {
            if !schedule.enabled {
                continue;
            }
            let id = schedule.id;

            let last_fire_at = match self.entries.get(&id) {
                // Unchanged record: keep the compiled entry as-is.
                Some(existing) if existing.schedule.updated_at == schedule.updated_at => {
                    seen.insert(id);
                    continue;
                }
                // Update: replace the fields but preserve last_fire_at so a
                // metadata edit never causes a re-fire.
                Some(existing) => existing.last_fire_at,
                // Addition: seed with now so past firings are not replayed.
                None => now,
            };

            match ScheduleEntry::new(schedule, self.options.timezone, last_fire_at) {
                Ok(entry) => {
                    seen.insert(id);
                    self.entries.insert(id, entry);
                }
                Err(e) => {
                    // Excluded from firing until the schedule is repaired;
                    // other entries continue.
                    tracing::error!(
                        schedule_id = %id,
                        error = %e,
                        "Excluding schedule with corrupt cron"
                    );
                }
            }
        }

        self.entries.retain(|id, entry| {
            let keep = seen.contains(id);
            if !keep {
                tracing::debug!(
                    schedule_id = %entry.schedule.id,
                    schedule_name = %entry.schedule.name,
                    "Dropping removed or disabled schedule"
                );
            }
            keep
        });
    }
}
