use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::store::ReminderStore;

/// Flags older than this many calendar days are purged.
pub const RETENTION_DAYS: i64 = 2;

const FIRED: &str = "true";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupNamespace {
    /// `custom_reminder_notified_<id>_<date>_<HH:MM>`
    CustomReminder,
    /// `notification_shown_<medicineId>-<HH:MM>-<date>`
    MedicineDose,
    /// `refill_notified_<medicineId>_<date>_<hour>`
    RefillHour,
}

impl DedupNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            DedupNamespace::CustomReminder => "custom_reminder_notified_",
            DedupNamespace::MedicineDose => "notification_shown_",
            DedupNamespace::RefillHour => "refill_notified_",
        }
    }

    pub fn key(&self, id: &str, date: NaiveDate, slot: &str) -> String {
        let date = date.format("%Y-%m-%d");
        match self {
            DedupNamespace::MedicineDose => format!("{}{id}-{slot}-{date}", self.prefix()),
            _ => format!("{}{id}_{date}_{slot}", self.prefix()),
        }
    }

    fn date_of(&self, key: &str) -> Option<NaiveDate> {
        let rest = key.strip_prefix(self.prefix())?;
        let date = match self {
            DedupNamespace::MedicineDose => rest.get(rest.len().checked_sub(10)?..)?,
            _ => rest.rsplitn(3, '_').nth(1)?,
        };
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }
}

#[derive(Clone)]
pub struct DedupGuard {
    store: Arc<dyn ReminderStore>,
    namespace: DedupNamespace,
}

impl DedupGuard {
    pub fn new(store: Arc<dyn ReminderStore>, namespace: DedupNamespace) -> Self {
        Self { store, namespace }
    }

    pub fn namespace(&self) -> DedupNamespace {
        self.namespace
    }

    pub fn should_fire(&self, id: &str, date: NaiveDate, slot: &str) -> bool {
        let key = self.namespace.key(id, date, slot);
        match self.store.contains(&key) {
            Ok(fired) => !fired,
            Err(err) => {
                warn!(%key, %err, "dedup lookup failed, assuming not fired");
                true
            }
        }
    }

    pub fn mark_fired(&self, id: &str, date: NaiveDate, slot: &str) {
        let key = self.namespace.key(id, date, slot);
        if let Err(err) = self.store.set(&key, FIRED.to_string()) {
            warn!(%key, %err, "unable to persist dedup flag");
        }
    }

    /// Check and mark in one step. Returns `true` when the caller should fire.
    pub fn claim(&self, id: &str, date: NaiveDate, slot: &str) -> bool {
        if !self.should_fire(id, date, slot) {
            return false;
        }
        self.mark_fired(id, date, slot);
        true
    }

    pub fn purge_expired(&self, today: NaiveDate) -> usize {
        let namespace = self.namespace;
        purge_dated(self.store.as_ref(), namespace.prefix(), today, |key| {
            namespace.date_of(key)
        })
    }
}

/// Delete every key under `prefix` whose embedded date is more than
/// [`RETENTION_DAYS`] before `today`. Failures are logged and skipped.
pub fn purge_dated(
    store: &dyn ReminderStore,
    prefix: &str,
    today: NaiveDate,
    date_of: impl Fn(&str) -> Option<NaiveDate>,
) -> usize {
    let keys = match store.keys_with_prefix(prefix) {
        Ok(keys) => keys,
        Err(err) => {
            warn!(prefix, %err, "unable to list keys for purge");
            return 0;
        }
    };
    let mut removed = 0;
    for key in keys {
        let Some(date) = date_of(&key) else {
            continue;
        };
        if (today - date).num_days() <= RETENTION_DAYS {
            continue;
        }
        match store.delete(&key) {
            Ok(()) => removed += 1,
            Err(err) => warn!(%key, %err, "unable to purge expired key"),
        }
    }
    if removed > 0 {
        debug!(prefix, removed, "purged expired keys");
    }
    removed
}
