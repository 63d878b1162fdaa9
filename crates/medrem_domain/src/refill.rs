use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    dedup::{purge_dated, DedupGuard, DedupNamespace},
    error::{ReminderError, Result},
    notifications::RefillNotice,
    reminder::Medicine,
    store::{load_json, save_json, ReminderStore},
};

pub const ALERTS_KEY: &str = "refill_alerts";
pub const DISMISSED_PREFIX: &str = "refill_dismissed_";

pub const ALERT_THRESHOLD_DAYS: i64 = 3;

/// Written into `notifications_sent_today` on dismissal so no budget remains.
pub const DISMISSED_SENTINEL: u32 = 999;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Urgent,
    Critical,
}

impl AlertLevel {
    pub fn notifications_per_day(&self) -> u32 {
        match self {
            AlertLevel::Warning => 1,
            AlertLevel::Urgent => 2,
            AlertLevel::Critical => 3,
        }
    }

    pub fn anchor_hours(&self) -> &'static [u32] {
        anchor_hours(self.notifications_per_day())
    }
}

/// `floor(current_stock / doses_per_day)`; `None` when no daily dose is recorded.
pub fn days_remaining(current_stock: u32, doses_per_day: u32) -> Option<i64> {
    if doses_per_day == 0 {
        return None;
    }
    Some(i64::from(current_stock / doses_per_day))
}

pub fn alert_level_for(days_remaining: i64) -> Option<AlertLevel> {
    match days_remaining {
        d if d > ALERT_THRESHOLD_DAYS => None,
        3 => Some(AlertLevel::Warning),
        2 => Some(AlertLevel::Urgent),
        _ => Some(AlertLevel::Critical),
    }
}

pub fn anchor_hours(per_day: u32) -> &'static [u32] {
    match per_day {
        0 => &[],
        1 => &[9],
        2 => &[9, 18],
        _ => &[9, 14, 20],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefillAlert {
    pub medicine_id: String,
    pub medicine_name: String,
    pub dosage: String,
    pub days_remaining: i64,
    pub current_stock: u32,
    pub alert_level: AlertLevel,
    pub notifications_sent_today: u32,
    pub last_notification_sent: Option<NaiveDateTime>,
    /// Day `notifications_sent_today` counts for.
    #[serde(default)]
    pub counter_date: Option<NaiveDate>,
    #[serde(default)]
    pub dismissed_date: Option<NaiveDate>,
}

impl RefillAlert {
    fn for_medicine(medicine: &Medicine, days: i64, level: AlertLevel, today: NaiveDate) -> Self {
        Self {
            medicine_id: medicine.id.clone(),
            medicine_name: medicine.name.clone(),
            dosage: medicine.dosage.clone(),
            days_remaining: days,
            current_stock: medicine.current_stock,
            alert_level: level,
            notifications_sent_today: 0,
            last_notification_sent: None,
            counter_date: Some(today),
            dismissed_date: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.days_remaining <= 0
    }

    pub fn display_days(&self) -> i64 {
        self.days_remaining.max(0)
    }

    pub fn is_dismissed_on(&self, today: NaiveDate) -> bool {
        self.dismissed_date == Some(today)
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.counter_date == Some(today) {
            return;
        }
        self.counter_date = Some(today);
        self.notifications_sent_today = 0;
        if self.dismissed_date.is_some_and(|date| date != today) {
            self.dismissed_date = None;
        }
    }
}

pub struct RefillTracker {
    store: Arc<dyn ReminderStore>,
    alerts: BTreeMap<String, RefillAlert>,
    hourly: DedupGuard,
}

impl RefillTracker {
    pub fn load(store: Arc<dyn ReminderStore>) -> Self {
        let alerts: Vec<RefillAlert> = load_json(store.as_ref(), ALERTS_KEY).unwrap_or_default();
        let alerts = alerts
            .into_iter()
            .map(|alert| (alert.medicine_id.clone(), alert))
            .collect();
        let hourly = DedupGuard::new(Arc::clone(&store), DedupNamespace::RefillHour);
        Self {
            store,
            alerts,
            hourly,
        }
    }

    pub fn alerts(&self) -> impl Iterator<Item = &RefillAlert> {
        self.alerts.values()
    }

    pub fn alert(&self, medicine_id: &str) -> Option<&RefillAlert> {
        self.alerts.get(medicine_id)
    }

    pub fn active_alerts(&self, today: NaiveDate) -> Vec<RefillAlert> {
        self.alerts
            .values()
            .filter(|alert| {
                !alert.is_dismissed_on(today) && !self.dismissed_in_store(&alert.medicine_id, today)
            })
            .cloned()
            .collect()
    }

    /// Recompute alerts from current stock. Returns a notice for every medicine
    /// that is new to the alert map or changed level.
    pub fn scan(&mut self, medicines: &[Medicine], today: NaiveDate) -> Vec<RefillNotice> {
        let mut notices = Vec::new();
        let mut seen = Vec::with_capacity(medicines.len());

        for medicine in medicines.iter().filter(|medicine| medicine.is_active) {
            seen.push(medicine.id.as_str());
            let Some(days) = days_remaining(medicine.current_stock, medicine.doses_per_day) else {
                self.alerts.remove(&medicine.id);
                continue;
            };
            let Some(level) = alert_level_for(days) else {
                if self.alerts.remove(&medicine.id).is_some() {
                    info!(medicine_id = %medicine.id, "stock replenished, alert cleared");
                }
                continue;
            };

            let dismissed_today = self.dismissed_in_store(&medicine.id, today);
            let previous_level = self.alerts.get(&medicine.id).map(|alert| alert.alert_level);
            let alert = self
                .alerts
                .entry(medicine.id.clone())
                .or_insert_with(|| RefillAlert::for_medicine(medicine, days, level, today));

            alert.roll_day(today);
            alert.medicine_name = medicine.name.clone();
            alert.dosage = medicine.dosage.clone();
            alert.current_stock = medicine.current_stock;
            alert.days_remaining = days;
            alert.alert_level = level;
            if dismissed_today {
                alert.dismissed_date = Some(today);
                alert.notifications_sent_today = DISMISSED_SENTINEL;
            }

            if previous_level != Some(level) && !dismissed_today {
                debug!(medicine_id = %medicine.id, ?level, days, "refill alert raised");
                notices.push(RefillNotice {
                    medicine_id: medicine.id.clone(),
                    medicine_name: medicine.name.clone(),
                    days_remaining: days,
                    alert_level: level,
                });
            }
        }

        self.alerts.retain(|id, _| seen.contains(&id.as_str()));
        self.persist();
        notices
    }

    /// Alerts that may notify at `now`: within budget, at an anchor hour, and not
    /// yet sent this hour. Their counters are advanced.
    pub fn due_notifications(&mut self, now: NaiveDateTime) -> Vec<RefillAlert> {
        let today = now.date();
        let hour = now.hour();
        let mut due = Vec::new();
        let mut dirty = false;

        let dismissed: Vec<String> = self
            .alerts
            .keys()
            .filter(|id| self.dismissed_in_store(id, today))
            .cloned()
            .collect();

        for alert in self.alerts.values_mut() {
            if alert.counter_date != Some(today) {
                alert.roll_day(today);
                dirty = true;
            }
            if alert.is_dismissed_on(today) || dismissed.contains(&alert.medicine_id) {
                continue;
            }
            let budget = alert.alert_level.notifications_per_day();
            if alert.notifications_sent_today >= budget {
                continue;
            }
            if !anchor_hours(budget).contains(&hour) {
                continue;
            }
            if !self.hourly.claim(&alert.medicine_id, today, &format!("{hour:02}")) {
                continue;
            }
            alert.notifications_sent_today += 1;
            alert.last_notification_sent = Some(now);
            dirty = true;
            due.push(alert.clone());
        }

        if dirty {
            self.persist();
        }
        due
    }

    /// Suppress an alert for the rest of `today`. Returns `false` when it was
    /// already dismissed today.
    pub fn dismiss(&mut self, medicine_id: &str, today: NaiveDate) -> Result<bool> {
        let alert = self
            .alerts
            .get_mut(medicine_id)
            .ok_or_else(|| ReminderError::NotFound(format!("refill alert `{medicine_id}`")))?;
        alert.roll_day(today);
        if alert.is_dismissed_on(today) {
            return Ok(false);
        }
        alert.dismissed_date = Some(today);
        alert.notifications_sent_today = DISMISSED_SENTINEL;
        self.store
            .set(&dismissed_key(medicine_id, today), "true".to_string())?;
        self.persist();
        info!(medicine_id, %today, "refill alert dismissed");
        Ok(true)
    }

    pub fn confirm(&mut self, medicine_id: &str) -> Option<RefillAlert> {
        let removed = self.alerts.remove(medicine_id);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    pub fn purge_expired(&self, today: NaiveDate) -> usize {
        let hourly = self.hourly.purge_expired(today);
        let dismissed = purge_dated(self.store.as_ref(), DISMISSED_PREFIX, today, |key| {
            let date = key.rsplit('_').next()?;
            NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
        });
        hourly + dismissed
    }

    fn dismissed_in_store(&self, medicine_id: &str, today: NaiveDate) -> bool {
        self.store
            .contains(&dismissed_key(medicine_id, today))
            .unwrap_or(false)
    }

    fn persist(&self) {
        let alerts: Vec<&RefillAlert> = self.alerts.values().collect();
        if let Err(err) = save_json(self.store.as_ref(), ALERTS_KEY, &alerts) {
            warn!(%err, "unable to persist refill alerts");
        }
    }
}

fn dismissed_key(medicine_id: &str, date: NaiveDate) -> String {
    format!("{DISMISSED_PREFIX}{medicine_id}_{}", date.format("%Y-%m-%d"))
}
