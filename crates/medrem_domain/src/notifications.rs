use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::Result,
    refill::{AlertLevel, RefillAlert},
    reminder::Category,
    store::{load_json, save_json, ReminderStore},
};

pub const PREFERENCES_KEY: &str = "notification_preferences";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderDue {
    pub id: String,
    pub title: String,
    pub time: String,
    pub category: Category,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MedicineDue {
    pub medicine_id: String,
    pub name: String,
    pub dosage: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefillNotice {
    pub medicine_id: String,
    pub medicine_name: String,
    pub days_remaining: i64,
    pub alert_level: AlertLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefillConfirmation {
    pub medicine_id: String,
    pub quantity: u32,
    pub new_stock: u32,
}

/// Everything the scheduler tells the UI layer. The tag is the event name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum NotificationEvent {
    MedicineNotification(MedicineDue),
    CustomReminderNotification(ReminderDue),
    RefillAlertNotification(RefillAlert),
    RefillNotification(RefillNotice),
    RefillConfirmed(RefillConfirmation),
    #[serde(rename_all = "camelCase")]
    RefillAlertDismissed {
        medicine_id: String,
        date: NaiveDate,
    },
    NotificationDismissed {
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    ReminderTaken {
        medicine_id: String,
        time: String,
        date: NaiveDate,
    },
}

impl NotificationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationEvent::MedicineNotification(_) => "medicine-notification",
            NotificationEvent::CustomReminderNotification(_) => "custom-reminder-notification",
            NotificationEvent::RefillAlertNotification(_) => "refill-alert-notification",
            NotificationEvent::RefillNotification(_) => "refill-notification",
            NotificationEvent::RefillConfirmed(_) => "refill-confirmed",
            NotificationEvent::RefillAlertDismissed { .. } => "refill-alert-dismissed",
            NotificationEvent::NotificationDismissed { .. } => "notification-dismissed",
            NotificationEvent::ReminderTaken { .. } => "reminder-taken",
        }
    }

    /// Title and body for an OS notification, for the variants that warrant one.
    pub fn desktop_message(&self) -> Option<(String, String)> {
        match self {
            NotificationEvent::MedicineNotification(due) => {
                let (title, lead) = category_message(Category::Medication);
                let body = if due.dosage.is_empty() {
                    format!("{lead}: {} ({})", due.name, due.time)
                } else {
                    format!("{lead}: {} {} ({})", due.name, due.dosage, due.time)
                };
                Some((title.to_string(), body))
            }
            NotificationEvent::CustomReminderNotification(due) => {
                let (title, lead) = category_message(due.category);
                let mut body = format!("{lead}: {}", due.title);
                if let Some(notes) = due.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                    body.push_str(" - ");
                    body.push_str(notes.trim());
                }
                Some((title.to_string(), body))
            }
            NotificationEvent::RefillAlertNotification(alert) => Some((
                refill_title(alert.alert_level, alert.days_remaining).to_string(),
                refill_body(&alert.medicine_name, alert.days_remaining),
            )),
            NotificationEvent::RefillNotification(notice) => Some((
                refill_title(notice.alert_level, notice.days_remaining).to_string(),
                refill_body(&notice.medicine_name, notice.days_remaining),
            )),
            _ => None,
        }
    }
}

/// Category lookup for OS notification copy: `(title, body lead)`.
pub fn category_message(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::Health => ("Health reminder", "Time to look after your health"),
        Category::Medication => ("Medication reminder", "Time to take your medicine"),
        Category::Exercise => ("Exercise reminder", "Time to get moving"),
        Category::Nutrition => ("Nutrition reminder", "Time for a healthy meal"),
        Category::Appointment => ("Appointment reminder", "You have an appointment"),
        Category::Personal => ("Personal reminder", "Reminder"),
        Category::Other => ("Reminder", "Reminder"),
    }
}

fn refill_title(level: AlertLevel, days_remaining: i64) -> &'static str {
    if days_remaining <= 0 {
        return "Medicine finished";
    }
    match level {
        AlertLevel::Warning => "Refill soon",
        AlertLevel::Urgent => "Refill needed",
        AlertLevel::Critical => "Refill today",
    }
}

fn refill_body(name: &str, days_remaining: i64) -> String {
    match days_remaining {
        d if d <= 0 => format!("{name} has run out. Refill as soon as possible."),
        1 => format!("{name}: 1 day of supply left."),
        d => format!("{name}: {d} days of supply left."),
    }
}

pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &NotificationEvent);
}

pub type Listener = Arc<dyn Fn(&NotificationEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process publish/subscribe. Events with no listener are dropped.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&NotificationEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl NotificationSink for EventBus {
    fn publish(&self, event: &NotificationEvent) {
        // Snapshot so listeners may subscribe or unsubscribe while handling.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            debug!(event = event.name(), "no listener mounted, event dropped");
            return;
        }
        for listener in listeners {
            listener(event);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPermission {
    Granted,
    Denied,
    #[default]
    Default,
}

pub trait DesktopNotifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;
    fn show(&self, title: &str, body: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub desktop: bool,
    pub medicine_reminders: bool,
    pub custom_reminders: bool,
    pub refill_alerts: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            desktop: true,
            medicine_reminders: true,
            custom_reminders: true,
            refill_alerts: true,
        }
    }
}

impl NotificationPreferences {
    pub fn load(store: &dyn ReminderStore) -> Self {
        load_json(store, PREFERENCES_KEY).unwrap_or_default()
    }

    pub fn save(&self, store: &dyn ReminderStore) -> Result<()> {
        save_json(store, PREFERENCES_KEY, self)
    }

    /// Whether `event` should be delivered at all. Acknowledgement events always pass.
    pub fn allows(&self, event: &NotificationEvent) -> bool {
        match event {
            NotificationEvent::MedicineNotification(_) => self.enabled && self.medicine_reminders,
            NotificationEvent::CustomReminderNotification(_) => {
                self.enabled && self.custom_reminders
            }
            NotificationEvent::RefillAlertNotification(_)
            | NotificationEvent::RefillNotification(_) => self.enabled && self.refill_alerts,
            _ => true,
        }
    }
}

#[derive(Clone)]
pub struct NotificationEmitter {
    sink: Arc<dyn NotificationSink>,
    desktop: Option<Arc<dyn DesktopNotifier>>,
}

impl NotificationEmitter {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            desktop: None,
        }
    }

    pub fn with_desktop(mut self, desktop: Arc<dyn DesktopNotifier>) -> Self {
        self.desktop = Some(desktop);
        self
    }

    /// Deliver at most once; desktop failures degrade to in-app only.
    pub fn emit(&self, event: NotificationEvent, preferences: &NotificationPreferences) -> bool {
        if !preferences.allows(&event) {
            debug!(event = event.name(), "suppressed by notification preferences");
            return false;
        }
        self.sink.publish(&event);
        if preferences.desktop {
            self.show_desktop(&event);
        }
        true
    }

    fn show_desktop(&self, event: &NotificationEvent) {
        let Some(desktop) = &self.desktop else {
            return;
        };
        let Some((title, body)) = event.desktop_message() else {
            return;
        };
        match desktop.permission() {
            NotificationPermission::Granted => {
                if let Err(err) = desktop.show(&title, &body) {
                    warn!(event = event.name(), %err, "desktop notification failed");
                }
            }
            permission => {
                debug!(event = event.name(), ?permission, "desktop notification not permitted");
            }
        }
    }
}
