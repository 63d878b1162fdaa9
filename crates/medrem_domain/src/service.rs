use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::{
    catalog::{MedicineCatalog, ReminderCatalog, RemoteMedicines, RemoteReminders},
    clock::{Clock, SystemClock},
    dedup::{purge_dated, DedupGuard, DedupNamespace},
    error::{ReminderError, Result},
    matcher,
    notifications::{
        DesktopNotifier, EventBus, MedicineDue, NotificationEmitter, NotificationEvent,
        NotificationPreferences, NotificationSink, RefillConfirmation, RefillNotice, ReminderDue,
    },
    refill::{RefillAlert, RefillTracker},
    reminder::{self, Medicine, Reminder, ReminderFilter},
    scheduler::{Scheduler, TaskHandle},
    store::{load_json, save_json, MemoryStore, ReminderStore},
};

pub const COMPLETED_PREFIX: &str = "completed_reminders_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub reminder_poll: Duration,
    pub refill_scan: Duration,
    pub refill_dispatch: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reminder_poll: Duration::from_secs(30),
            refill_scan: Duration::from_secs(60 * 60),
            refill_dispatch: Duration::from_secs(30),
        }
    }
}

pub struct ReminderService {
    clock: Arc<dyn Clock>,
    store: Arc<dyn ReminderStore>,
    reminders: ReminderCatalog,
    medicines: MedicineCatalog,
    emitter: NotificationEmitter,
    custom_guard: DedupGuard,
    dose_guard: DedupGuard,
    refills: Mutex<RefillTracker>,
    cycle: Mutex<()>,
    config: SchedulerConfig,
}

pub struct ReminderServiceBuilder {
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn ReminderStore>>,
    sink: Option<Arc<dyn NotificationSink>>,
    desktop: Option<Arc<dyn DesktopNotifier>>,
    remote_reminders: Option<Arc<dyn RemoteReminders>>,
    remote_medicines: Option<Arc<dyn RemoteMedicines>>,
    config: SchedulerConfig,
}

impl Default for ReminderServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReminderServiceBuilder {
    pub fn new() -> Self {
        Self {
            clock: None,
            store: None,
            sink: None,
            desktop: None,
            remote_reminders: None,
            remote_medicines: None,
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ReminderStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_desktop_notifier(mut self, desktop: Arc<dyn DesktopNotifier>) -> Self {
        self.desktop = Some(desktop);
        self
    }

    pub fn with_remote_reminders(mut self, remote: Arc<dyn RemoteReminders>) -> Self {
        self.remote_reminders = Some(remote);
        self
    }

    pub fn with_remote_medicines(mut self, remote: Arc<dyn RemoteMedicines>) -> Self {
        self.remote_medicines = Some(remote);
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ReminderService {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn ReminderStore>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(EventBus::new()) as Arc<dyn NotificationSink>);

        let mut reminders = ReminderCatalog::new(Arc::clone(&store));
        if let Some(remote) = self.remote_reminders {
            reminders = reminders.with_remote(remote);
        }
        let mut medicines = MedicineCatalog::new(Arc::clone(&store));
        if let Some(remote) = self.remote_medicines {
            medicines = medicines.with_remote(remote);
        }
        let mut emitter = NotificationEmitter::new(sink);
        if let Some(desktop) = self.desktop {
            emitter = emitter.with_desktop(desktop);
        }

        ReminderService {
            custom_guard: DedupGuard::new(Arc::clone(&store), DedupNamespace::CustomReminder),
            dose_guard: DedupGuard::new(Arc::clone(&store), DedupNamespace::MedicineDose),
            refills: Mutex::new(RefillTracker::load(Arc::clone(&store))),
            cycle: Mutex::new(()),
            clock,
            store,
            reminders,
            medicines,
            emitter,
            config: self.config,
        }
    }
}

impl ReminderService {
    pub fn builder() -> ReminderServiceBuilder {
        ReminderServiceBuilder::new()
    }

    pub fn reminders(&self) -> &ReminderCatalog {
        &self.reminders
    }

    pub fn medicines(&self) -> &MedicineCatalog {
        &self.medicines
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn preferences(&self) -> NotificationPreferences {
        NotificationPreferences::load(self.store.as_ref())
    }

    pub fn set_preferences(&self, preferences: &NotificationPreferences) -> Result<()> {
        preferences.save(self.store.as_ref())
    }

    #[instrument(skip(self))]
    pub fn check_custom_reminders(&self) -> Vec<ReminderDue> {
        let _cycle = self.cycle.lock();
        let now = self.clock.now();
        let today = now.date();
        self.purge_expired(today);

        let preferences = self.preferences();
        if !(preferences.enabled && preferences.custom_reminders) {
            return Vec::new();
        }

        let reminders = self.reminders.list(&ReminderFilter::active());
        let mut fired = Vec::new();
        for reminder in matcher::due_reminders(&reminders, now) {
            if !self.custom_guard.claim(&reminder.id, today, &reminder.time) {
                continue;
            }
            let due = ReminderDue {
                id: reminder.id.clone(),
                title: reminder.title.clone(),
                time: reminder.time.clone(),
                category: reminder.category,
                notes: reminder.notes.clone(),
            };
            info!(reminder_id = %due.id, time = %due.time, "custom reminder due");
            self.emitter.emit(
                NotificationEvent::CustomReminderNotification(due.clone()),
                &preferences,
            );
            fired.push(due);
        }
        fired
    }

    /// Emit every medicine dose due this minute that is neither taken nor already shown.
    #[instrument(skip(self))]
    pub fn check_medicine_doses(&self) -> Vec<MedicineDue> {
        let _cycle = self.cycle.lock();
        let now = self.clock.now();
        let today = now.date();

        let preferences = self.preferences();
        if !(preferences.enabled && preferences.medicine_reminders) {
            return Vec::new();
        }

        let medicines = self.medicines.list();
        let completed = self.completed_doses(today);
        let mut fired = Vec::new();
        for (medicine, time) in matcher::due_doses(&medicines, now) {
            if completed.contains(&dose_key(&medicine.id, &time)) {
                debug!(medicine_id = %medicine.id, %time, "dose already taken");
                continue;
            }
            if !self.dose_guard.claim(&medicine.id, today, &time) {
                continue;
            }
            let due = MedicineDue {
                medicine_id: medicine.id.clone(),
                name: medicine.name.clone(),
                dosage: medicine.dosage.clone(),
                time,
            };
            info!(medicine_id = %due.medicine_id, time = %due.time, "medicine dose due");
            self.emitter.emit(
                NotificationEvent::MedicineNotification(due.clone()),
                &preferences,
            );
            fired.push(due);
        }
        fired
    }

    #[instrument(skip(self))]
    pub fn scan_refills(&self) -> Vec<RefillNotice> {
        let _cycle = self.cycle.lock();
        let today = self.clock.today();
        let medicines = self.medicines.list();
        let notices = self.refills.lock().scan(&medicines, today);
        let preferences = self.preferences();
        for notice in &notices {
            self.emitter.emit(
                NotificationEvent::RefillNotification(notice.clone()),
                &preferences,
            );
        }
        notices
    }

    /// Emit refill alerts whose anchor hour has come and whose budget allows it.
    #[instrument(skip(self))]
    pub fn dispatch_refill_notifications(&self) -> Vec<RefillAlert> {
        let _cycle = self.cycle.lock();
        let preferences = self.preferences();
        if !(preferences.enabled && preferences.refill_alerts) {
            return Vec::new();
        }
        let now = self.clock.now();
        let due = self.refills.lock().due_notifications(now);
        for alert in &due {
            info!(
                medicine_id = %alert.medicine_id,
                level = ?alert.alert_level,
                sent = alert.notifications_sent_today,
                "refill alert notification"
            );
            self.emitter.emit(
                NotificationEvent::RefillAlertNotification(alert.clone()),
                &preferences,
            );
        }
        due
    }

    pub fn refill_alerts(&self) -> Vec<RefillAlert> {
        self.refills.lock().active_alerts(self.clock.today())
    }

    /// Record a dose as taken for today and consume one unit of stock.
    pub fn mark_taken(&self, medicine_id: &str, time: &str) -> Result<()> {
        let time = reminder::normalize_time(time)?;
        let today = self.clock.today();
        let medicine = self
            .medicines
            .list()
            .into_iter()
            .find(|medicine| medicine.id == medicine_id)
            .ok_or_else(|| ReminderError::NotFound(format!("medicine `{medicine_id}`")))?;

        let key = completed_key(today);
        let mut completed: Vec<String> = load_json(self.store.as_ref(), &key).unwrap_or_default();
        let entry = dose_key(medicine_id, &time);
        if completed.contains(&entry) {
            return Ok(());
        }
        completed.push(entry);
        save_json(self.store.as_ref(), &key, &completed)?;

        if medicine.current_stock > 0 {
            self.medicines
                .update_stock(medicine_id, medicine.current_stock - 1)?;
        }
        self.emitter.emit(
            NotificationEvent::ReminderTaken {
                medicine_id: medicine_id.to_string(),
                time,
                date: today,
            },
            &self.preferences(),
        );
        Ok(())
    }

    pub fn dismiss_notification(&self, id: &str) {
        self.emitter.emit(
            NotificationEvent::NotificationDismissed { id: id.to_string() },
            &self.preferences(),
        );
    }

    pub fn dismiss_refill(&self, medicine_id: &str) -> Result<bool> {
        let today = self.clock.today();
        let newly = self.refills.lock().dismiss(medicine_id, today)?;
        if newly {
            self.emitter.emit(
                NotificationEvent::RefillAlertDismissed {
                    medicine_id: medicine_id.to_string(),
                    date: today,
                },
                &self.preferences(),
            );
        }
        Ok(newly)
    }

    /// Record a refill with the medicine collaborator and drop the alert.
    pub fn confirm_refill(&self, medicine_id: &str, quantity: u32) -> Result<Medicine> {
        if quantity == 0 {
            return Err(ReminderError::Validation(
                "refill quantity must be positive".into(),
            ));
        }
        let medicine = self.medicines.refill(medicine_id, quantity)?;
        self.refills.lock().confirm(medicine_id);
        info!(medicine_id, quantity, stock = medicine.current_stock, "refill confirmed");
        self.emitter.emit(
            NotificationEvent::RefillConfirmed(RefillConfirmation {
                medicine_id: medicine_id.to_string(),
                quantity,
                new_stock: medicine.current_stock,
            }),
            &self.preferences(),
        );
        Ok(medicine)
    }

    pub fn export_reminders(&self) -> Result<String> {
        let reminders = self.reminders.list(&ReminderFilter::default());
        reminder::export_json(&reminders)
    }

    /// Import an export document, creating fresh reminders. All-or-nothing on validation.
    pub fn import_reminders(&self, json: &str) -> Result<Vec<Reminder>> {
        let requests = reminder::parse_import(json)?;
        let mut created = Vec::with_capacity(requests.len());
        for request in requests {
            created.push(self.reminders.create(request)?);
        }
        info!(count = created.len(), "imported reminders");
        Ok(created)
    }

    /// Run the first checks now and schedule the three polling loops.
    pub fn start(self: &Arc<Self>, scheduler: &dyn Scheduler) -> ServiceHandles {
        self.run_reminder_cycle();
        self.scan_refills();
        self.dispatch_refill_notifications();

        let reminders = {
            let service = Arc::clone(self);
            scheduler.schedule_every(
                "reminders",
                self.config.reminder_poll,
                Box::new(move || service.run_reminder_cycle()),
            )
        };
        let scan = {
            let service = Arc::clone(self);
            scheduler.schedule_every(
                "refill-scan",
                self.config.refill_scan,
                Box::new(move || {
                    service.scan_refills();
                }),
            )
        };
        let dispatch = {
            let service = Arc::clone(self);
            scheduler.schedule_every(
                "refill-dispatch",
                self.config.refill_dispatch,
                Box::new(move || {
                    service.dispatch_refill_notifications();
                }),
            )
        };
        info!(config = ?self.config, "reminder scheduler started");
        ServiceHandles {
            handles: vec![reminders, scan, dispatch],
        }
    }

    fn run_reminder_cycle(&self) {
        self.check_custom_reminders();
        self.check_medicine_doses();
    }

    fn completed_doses(&self, today: NaiveDate) -> Vec<String> {
        load_json(self.store.as_ref(), &completed_key(today)).unwrap_or_default()
    }

    fn purge_expired(&self, today: NaiveDate) {
        let mut removed = self.custom_guard.purge_expired(today);
        removed += self.dose_guard.purge_expired(today);
        removed += self.refills.lock().purge_expired(today);
        removed += purge_dated(self.store.as_ref(), COMPLETED_PREFIX, today, |key| {
            let date = key.strip_prefix(COMPLETED_PREFIX)?;
            NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
        });
        if removed > 0 {
            debug!(removed, "expired scheduler keys purged");
        }
    }
}

/// Handles for the running loops. Dropping them leaves the loops running.
pub struct ServiceHandles {
    handles: Vec<TaskHandle>,
}

impl ServiceHandles {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn stop(&self) {
        for handle in &self.handles {
            handle.cancel();
        }
    }

    pub fn join(self) {
        for handle in self.handles {
            handle.join();
        }
    }
}

fn completed_key(date: NaiveDate) -> String {
    format!("{COMPLETED_PREFIX}{}", date.format("%Y-%m-%d"))
}

fn dose_key(medicine_id: &str, time: &str) -> String {
    format!("{medicine_id}-{time}")
}
