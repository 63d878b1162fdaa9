use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::{
    error::{ReminderError, Result},
    reminder::{Medicine, Reminder, ReminderFilter, ReminderPatch, ReminderRequest},
    store::{load_json, save_json, ReminderStore},
};

pub const REMINDER_CACHE_KEY: &str = "custom_reminders";
pub const MEDICINE_CACHE_KEY: &str = "medicines";

/// Remote reminder API. Implementations map transport failures to
/// [`ReminderError::Remote`].
pub trait RemoteReminders: Send + Sync {
    fn list(&self) -> Result<Vec<Reminder>>;
    fn create(&self, request: &ReminderRequest) -> Result<Reminder>;
    fn update(&self, id: &str, patch: &ReminderPatch) -> Result<Reminder>;
    fn delete(&self, id: &str) -> Result<bool>;
    fn toggle_active(&self, id: &str) -> Result<Reminder>;
}

pub trait RemoteMedicines: Send + Sync {
    fn list(&self) -> Result<Vec<Medicine>>;
    fn refill(&self, id: &str, quantity: u32) -> Result<Medicine>;
    fn update_stock(&self, id: &str, quantity: u32) -> Result<Medicine>;
}

/// Reminder access that prefers the remote API and falls back to the local cache.
#[derive(Clone)]
pub struct ReminderCatalog {
    remote: Option<Arc<dyn RemoteReminders>>,
    store: Arc<dyn ReminderStore>,
}

impl ReminderCatalog {
    pub fn new(store: Arc<dyn ReminderStore>) -> Self {
        Self {
            remote: None,
            store,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteReminders>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn cached(&self) -> Vec<Reminder> {
        load_json(self.store.as_ref(), REMINDER_CACHE_KEY).unwrap_or_default()
    }

    #[instrument(skip(self))]
    pub fn list(&self, filter: &ReminderFilter) -> Vec<Reminder> {
        let reminders = match self.remote.as_ref().map(|remote| remote.list()) {
            Some(Ok(reminders)) => {
                self.write_cache(&reminders);
                reminders
            }
            Some(Err(err)) => {
                warn!(%err, "reminder fetch failed, using cached reminders");
                self.cached()
            }
            None => self.cached(),
        };
        reminders
            .into_iter()
            .filter(|reminder| filter.matches(reminder))
            .collect()
    }

    pub fn create(&self, request: ReminderRequest) -> Result<Reminder> {
        let request = request.validated()?;
        let created = match self.remote.as_ref().map(|remote| remote.create(&request)) {
            Some(Ok(reminder)) => reminder,
            Some(Err(err)) => {
                warn!(%err, "remote create failed, creating locally");
                Reminder::from_request(request)?
            }
            None => Reminder::from_request(request)?,
        };
        let mut cached = self.cached();
        cached.retain(|existing| existing.id != created.id);
        cached.push(created.clone());
        self.write_cache(&cached);
        debug!(reminder_id = %created.id, "reminder created");
        Ok(created)
    }

    pub fn update(&self, id: &str, patch: &ReminderPatch) -> Result<Reminder> {
        let remote = self.remote.as_ref().map(|remote| remote.update(id, patch));
        self.apply_local(id, remote, |reminder| patch.apply(reminder))
    }

    pub fn toggle_active(&self, id: &str) -> Result<Reminder> {
        let remote = self.remote.as_ref().map(|remote| remote.toggle_active(id));
        self.apply_local(id, remote, |reminder| {
            reminder.is_active = !reminder.is_active;
            Ok(())
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        if let Some(remote) = &self.remote {
            if let Err(err) = remote.delete(id) {
                warn!(%err, reminder_id = id, "remote delete failed, deleting locally");
            }
        }
        let mut cached = self.cached();
        let before = cached.len();
        cached.retain(|reminder| reminder.id != id);
        let removed = cached.len() != before;
        if removed {
            self.write_cache(&cached);
        }
        Ok(removed)
    }

    /// Use the remote result when there is one, otherwise edit the cached copy.
    fn apply_local(
        &self,
        id: &str,
        remote: Option<Result<Reminder>>,
        edit: impl FnOnce(&mut Reminder) -> Result<()>,
    ) -> Result<Reminder> {
        let mut cached = self.cached();
        let updated = match remote {
            Some(Ok(reminder)) => reminder,
            other => {
                if let Some(Err(err)) = other {
                    warn!(%err, reminder_id = id, "remote update failed, editing locally");
                }
                let mut reminder = cached
                    .iter()
                    .find(|reminder| reminder.id == id)
                    .cloned()
                    .ok_or_else(|| ReminderError::NotFound(format!("reminder `{id}`")))?;
                edit(&mut reminder)?;
                reminder
            }
        };
        match cached.iter_mut().find(|reminder| reminder.id == id) {
            Some(slot) => *slot = updated.clone(),
            None => cached.push(updated.clone()),
        }
        self.write_cache(&cached);
        Ok(updated)
    }

    fn write_cache(&self, reminders: &[Reminder]) {
        if let Err(err) = save_json(self.store.as_ref(), REMINDER_CACHE_KEY, reminders) {
            warn!(%err, "unable to cache reminders");
        }
    }
}

#[derive(Clone)]
pub struct MedicineCatalog {
    remote: Option<Arc<dyn RemoteMedicines>>,
    store: Arc<dyn ReminderStore>,
}

impl MedicineCatalog {
    pub fn new(store: Arc<dyn ReminderStore>) -> Self {
        Self {
            remote: None,
            store,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteMedicines>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn cached(&self) -> Vec<Medicine> {
        load_json(self.store.as_ref(), MEDICINE_CACHE_KEY).unwrap_or_default()
    }

    pub fn replace_cached(&self, medicines: &[Medicine]) -> Result<()> {
        save_json(self.store.as_ref(), MEDICINE_CACHE_KEY, medicines)
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Vec<Medicine> {
        match self.remote.as_ref().map(|remote| remote.list()) {
            Some(Ok(medicines)) => {
                self.write_cache(&medicines);
                medicines
            }
            Some(Err(err)) => {
                warn!(%err, "medicine fetch failed, using cached medicines");
                self.cached()
            }
            None => self.cached(),
        }
    }

    pub fn refill(&self, id: &str, quantity: u32) -> Result<Medicine> {
        let remote = self.remote.as_ref().map(|remote| remote.refill(id, quantity));
        self.apply_local(id, remote, |medicine| {
            medicine.current_stock = medicine.current_stock.saturating_add(quantity);
        })
    }

    pub fn update_stock(&self, id: &str, quantity: u32) -> Result<Medicine> {
        let remote = self
            .remote
            .as_ref()
            .map(|remote| remote.update_stock(id, quantity));
        self.apply_local(id, remote, |medicine| medicine.current_stock = quantity)
    }

    fn apply_local(
        &self,
        id: &str,
        remote: Option<Result<Medicine>>,
        edit: impl FnOnce(&mut Medicine),
    ) -> Result<Medicine> {
        let mut cached = self.cached();
        let updated = match remote {
            Some(Ok(medicine)) => medicine,
            other => {
                if let Some(Err(err)) = other {
                    warn!(%err, medicine_id = id, "remote stock update failed, editing locally");
                }
                let mut medicine = cached
                    .iter()
                    .find(|medicine| medicine.id == id)
                    .cloned()
                    .ok_or_else(|| ReminderError::NotFound(format!("medicine `{id}`")))?;
                edit(&mut medicine);
                medicine
            }
        };
        match cached.iter_mut().find(|medicine| medicine.id == id) {
            Some(slot) => *slot = updated.clone(),
            None => cached.push(updated.clone()),
        }
        self.write_cache(&cached);
        Ok(updated)
    }

    fn write_cache(&self, medicines: &[Medicine]) {
        if let Err(err) = save_json(self.store.as_ref(), MEDICINE_CACHE_KEY, medicines) {
            warn!(%err, "unable to cache medicines");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::Frequency;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    /// Remote that serves a fixed list until switched offline.
    #[derive(Default)]
    struct FlakyRemote {
        offline: Mutex<bool>,
        reminders: Mutex<Vec<Reminder>>,
    }

    impl FlakyRemote {
        fn check(&self) -> Result<()> {
            if *self.offline.lock() {
                return Err(ReminderError::Remote("connection refused".into()));
            }
            Ok(())
        }
    }

    impl RemoteReminders for FlakyRemote {
        fn list(&self) -> Result<Vec<Reminder>> {
            self.check()?;
            Ok(self.reminders.lock().clone())
        }

        fn create(&self, request: &ReminderRequest) -> Result<Reminder> {
            self.check()?;
            let reminder = Reminder::from_request(request.clone())?;
            self.reminders.lock().push(reminder.clone());
            Ok(reminder)
        }

        fn update(&self, id: &str, patch: &ReminderPatch) -> Result<Reminder> {
            self.check()?;
            let mut reminders = self.reminders.lock();
            let reminder = reminders
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| ReminderError::NotFound(id.into()))?;
            patch.apply(reminder)?;
            Ok(reminder.clone())
        }

        fn delete(&self, id: &str) -> Result<bool> {
            self.check()?;
            let mut reminders = self.reminders.lock();
            let before = reminders.len();
            reminders.retain(|r| r.id != id);
            Ok(before != reminders.len())
        }

        fn toggle_active(&self, id: &str) -> Result<Reminder> {
            self.check()?;
            let mut reminders = self.reminders.lock();
            let reminder = reminders
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| ReminderError::NotFound(id.into()))?;
            reminder.is_active = !reminder.is_active;
            Ok(reminder.clone())
        }
    }

    #[test]
    fn list_falls_back_to_cache_when_remote_fails() {
        let store: Arc<dyn ReminderStore> = Arc::new(MemoryStore::new());
        let remote = Arc::new(FlakyRemote::default());
        let catalog = ReminderCatalog::new(store).with_remote(remote.clone());

        catalog
            .create(ReminderRequest::new("Walk", "07:00", Frequency::Daily))
            .unwrap();
        assert_eq!(catalog.list(&ReminderFilter::default()).len(), 1);

        *remote.offline.lock() = true;
        let cached = catalog.list(&ReminderFilter::active());
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].title, "Walk");
    }

    #[test]
    fn offline_edits_apply_to_cache() {
        let store: Arc<dyn ReminderStore> = Arc::new(MemoryStore::new());
        let remote = Arc::new(FlakyRemote::default());
        *remote.offline.lock() = true;
        let catalog = ReminderCatalog::new(store).with_remote(remote);

        let created = catalog
            .create(ReminderRequest::new("Read", "21:00", Frequency::Daily))
            .unwrap();
        let toggled = catalog.toggle_active(&created.id).unwrap();
        assert!(!toggled.is_active);
        assert!(catalog.list(&ReminderFilter::active()).is_empty());

        let patch = ReminderPatch {
            time: Some("21:30".into()),
            ..ReminderPatch::default()
        };
        assert_eq!(catalog.update(&created.id, &patch).unwrap().time, "21:30");
        assert!(catalog.delete(&created.id).unwrap());
        assert!(!catalog.delete(&created.id).unwrap());
        assert!(matches!(
            catalog.toggle_active(&created.id),
            Err(ReminderError::NotFound(_))
        ));
    }

    #[test]
    fn validation_errors_surface_before_remote_call() {
        let store: Arc<dyn ReminderStore> = Arc::new(MemoryStore::new());
        let remote = Arc::new(FlakyRemote::default());
        let catalog = ReminderCatalog::new(store).with_remote(remote.clone());
        let err = catalog
            .create(ReminderRequest::new("", "07:00", Frequency::Daily))
            .unwrap_err();
        assert!(matches!(err, ReminderError::Validation(_)));
        assert!(remote.reminders.lock().is_empty());
    }

    #[test]
    fn medicine_refill_updates_cached_stock_offline() {
        let store: Arc<dyn ReminderStore> = Arc::new(MemoryStore::new());
        let catalog = MedicineCatalog::new(store);
        catalog
            .replace_cached(&[Medicine {
                id: "m1".into(),
                name: "Metformin".into(),
                dosage: "500mg".into(),
                current_stock: 2,
                doses_per_day: 2,
                times: vec!["08:00".into(), "20:00".into()],
                is_active: true,
            }])
            .unwrap();
        assert_eq!(catalog.refill("m1", 30).unwrap().current_stock, 32);
        assert_eq!(catalog.update_stock("m1", 5).unwrap().current_stock, 5);
        assert_eq!(catalog.list()[0].current_stock, 5);
        assert!(matches!(
            catalog.refill("nope", 1),
            Err(ReminderError::NotFound(_))
        ));
    }
}
