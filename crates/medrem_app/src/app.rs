use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use medrem_domain::{
    notifications::{DesktopNotifier, EventBus, NotificationPermission},
    scheduler::ThreadScheduler,
    store::JsonFileStore,
    ReminderService, SchedulerConfig,
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) store_path: PathBuf,
    pub(crate) scheduler: SchedulerConfig,
    pub(crate) import_path: Option<PathBuf>,
    pub(crate) run_for: Option<Duration>,
    pub(crate) desktop_permission: NotificationPermission,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /// Build from an arbitrary variable source. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup("MEDREM_STORE").filter(|v| !v.trim().is_empty()) {
            config.store_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_positive(&lookup, "MEDREM_REMINDER_POLL_SECS") {
            config.scheduler.reminder_poll = Duration::from_secs(secs);
        }
        if let Some(minutes) = parse_positive(&lookup, "MEDREM_REFILL_SCAN_MINUTES") {
            match minutes.checked_mul(60) {
                Some(secs) => config.scheduler.refill_scan = Duration::from_secs(secs),
                None => warn!(minutes, "ignoring out-of-range MEDREM_REFILL_SCAN_MINUTES"),
            }
        }
        if let Some(secs) = parse_positive(&lookup, "MEDREM_REFILL_DISPATCH_SECS") {
            config.scheduler.refill_dispatch = Duration::from_secs(secs);
        }
        if let Some(path) = lookup("MEDREM_IMPORT").filter(|v| !v.trim().is_empty()) {
            config.import_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = parse_positive(&lookup, "MEDREM_RUN_SECS") {
            config.run_for = Some(Duration::from_secs(secs));
        }
        if let Some(permission) = lookup("MEDREM_DESKTOP") {
            match permission.trim().to_ascii_lowercase().as_str() {
                "granted" => config.desktop_permission = NotificationPermission::Granted,
                "denied" => config.desktop_permission = NotificationPermission::Denied,
                "default" => config.desktop_permission = NotificationPermission::Default,
                other => warn!(value = other, "ignoring unknown MEDREM_DESKTOP value"),
            }
        }
        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("medrem-store.json"),
            scheduler: SchedulerConfig::default(),
            import_path: None,
            run_for: None,
            desktop_permission: NotificationPermission::Granted,
        }
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(key, value = %raw, "ignoring invalid setting");
            None
        }
    }
}

/// Desktop surface for headless runs: notifications land in the log.
#[derive(Debug)]
pub struct LogNotifier {
    permission: NotificationPermission,
}

impl LogNotifier {
    pub fn new(permission: NotificationPermission) -> Self {
        Self { permission }
    }
}

impl DesktopNotifier for LogNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    fn show(&self, title: &str, body: &str) -> medrem_domain::Result<()> {
        info!(target: "medrem::desktop", %title, %body, "notification");
        Ok(())
    }
}

/// Wire the service to the JSON store, the event bus and the log notifier.
pub fn build_service(config: &AppConfig) -> Result<(Arc<ReminderService>, Arc<EventBus>)> {
    let store = JsonFileStore::open(&config.store_path).with_context(|| {
        format!("failed to open store at {}", config.store_path.display())
    })?;
    let bus = Arc::new(EventBus::new());
    bus.subscribe(|event| match serde_json::to_string(event) {
        Ok(payload) => debug!(event = event.name(), %payload, "event published"),
        Err(err) => warn!(event = event.name(), %err, "unable to encode event"),
    });
    let service = ReminderService::builder()
        .with_store(Arc::new(store))
        .with_notification_sink(bus.clone())
        .with_desktop_notifier(Arc::new(LogNotifier::new(config.desktop_permission)))
        .with_config(config.scheduler)
        .build();
    Ok((Arc::new(service), bus))
}

pub fn import_file(service: &ReminderService, path: &Path) -> Result<usize> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read import file {}", path.display()))?;
    let created = service
        .import_reminders(&raw)
        .with_context(|| format!("failed to import reminders from {}", path.display()))?;
    Ok(created.len())
}

pub fn run(config: AppConfig) -> Result<()> {
    info!(store = %config.store_path.display(), "starting reminder scheduler");
    let (service, _bus) = build_service(&config)?;

    if let Some(path) = &config.import_path {
        let count = import_file(&service, path)?;
        info!(count, path = %path.display(), "reminders imported");
    }

    let handles = service.start(&ThreadScheduler);
    match config.run_for {
        Some(duration) => {
            thread::sleep(duration);
            info!("run duration elapsed, stopping");
            handles.join();
        }
        None => loop {
            thread::park();
        },
    }
    Ok(())
}
