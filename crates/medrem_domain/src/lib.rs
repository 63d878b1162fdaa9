pub mod catalog;
pub mod clock;
pub mod dedup;
pub mod error;
pub mod matcher;
pub mod notifications;
pub mod refill;
pub mod reminder;
pub mod scheduler;
pub mod service;
pub mod store;

pub use crate::error::{ReminderError, Result};
pub use crate::service::{ReminderService, ReminderServiceBuilder, SchedulerConfig};
