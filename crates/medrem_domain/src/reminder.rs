use std::collections::BTreeSet;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReminderError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Daily,
    #[serde(alias = "recurring")]
    Weekly,
    Monthly,
    AsNeeded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Health,
    Medication,
    Exercise,
    Nutrition,
    Appointment,
    Personal,
    #[default]
    #[serde(other)]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Health => "health",
            Category::Medication => "medication",
            Category::Exercise => "exercise",
            Category::Nutrition => "nutrition",
            Category::Appointment => "appointment",
            Category::Personal => "personal",
            Category::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub title: String,
    /// Always normalised to `HH:MM`.
    pub time: String,
    pub frequency: Frequency,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<BTreeSet<u8>>,
    #[serde(default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Reminder {
    pub fn from_request(request: ReminderRequest) -> Result<Self> {
        let request = request.validated()?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            title: request.title,
            time: request.time,
            frequency: request.frequency,
            is_active: request.is_active,
            days_of_week: request.days_of_week,
            category: request.category,
            label: request.label,
            notes: request.notes,
        })
    }

    /// Whether `weekday` is listed in this reminder's days (Sunday = 0).
    pub fn runs_on(&self, weekday: Weekday) -> bool {
        let day = weekday.num_days_from_sunday() as u8;
        self.days_of_week
            .as_ref()
            .map(|days| days.contains(&day))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRequest {
    pub title: String,
    pub time: String,
    pub frequency: Frequency,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub days_of_week: Option<BTreeSet<u8>>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_active() -> bool {
    true
}

impl ReminderRequest {
    pub fn new(title: impl Into<String>, time: impl Into<String>, frequency: Frequency) -> Self {
        Self {
            title: title.into(),
            time: time.into(),
            frequency,
            is_active: true,
            days_of_week: None,
            category: Category::default(),
            label: None,
            notes: None,
        }
    }

    pub fn with_days(mut self, days: impl IntoIterator<Item = u8>) -> Self {
        self.days_of_week = Some(days.into_iter().collect());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Trim and check the form fields, normalising the time to `HH:MM`.
    pub fn validated(mut self) -> Result<Self> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ReminderError::Validation("title is required".into()));
        }
        self.title = title.to_string();
        if self.time.trim().is_empty() {
            return Err(ReminderError::Validation("time is required".into()));
        }
        self.time = normalize_time(&self.time)?;
        if let Some(days) = &self.days_of_week {
            validate_days(days)?;
        }
        Ok(self)
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPatch {
    pub title: Option<String>,
    pub time: Option<String>,
    pub frequency: Option<Frequency>,
    pub is_active: Option<bool>,
    pub days_of_week: Option<BTreeSet<u8>>,
    pub category: Option<Category>,
    pub label: Option<String>,
    pub notes: Option<String>,
}

impl ReminderPatch {
    pub fn apply(&self, reminder: &mut Reminder) -> Result<()> {
        let mut updated = reminder.clone();
        if let Some(title) = &self.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(ReminderError::Validation("title is required".into()));
            }
            updated.title = title.to_string();
        }
        if let Some(time) = &self.time {
            updated.time = normalize_time(time)?;
        }
        if let Some(frequency) = self.frequency {
            updated.frequency = frequency;
        }
        if let Some(active) = self.is_active {
            updated.is_active = active;
        }
        if let Some(days) = &self.days_of_week {
            validate_days(days)?;
            updated.days_of_week = Some(days.clone());
        }
        if let Some(category) = self.category {
            updated.category = category;
        }
        if let Some(label) = &self.label {
            updated.label = Some(label.clone());
        }
        if let Some(notes) = &self.notes {
            updated.notes = Some(notes.clone());
        }
        *reminder = updated;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderFilter {
    pub active_only: bool,
    pub category: Option<Category>,
    pub frequency: Option<Frequency>,
}

impl ReminderFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, reminder: &Reminder) -> bool {
        if self.active_only && !reminder.is_active {
            return false;
        }
        if let Some(category) = self.category {
            if reminder.category != category {
                return false;
            }
        }
        if let Some(frequency) = self.frequency {
            if reminder.frequency != frequency {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Medicine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub current_stock: u32,
    #[serde(default)]
    pub doses_per_day: u32,
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Portable form of a reminder used by export/import; ids are not carried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ReminderExport {
    pub title: String,
    pub time: String,
    pub frequency: String,
    #[serde(default)]
    pub days_of_week: Option<BTreeSet<u8>>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<&Reminder> for ReminderExport {
    fn from(reminder: &Reminder) -> Self {
        Self {
            title: reminder.title.clone(),
            time: reminder.time.clone(),
            frequency: frequency_tag(reminder.frequency).to_string(),
            days_of_week: reminder.days_of_week.clone(),
            category: Some(reminder.category.as_str().to_string()),
            label: reminder.label.clone(),
            notes: reminder.notes.clone(),
        }
    }
}

impl ReminderExport {
    pub fn into_request(self) -> Result<ReminderRequest> {
        let frequency: Frequency =
            serde_json::from_value(serde_json::Value::String(self.frequency.clone()))
                .map_err(|_| {
                    ReminderError::Validation(format!("unknown frequency `{}`", self.frequency))
                })?;
        let category = match self.category {
            Some(tag) => serde_json::from_value(serde_json::Value::String(tag))?,
            None => Category::default(),
        };
        ReminderRequest {
            title: self.title,
            time: self.time,
            frequency,
            is_active: true,
            days_of_week: self.days_of_week,
            category,
            label: self.label,
            notes: self.notes,
        }
        .validated()
    }
}

pub fn export_json(reminders: &[Reminder]) -> Result<String> {
    let exports: Vec<ReminderExport> = reminders.iter().map(ReminderExport::from).collect();
    Ok(serde_json::to_string_pretty(&exports)?)
}

/// Parse an export document. Every entry must validate or nothing is returned.
pub fn parse_import(json: &str) -> Result<Vec<ReminderRequest>> {
    let exports: Vec<ReminderExport> = serde_json::from_str(json)?;
    exports
        .into_iter()
        .map(ReminderExport::into_request)
        .collect()
}

pub fn normalize_time(raw: &str) -> Result<String> {
    let parsed = NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ReminderError::InvalidTime(raw.to_string()))?;
    Ok(parsed.format("%H:%M").to_string())
}

fn validate_days(days: &BTreeSet<u8>) -> Result<()> {
    if let Some(bad) = days.iter().find(|day| **day > 6) {
        return Err(ReminderError::Validation(format!(
            "day of week {bad} is outside 0..=6"
        )));
    }
    Ok(())
}

fn frequency_tag(frequency: Frequency) -> &'static str {
    match frequency {
        Frequency::Daily => "daily",
        Frequency::Weekly => "weekly",
        Frequency::Monthly => "monthly",
        Frequency::AsNeeded => "as-needed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation_rejects_blank_fields() {
        let err = ReminderRequest::new("   ", "09:00", Frequency::Daily)
            .validated()
            .unwrap_err();
        assert!(matches!(err, ReminderError::Validation(_)));

        let err = ReminderRequest::new("Walk", "", Frequency::Daily)
            .validated()
            .unwrap_err();
        assert!(matches!(err, ReminderError::Validation(_)));

        let err = ReminderRequest::new("Walk", "25:00", Frequency::Daily)
            .validated()
            .unwrap_err();
        assert!(matches!(err, ReminderError::InvalidTime(_)));
    }

    #[test]
    fn request_time_is_normalised() {
        let reminder =
            Reminder::from_request(ReminderRequest::new(" Stretch ", "7:05", Frequency::Daily))
                .unwrap();
        assert_eq!(reminder.title, "Stretch");
        assert_eq!(reminder.time, "07:05");
        assert!(reminder.is_active);
    }

    #[test]
    fn rejects_out_of_range_weekday() {
        let err = ReminderRequest::new("Yoga", "18:00", Frequency::Weekly)
            .with_days([1, 7])
            .validated()
            .unwrap_err();
        assert!(matches!(err, ReminderError::Validation(_)));
    }

    #[test]
    fn patch_leaves_reminder_untouched_on_error() {
        let mut reminder =
            Reminder::from_request(ReminderRequest::new("Water", "10:00", Frequency::Daily))
                .unwrap();
        let patch = ReminderPatch {
            title: Some("Drink water".into()),
            time: Some("nope".into()),
            ..ReminderPatch::default()
        };
        assert!(patch.apply(&mut reminder).is_err());
        assert_eq!(reminder.title, "Water");

        let patch = ReminderPatch {
            time: Some("11:30".into()),
            is_active: Some(false),
            ..ReminderPatch::default()
        };
        patch.apply(&mut reminder).unwrap();
        assert_eq!(reminder.time, "11:30");
        assert!(!reminder.is_active);
    }

    #[test]
    fn wire_format_uses_camel_case_and_kebab_frequency() {
        let reminder = Reminder::from_request(
            ReminderRequest::new("Pills", "08:00", Frequency::AsNeeded).with_days([0, 6]),
        )
        .unwrap();
        let value = serde_json::to_value(&reminder).unwrap();
        assert_eq!(value["frequency"], "as-needed");
        assert_eq!(value["isActive"], true);
        assert_eq!(value["daysOfWeek"], serde_json::json!([0, 6]));

        let parsed: Reminder = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "title": "Old",
            "time": "09:00",
            "frequency": "recurring",
            "isActive": true,
            "category": "unknown-thing"
        }))
        .unwrap();
        assert_eq!(parsed.frequency, Frequency::Weekly);
        assert_eq!(parsed.category, Category::Other);
    }

    #[test]
    fn filter_matches_on_all_fields() {
        let mut reminder = Reminder::from_request(
            ReminderRequest::new("Run", "06:00", Frequency::Daily)
                .with_category(Category::Exercise),
        )
        .unwrap();
        let filter = ReminderFilter {
            active_only: true,
            category: Some(Category::Exercise),
            frequency: Some(Frequency::Daily),
        };
        assert!(filter.matches(&reminder));
        reminder.is_active = false;
        assert!(!filter.matches(&reminder));
        assert!(ReminderFilter::default().matches(&reminder));
    }

    #[test]
    fn import_rejects_whole_batch_on_invalid_entry() {
        let json = r#"[
            {"title": "Ok", "time": "08:00", "frequency": "daily"},
            {"title": "", "time": "08:00", "frequency": "daily"}
        ]"#;
        assert!(matches!(
            parse_import(json),
            Err(ReminderError::Validation(_))
        ));
        assert!(matches!(
            parse_import("{not json"),
            Err(ReminderError::Serialization(_))
        ));
    }
}
