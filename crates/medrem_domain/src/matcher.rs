use chrono::{Datelike, NaiveDateTime, Weekday};

use crate::reminder::{normalize_time, Frequency, Medicine, Reminder};

/// Frequency rule for "scheduled today". Monthly reminders carry no day-of-month
/// and are included every day.
pub fn is_scheduled_on(reminder: &Reminder, weekday: Weekday) -> bool {
    if !reminder.is_active {
        return false;
    }
    match reminder.frequency {
        Frequency::Daily | Frequency::Monthly => true,
        Frequency::Weekly => reminder.runs_on(weekday),
        Frequency::AsNeeded => false,
    }
}

pub fn todays_reminders<'a>(reminders: &'a [Reminder], now: NaiveDateTime) -> Vec<&'a Reminder> {
    let weekday = now.weekday();
    reminders
        .iter()
        .filter(|reminder| is_scheduled_on(reminder, weekday))
        .collect()
}

/// Reminders whose `HH:MM` equals `now` truncated to the minute.
pub fn due_reminders<'a>(reminders: &'a [Reminder], now: NaiveDateTime) -> Vec<&'a Reminder> {
    let minute = now.format("%H:%M").to_string();
    todays_reminders(reminders, now)
        .into_iter()
        .filter(|reminder| reminder.time == minute)
        .collect()
}

/// `(medicine, HH:MM)` pairs whose dose time equals `now` to the minute.
/// Dose times are normalised first, so `8:00` matches at `08:00`.
pub fn due_doses(medicines: &[Medicine], now: NaiveDateTime) -> Vec<(&Medicine, String)> {
    let minute = now.format("%H:%M").to_string();
    medicines
        .iter()
        .filter(|medicine| medicine.is_active)
        .flat_map(|medicine| {
            medicine
                .times
                .iter()
                .filter_map(|time| normalize_time(time).ok())
                .filter(|time| *time == minute)
                .map(move |time| (medicine, time))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::ReminderRequest;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        // 2025-06-01 is a Sunday.
        NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn reminder(time: &str, frequency: Frequency) -> Reminder {
        Reminder::from_request(ReminderRequest::new("r", time, frequency)).unwrap()
    }

    #[test]
    fn daily_reminders_are_due_every_weekday() {
        let reminders = vec![reminder("09:00", Frequency::Daily)];
        for day in 1..=7 {
            assert_eq!(todays_reminders(&reminders, at(day, 9, 0, 0)).len(), 1);
        }
    }

    #[test]
    fn weekly_requires_matching_weekday() {
        let mut weekly = reminder("09:00", Frequency::Weekly);
        weekly.days_of_week = Some([1, 3].into_iter().collect());
        let reminders = vec![weekly];
        assert!(due_reminders(&reminders, at(1, 9, 0, 0)).is_empty());
        assert_eq!(due_reminders(&reminders, at(2, 9, 0, 0)).len(), 1);
        assert_eq!(due_reminders(&reminders, at(4, 9, 0, 0)).len(), 1);

        let mut no_days = reminder("09:00", Frequency::Weekly);
        no_days.days_of_week = None;
        assert!(!is_scheduled_on(&no_days, Weekday::Mon));
    }

    #[test]
    fn as_needed_and_inactive_never_due() {
        let mut inactive = reminder("09:00", Frequency::Daily);
        inactive.is_active = false;
        let reminders = vec![reminder("09:00", Frequency::AsNeeded), inactive];
        assert!(due_reminders(&reminders, at(3, 9, 0, 0)).is_empty());
    }

    #[test]
    fn monthly_is_included_every_day() {
        let reminders = vec![reminder("07:15", Frequency::Monthly)];
        assert_eq!(due_reminders(&reminders, at(5, 7, 15, 59)).len(), 1);
    }

    #[test]
    fn exact_minute_match_only() {
        let reminders = vec![
            reminder("09:00", Frequency::Daily),
            reminder("09:00", Frequency::Daily),
            reminder("09:01", Frequency::Daily),
        ];
        assert!(due_reminders(&reminders, at(2, 8, 59, 59)).is_empty());
        assert_eq!(due_reminders(&reminders, at(2, 9, 0, 30)).len(), 2);
        assert_eq!(due_reminders(&reminders, at(2, 9, 1, 0)).len(), 1);
    }

    #[test]
    fn dose_times_expand_per_medicine() {
        let medicines = vec![
            Medicine {
                id: "m1".into(),
                name: "Aspirin".into(),
                dosage: "100mg".into(),
                current_stock: 10,
                doses_per_day: 2,
                times: vec!["08:00".into(), "20:00".into()],
                is_active: true,
            },
            Medicine {
                id: "m2".into(),
                name: "Paused".into(),
                dosage: String::new(),
                current_stock: 10,
                doses_per_day: 1,
                times: vec!["08:00".into()],
                is_active: false,
            },
        ];
        let due = due_doses(&medicines, at(2, 8, 0, 10));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0.id, "m1");
        assert_eq!(due[0].1, "08:00");
    }

    #[test]
    fn dose_times_are_normalised_before_matching() {
        let medicines = vec![Medicine {
            id: "m1".into(),
            name: "Vitamin D".into(),
            dosage: String::new(),
            current_stock: 10,
            doses_per_day: 2,
            times: vec!["8:00".into(), "not a time".into()],
            is_active: true,
        }];
        let due = due_doses(&medicines, at(2, 8, 0, 0));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, "08:00");
        assert!(due_doses(&medicines, at(2, 20, 0, 0)).is_empty());
    }
}
