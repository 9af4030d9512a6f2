use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use mktx_core::{Cadence, ImportJobConfig};
use serde::Serialize;

use crate::error::SyncError;

/// Hour of day (UTC) at which recurring jobs become due.
pub const RUN_HOUR: u32 = 2;

fn at_run_hour(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(RUN_HOUR, 0, 0).map(|naive| naive.and_utc())
}

/// Next due instant after `from`, or `None` for manual jobs. Always strictly
/// later than `from`.
pub fn next_run_for(cadence: Cadence, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let day = from.date_naive();
    let next = match cadence {
        Cadence::Manual => return None,
        Cadence::Daily => day.checked_add_days(Days::new(1))?,
        Cadence::Weekly => day.checked_add_days(Days::new(7))?,
        Cadence::Monthly => day.with_day(1)?.checked_add_months(Months::new(1))?,
    };
    at_run_hour(next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Due,
    Running,
}

/// A recurring job that has never been scheduled is due immediately.
pub fn job_state(config: &ImportJobConfig, now: DateTime<Utc>, locks: &RunLocks) -> JobState {
    if locks.is_running(&config.id) {
        return JobState::Running;
    }
    if !config.enabled || config.cadence == Cadence::Manual {
        return JobState::Idle;
    }
    match config.next_run {
        Some(next) if now < next => JobState::Idle,
        _ => JobState::Due,
    }
}

/// Run-in-progress markers keyed by job id. Cloning shares the markers.
#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    running: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashSet<String>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `job_id` as running. Fails without side effects if it already is.
    pub fn try_acquire(&self, job_id: &str) -> Result<RunGuard, SyncError> {
        if !self.guard().insert(job_id.to_string()) {
            return Err(SyncError::ConcurrencyViolation(job_id.to_string()));
        }
        Ok(RunGuard {
            locks: self.clone(),
            job_id: job_id.to_string(),
        })
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.guard().contains(job_id)
    }
}

/// Clears the run marker when dropped.
#[derive(Debug)]
pub struct RunGuard {
    locks: RunLocks,
    job_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks.guard().remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use mktx_core::FilterSpec;

    fn instant(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn job(cadence: Cadence) -> ImportJobConfig {
        ImportJobConfig {
            id: "tlv".into(),
            name: "Tel Aviv".into(),
            enabled: true,
            cadence,
            filter: FilterSpec::default(),
            lookback_months: 6,
            auto_approve: false,
            notify: false,
            last_run: None,
            next_run: None,
            regions: vec![],
        }
    }

    #[test]
    fn next_run_is_strictly_after_from() {
        let froms = [
            instant(2024, 1, 31, 23, 59),
            instant(2024, 2, 29, 1, 0),
            instant(2024, 12, 31, 2, 0),
            instant(2024, 6, 15, 0, 0),
        ];
        for from in froms {
            for cadence in [Cadence::Daily, Cadence::Weekly, Cadence::Monthly] {
                let next = next_run_for(cadence, from).unwrap();
                assert!(next > from, "{cadence:?} from {from} gave {next}");
                assert_eq!((next.hour(), next.minute()), (RUN_HOUR, 0));
            }
        }
    }

    #[test]
    fn each_cadence_advances_by_exactly_one_unit() {
        let from = instant(2024, 1, 31, 15, 30);
        let day = from.date_naive();
        let daily = next_run_for(Cadence::Daily, from).unwrap().date_naive();
        let weekly = next_run_for(Cadence::Weekly, from).unwrap().date_naive();
        let monthly = next_run_for(Cadence::Monthly, from).unwrap().date_naive();
        assert_eq!((daily - day).num_days(), 1);
        assert_eq!((weekly - day).num_days(), 7);
        assert_eq!(monthly, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(
            next_run_for(Cadence::Monthly, instant(2024, 12, 1, 0, 0)),
            Some(instant(2025, 1, 1, 2, 0))
        );
    }

    #[test]
    fn manual_cadence_has_no_next_run() {
        assert_eq!(next_run_for(Cadence::Manual, instant(2024, 5, 5, 5, 5)), None);
    }

    #[test]
    fn job_state_transitions() {
        let locks = RunLocks::new();
        let now = instant(2024, 6, 15, 3, 0);

        assert_eq!(job_state(&job(Cadence::Manual), now, &locks), JobState::Idle);

        let mut disabled = job(Cadence::Daily);
        disabled.enabled = false;
        assert_eq!(job_state(&disabled, now, &locks), JobState::Idle);

        let mut daily = job(Cadence::Daily);
        assert_eq!(job_state(&daily, now, &locks), JobState::Due);
        daily.next_run = Some(instant(2024, 6, 16, 2, 0));
        assert_eq!(job_state(&daily, now, &locks), JobState::Idle);
        daily.next_run = Some(now);
        assert_eq!(job_state(&daily, now, &locks), JobState::Due);

        let _guard = locks.try_acquire("tlv").unwrap();
        assert_eq!(job_state(&daily, now, &locks), JobState::Running);
    }

    #[test]
    fn second_acquire_is_rejected_until_guard_drops() {
        let locks = RunLocks::new();
        let guard = locks.try_acquire("job-a").unwrap();
        assert!(matches!(
            locks.try_acquire("job-a"),
            Err(SyncError::ConcurrencyViolation(id)) if id == "job-a"
        ));
        assert!(locks.clone().try_acquire("job-b").is_ok());
        drop(guard);
        assert!(!locks.is_running("job-a"));
        assert!(locks.try_acquire("job-a").is_ok());
    }
}
