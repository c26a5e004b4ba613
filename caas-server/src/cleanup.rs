//! Scheduled directory sweeps
//!
//! The metadata base is cleaned monthly (1st, 03:00 local) and the
//! workdir base weekly (Saturday, 03:00 local); either sweep can be
//! disabled in the configuration.

use crate::state::AppState;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Weekday};
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Spawns the enabled sweep loops.
pub fn spawn_sweeps(state: &AppState) -> Vec<JoinHandle<()>> {
    let config = state.config.clone();
    let mut handles = Vec::new();

    if !config.clean_metadata_dir_disabled {
        handles.push(spawn_sweep(
            "metadata",
            config.metadata_dir.clone(),
            next_monthly,
        ));
    }
    if !config.clean_workdir_disabled {
        handles.push(spawn_sweep("workdir", config.workdir.clone(), next_weekly));
    }

    handles
}

fn spawn_sweep(
    label: &'static str,
    dir: PathBuf,
    next_fire: fn(NaiveDateTime) -> NaiveDateTime,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let target = next_fire(Local::now().naive_local());
            tokio::time::sleep(duration_until(target)).await;

            info!("[sweep] cleaning {label} dir: {}", dir.display());
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("[sweep] failed to clean {label} dir: {e}");
            }
        }
    })
}

fn duration_until(target: NaiveDateTime) -> std::time::Duration {
    let now = Local::now().naive_local();
    (target - now).to_std().unwrap_or_default()
}

/// The next 1st-of-month 03:00 strictly after `now`.
fn next_monthly(now: NaiveDateTime) -> NaiveDateTime {
    let date = now.date();
    let this_month = date
        .with_day(1)
        .expect("day 1 is always valid")
        .and_hms_opt(3, 0, 0)
        .expect("03:00:00 is always valid");
    if this_month > now {
        return this_month;
    }

    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("first of month is always valid")
        .and_hms_opt(3, 0, 0)
        .expect("03:00:00 is always valid")
}

/// The next Saturday 03:00 strictly after `now`.
fn next_weekly(now: NaiveDateTime) -> NaiveDateTime {
    let date = now.date();
    for offset in 0..=7 {
        let day = date + chrono::Duration::days(offset);
        if day.weekday() == Weekday::Sat {
            let at = day
                .and_hms_opt(3, 0, 0)
                .expect("03:00:00 is always valid");
            if at > now {
                return at;
            }
        }
    }
    unreachable!("a Saturday occurs within any 8-day window")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_next_monthly_before_fire_time() {
        assert_eq!(next_monthly(at(2026, 3, 1, 2, 59)), at(2026, 3, 1, 3, 0));
    }

    #[test]
    fn test_next_monthly_rolls_to_next_month() {
        assert_eq!(next_monthly(at(2026, 3, 1, 3, 0)), at(2026, 4, 1, 3, 0));
        assert_eq!(next_monthly(at(2026, 3, 15, 12, 0)), at(2026, 4, 1, 3, 0));
    }

    #[test]
    fn test_next_monthly_rolls_over_year() {
        assert_eq!(next_monthly(at(2026, 12, 20, 0, 0)), at(2027, 1, 1, 3, 0));
    }

    #[test]
    fn test_next_weekly_finds_saturday() {
        // 2026-03-02 is a Monday; the following Saturday is 03-07.
        assert_eq!(next_weekly(at(2026, 3, 2, 12, 0)), at(2026, 3, 7, 3, 0));
    }

    #[test]
    fn test_next_weekly_same_day_before_and_after_fire() {
        // 2026-03-07 is a Saturday.
        assert_eq!(next_weekly(at(2026, 3, 7, 2, 0)), at(2026, 3, 7, 3, 0));
        assert_eq!(next_weekly(at(2026, 3, 7, 3, 0)), at(2026, 3, 14, 3, 0));
    }
}
