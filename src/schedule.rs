//! Manual-window schedule evaluation

use chrono::{NaiveTime, Timelike};

use crate::models::ScheduleWindow;

/// Whether `now` falls inside the daily window
///
/// Equal bounds mean the window covers the whole day; a start later than
/// the end means the window spans midnight. The end bound is exclusive.
pub fn is_active_now(window: ScheduleWindow, now: NaiveTime) -> bool {
    let m = now.hour() * 60 + now.minute();
    let s = u32::from(window.start.minutes_since_midnight());
    let e = u32::from(window.end.minutes_since_midnight());

    if s == e {
        true
    } else if s < e {
        s <= m && m < e
    } else {
        m >= s || m < e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClockTime;

    fn window(sh: u8, sm: u8, eh: u8, em: u8) -> ScheduleWindow {
        ScheduleWindow {
            start: ClockTime::new(sh, sm).unwrap(),
            end: ClockTime::new(eh, em).unwrap(),
        }
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_equal_bounds_always_active() {
        let w = window(8, 15, 8, 15);
        for minute in 0..(24 * 60) {
            assert!(is_active_now(w, at(minute / 60, minute % 60)), "minute {}", minute);
        }
    }

    #[test]
    fn test_same_day_window() {
        let w = window(9, 0, 17, 30);
        assert!(!is_active_now(w, at(8, 59)));
        assert!(is_active_now(w, at(9, 0)));
        assert!(is_active_now(w, at(12, 0)));
        assert!(is_active_now(w, at(17, 29)));
        assert!(!is_active_now(w, at(17, 30)));
        assert!(!is_active_now(w, at(23, 0)));
    }

    #[test]
    fn test_midnight_spanning_window() {
        let w = window(21, 0, 7, 0);
        assert!(is_active_now(w, at(21, 0)));
        assert!(is_active_now(w, at(23, 59)));
        assert!(is_active_now(w, at(0, 0)));
        assert!(is_active_now(w, at(6, 59)));
        assert!(!is_active_now(w, at(7, 0)));
        assert!(!is_active_now(w, at(12, 0)));
        assert!(!is_active_now(w, at(20, 59)));
    }

    #[test]
    fn test_seconds_are_ignored() {
        let w = window(9, 0, 9, 1);
        assert!(is_active_now(w, NaiveTime::from_hms_opt(9, 0, 59).unwrap()));
        assert!(!is_active_now(w, NaiveTime::from_hms_opt(9, 1, 0).unwrap()));
    }

    #[test]
    fn test_exhaustive_partition_for_spanning_window() {
        let w = window(20, 30, 5, 45);
        let start = 20 * 60 + 30;
        let end = 5 * 60 + 45;
        for minute in 0..(24 * 60) {
            let expected = minute >= start || minute < end;
            assert_eq!(is_active_now(w, at(minute / 60, minute % 60)), expected, "minute {}", minute);
        }
    }
}
