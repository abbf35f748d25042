//! The canonical OHLCV record handed to the simulation engine.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Names of the five canonical fields, in slot order.
pub const CANONICAL_FIELDS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Number of canonical slots. Dynamic (factor) slots start here.
pub const CANONICAL_SLOT_COUNT: usize = CANONICAL_FIELDS.len();

/// OHLCV bar for a single symbol at a single timestamp.
///
/// Volume is kept as `f64` so a bar row can be read through the same slot
/// interface as factor values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Read a canonical field by slot index (0 = open .. 4 = volume).
    pub fn slot(&self, slot: usize) -> Option<f64> {
        match slot {
            0 => Some(self.open),
            1 => Some(self.high),
            2 => Some(self.low),
            3 => Some(self.close),
            4 => Some(self.volume),
            _ => None,
        }
    }

    /// Slot index of a canonical field name.
    pub fn canonical_slot(name: &str) -> Option<usize> {
        CANONICAL_FIELDS.iter().position(|f| *f == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar() -> Bar {
        Bar {
            time: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.0,
            volume: 1000.0,
        }
    }

    #[test]
    fn canonical_slots_follow_field_order() {
        let b = bar();
        for (i, name) in CANONICAL_FIELDS.iter().enumerate() {
            assert_eq!(Bar::canonical_slot(name), Some(i));
        }
        assert_eq!(b.slot(3), Some(101.0));
        assert_eq!(b.slot(4), Some(1000.0));
        assert_eq!(b.slot(5), None);
        assert_eq!(Bar::canonical_slot("ma_5"), None);
    }

    #[test]
    fn void_bar_detection() {
        let mut b = bar();
        assert!(!b.is_void());
        b.close = f64::NAN;
        assert!(b.is_void());
    }
}
