//! A prepared DataGroup in the shape the engine consumes.
//!
//! Each row is a canonical `Bar` plus an ordered list of dynamic values.
//! The feed carries an explicit `name -> slot` map: canonical fields occupy
//! slots 0..5, dynamic (factor) fields follow in declaration order. Reading a
//! factor value inside the loop goes through this map and nothing else.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::domain::{Bar, CANONICAL_FIELDS, CANONICAL_SLOT_COUNT};

#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub bar: Bar,
    pub dynamic: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineFeed {
    name: String,
    symbol: String,
    weight: f64,
    dynamic_fields: Vec<String>,
    slots: BTreeMap<String, usize>,
    rows: Vec<FeedRow>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("dynamic field '{0}' collides with another field")]
    DuplicateField(String),

    #[error("row {row} carries {actual} dynamic values, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

impl EngineFeed {
    /// Assemble a feed. Every row must carry one value per dynamic field.
    pub fn new(
        name: impl Into<String>,
        symbol: impl Into<String>,
        weight: f64,
        dynamic_fields: Vec<String>,
        rows: Vec<FeedRow>,
    ) -> Result<Self, FeedError> {
        let mut slots: BTreeMap<String, usize> = CANONICAL_FIELDS
            .iter()
            .enumerate()
            .map(|(i, f)| (f.to_string(), i))
            .collect();
        for (i, field) in dynamic_fields.iter().enumerate() {
            if slots.insert(field.clone(), CANONICAL_SLOT_COUNT + i).is_some() {
                return Err(FeedError::DuplicateField(field.clone()));
            }
        }
        if let Some((row, r)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.dynamic.len() != dynamic_fields.len())
        {
            return Err(FeedError::RowWidth {
                row,
                expected: dynamic_fields.len(),
                actual: r.dynamic.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            symbol: symbol.into(),
            weight,
            dynamic_fields,
            slots,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[FeedRow] {
        &self.rows
    }

    pub fn bar(&self, row: usize) -> Option<&Bar> {
        self.rows.get(row).map(|r| &r.bar)
    }

    pub fn time(&self, row: usize) -> Option<NaiveDateTime> {
        self.bar(row).map(|b| b.time)
    }

    /// Dynamic field names in slot order.
    pub fn dynamic_fields(&self) -> &[String] {
        &self.dynamic_fields
    }

    /// The complete `name -> slot` map.
    pub fn slot_map(&self) -> &BTreeMap<String, usize> {
        &self.slots
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    /// Value at `(row, slot)`.
    pub fn value(&self, row: usize, slot: usize) -> Option<f64> {
        let r = self.rows.get(row)?;
        if slot < CANONICAL_SLOT_COUNT {
            r.bar.slot(slot)
        } else {
            r.dynamic.get(slot - CANONICAL_SLOT_COUNT).copied()
        }
    }

    pub fn field(&self, row: usize, name: &str) -> Option<f64> {
        self.value(row, self.slot_of(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(close: f64, dynamic: Vec<f64>) -> FeedRow {
        FeedRow {
            bar: Bar {
                time: NaiveDate::from_ymd_opt(2024, 1, 2)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 10.0,
            },
            dynamic,
        }
    }

    #[test]
    fn dynamic_slots_follow_canonical() {
        let feed = EngineFeed::new(
            "g",
            "X",
            1.0,
            vec!["ma_5".into(), "ma_20".into()],
            vec![row(10.0, vec![9.5, 9.0])],
        )
        .unwrap();
        assert_eq!(feed.slot_of("close"), Some(3));
        assert_eq!(feed.slot_of("ma_5"), Some(5));
        assert_eq!(feed.slot_of("ma_20"), Some(6));
        assert_eq!(feed.value(0, 3), Some(10.0));
        assert_eq!(feed.field(0, "ma_20"), Some(9.0));
        assert_eq!(feed.field(0, "nope"), None);
        assert_eq!(feed.value(1, 3), None);
    }

    #[test]
    fn rejects_canonical_collision_and_ragged_rows() {
        assert_eq!(
            EngineFeed::new("g", "X", 1.0, vec!["close".into()], vec![]).unwrap_err(),
            FeedError::DuplicateField("close".into())
        );
        assert!(matches!(
            EngineFeed::new("g", "X", 1.0, vec!["a".into()], vec![row(1.0, vec![])]),
            Err(FeedError::RowWidth { row: 0, .. })
        ));
    }
}
