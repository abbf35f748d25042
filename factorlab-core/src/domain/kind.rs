//! Data kinds served by providers and cached per symbol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What sort of series a `(symbol, kind)` key refers to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    #[default]
    Daily,
    Weekly,
    Minute,
    Fundamental,
}

impl DataKind {
    pub const ALL: [DataKind; 4] = [
        DataKind::Daily,
        DataKind::Weekly,
        DataKind::Minute,
        DataKind::Fundamental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Daily => "daily",
            DataKind::Weekly => "weekly",
            DataKind::Minute => "minute",
            DataKind::Fundamental => "fundamental",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown data kind: {0}")]
pub struct UnknownDataKind(pub String);

impl FromStr for DataKind {
    type Err = UnknownDataKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownDataKind(s.to_string()))
    }
}
