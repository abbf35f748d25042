//! Trading signals emitted by strategy logic during a simulation step.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            other => Err(format!("unknown signal action: {other}")),
        }
    }
}

/// A decision made inside one step, before it is bound to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDraft {
    pub symbol: String,
    pub action: SignalAction,
    pub price: f64,
    pub strength: f64,
    pub message: String,
    pub time: NaiveDateTime,
}

/// A persisted signal. Immutable once written; always references a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub run_id: String,
    pub symbol: String,
    pub action: SignalAction,
    pub price: f64,
    pub strength: f64,
    pub message: String,
    pub time: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_text_matches_serde() {
        assert_eq!("sell".parse::<SignalAction>(), Ok(SignalAction::Sell));
        assert!("hold".parse::<SignalAction>().is_err());
        assert_eq!(serde_json::to_string(&SignalAction::Buy).unwrap(), "\"buy\"");
        assert_eq!(SignalAction::Buy.to_string(), SignalAction::Buy.as_str());
    }
}
