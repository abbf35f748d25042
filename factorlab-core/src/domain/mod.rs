//! Domain types shared by every layer: bars, data kinds, time-indexed frames, signals.

pub mod bar;
pub mod frame;
pub mod kind;
pub mod signal;

pub use bar::{Bar, CANONICAL_FIELDS, CANONICAL_SLOT_COUNT};
pub use frame::{Frame, FrameError, TIME_FORMAT};
pub use kind::{DataKind, UnknownDataKind};
pub use signal::{Signal, SignalAction, SignalDraft};

/// Symbol type alias
pub type Symbol = String;
