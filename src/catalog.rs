use chrono::NaiveTime;
use serde::Serialize;

use crate::limits::MAX_SLOTS;

/// Position of a slot in the catalog. Bookings and overrides refer to slots by index.
pub type SlotIndex = u16;

/// A fixed time-of-day window. Half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub label: String,
}

impl Slot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        let label = format!("{}-{}", start.format("%H:%M"), end.format("%H:%M"));
        Self { start, end, label }
    }

    pub fn with_label(start: NaiveTime, end: NaiveTime, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }
}

/// Ordered list of slots shared by every therapist on every date.
/// Validated once at construction and immutable afterwards.
#[derive(Debug, Clone)]
pub struct SlotCatalog {
    slots: Vec<Slot>,
}

impl SlotCatalog {
    pub fn new(slots: Vec<Slot>) -> Result<Self, CatalogError> {
        if slots.is_empty() {
            return Err(CatalogError::Empty);
        }
        if slots.len() > MAX_SLOTS {
            return Err(CatalogError::TooManySlots(slots.len()));
        }
        for (i, slot) in slots.iter().enumerate() {
            if slot.start >= slot.end {
                return Err(CatalogError::EmptyWindow(slot.label.clone()));
            }
            if slot.label.trim().is_empty() {
                return Err(CatalogError::Parse(format!("slot {i} has an empty label")));
            }
            if i > 0 {
                let prev = &slots[i - 1];
                if slot.start < prev.end {
                    return Err(CatalogError::Overlap(prev.label.clone(), slot.label.clone()));
                }
            }
            if slots[..i].iter().any(|s| s.label == slot.label) {
                return Err(CatalogError::DuplicateLabel(slot.label.clone()));
            }
        }
        Ok(Self { slots })
    }

    /// Parse a comma-separated list of `HH:MM-HH:MM` windows, e.g.
    /// `"08:00-09:30,09:30-11:00"`.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let mut slots = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (start, end) = part
                .split_once('-')
                .ok_or_else(|| CatalogError::Parse(format!("expected HH:MM-HH:MM, got {part:?}")))?;
            let start = parse_time(start)?;
            let end = parse_time(end)?;
            slots.push(Slot::new(start, end));
        }
        Self::new(slots)
    }

    pub fn get(&self, index: SlotIndex) -> Option<&Slot> {
        self.slots.get(index as usize)
    }

    pub fn contains(&self, index: SlotIndex) -> bool {
        (index as usize) < self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (i as SlotIndex, s))
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, CatalogError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| CatalogError::Parse(format!("bad time {s:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum CatalogError {
    Empty,
    TooManySlots(usize),
    EmptyWindow(String),
    Overlap(String, String),
    DuplicateLabel(String),
    Parse(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Empty => write!(f, "slot catalog is empty"),
            CatalogError::TooManySlots(n) => {
                write!(f, "slot catalog has {n} slots, max is {MAX_SLOTS}")
            }
            CatalogError::EmptyWindow(label) => write!(f, "slot {label} ends before it starts"),
            CatalogError::Overlap(a, b) => write!(f, "slot {b} overlaps or precedes {a}"),
            CatalogError::DuplicateLabel(label) => write!(f, "duplicate slot label: {label}"),
            CatalogError::Parse(s) => write!(f, "parse error: {s}"),
        }
    }
}

impl std::error::Error for CatalogError {}
