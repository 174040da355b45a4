use chrono::NaiveDate;

use crate::catalog::{Slot, SlotCatalog};
use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_slot(catalog: &SlotCatalog, slot: SlotIndex) -> Result<&Slot, EngineError> {
    catalog
        .get(slot)
        .ok_or_else(|| EngineError::Validation(format!("unknown slot {slot}")))
}

/// Trim and check client fields. Returns the cleaned copy that gets stored.
pub(crate) fn validate_client(client: &ClientInfo) -> Result<ClientInfo, EngineError> {
    let name = client.name.trim();
    let phone = client.phone.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("client name is required".into()));
    }
    if phone.is_empty() {
        return Err(EngineError::Validation("client phone is required".into()));
    }
    if name.len() > MAX_CLIENT_NAME_LEN {
        return Err(EngineError::LimitExceeded("client name too long"));
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("client phone too long"));
    }
    Ok(ClientInfo {
        name: name.to_string(),
        phone: phone.to_string(),
    })
}

pub(crate) fn validate_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("therapist name is required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("therapist name too long"));
    }
    Ok(name.to_string())
}

/// Whether `(date, slot)` can take a new booking. Caller holds the write lock,
/// so a passing check stays true until the caller releases it.
pub(crate) fn check_slot_free(
    ts: &TherapistState,
    date: NaiveDate,
    slot: SlotIndex,
) -> Result<(), EngineError> {
    if ts.is_off(date) {
        return Err(EngineError::TherapistOff {
            therapist_id: ts.id,
            date,
        });
    }
    if ts.is_suppressed(date, slot) {
        return Err(EngineError::SlotSuppressed {
            therapist_id: ts.id,
            date,
            slot,
        });
    }
    if let Some(holder) = ts.holder(date, slot) {
        return Err(EngineError::SlotTaken(holder.id));
    }
    Ok(())
}
