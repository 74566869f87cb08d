use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::summary::SummaryStatistics;

/// Kind of chemical equipment.
///
/// The set is open: any type the CSV names that is not one of the known
/// kinds is kept verbatim as `Other`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EquipmentType {
    Pump,
    Compressor,
    Valve,
    HeatExchanger,
    Reactor,
    Condenser,
    Other(String),
}

impl EquipmentType {
    /// Parse a type cell, matching known kinds case-insensitively and
    /// ignoring inner whitespace ("heat exchanger" == "HeatExchanger").
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let folded: String = trimmed
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match folded.as_str() {
            "pump" => EquipmentType::Pump,
            "compressor" => EquipmentType::Compressor,
            "valve" => EquipmentType::Valve,
            "heatexchanger" => EquipmentType::HeatExchanger,
            "reactor" => EquipmentType::Reactor,
            "condenser" => EquipmentType::Condenser,
            _ => EquipmentType::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EquipmentType::Pump => "Pump",
            EquipmentType::Compressor => "Compressor",
            EquipmentType::Valve => "Valve",
            EquipmentType::HeatExchanger => "HeatExchanger",
            EquipmentType::Reactor => "Reactor",
            EquipmentType::Condenser => "Condenser",
            EquipmentType::Other(name) => name,
        }
    }
}

impl fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EquipmentType {
    fn from(value: String) -> Self {
        EquipmentType::parse(&value)
    }
}

impl From<EquipmentType> for String {
    fn from(value: EquipmentType) -> Self {
        value.as_str().to_string()
    }
}

/// A validated CSV row that has not been assigned to a session yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquipmentDraft {
    pub name: String,
    pub equipment_type: EquipmentType,
    pub flowrate: f64,
    pub pressure: f64,
    pub temperature: f64,
}

/// A persisted equipment row, owned by exactly one upload session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub id: u64,
    pub session_id: u64,
    pub name: String,
    pub equipment_type: EquipmentType,
    pub flowrate: f64,
    pub pressure: f64,
    pub temperature: f64,
}

impl EquipmentRecord {
    pub fn from_draft(id: u64, session_id: u64, draft: EquipmentDraft) -> Self {
        EquipmentRecord {
            id,
            session_id,
            name: draft.name,
            equipment_type: draft.equipment_type,
            flowrate: draft.flowrate,
            pressure: draft.pressure,
            temperature: draft.temperature,
        }
    }
}

/// Metadata for one CSV upload.
///
/// Immutable once written; `summary` is the statistics frozen at upload time
/// and is what history listings show.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: u64,
    /// Username of the owner
    pub user_id: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub equipment_count: usize,
    pub summary: SummaryStatistics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_are_matched_loosely() {
        assert_eq!(EquipmentType::parse("pump"), EquipmentType::Pump);
        assert_eq!(EquipmentType::parse("  Compressor "), EquipmentType::Compressor);
        assert_eq!(
            EquipmentType::parse("Heat Exchanger"),
            EquipmentType::HeatExchanger
        );
        assert_eq!(EquipmentType::parse("REACTOR"), EquipmentType::Reactor);
    }

    #[test]
    fn unknown_types_are_kept_verbatim() {
        let parsed = EquipmentType::parse(" Mixer ");
        assert_eq!(parsed, EquipmentType::Other("Mixer".to_string()));
        assert_eq!(parsed.to_string(), "Mixer");
    }

    #[test]
    fn types_serialize_as_plain_strings() {
        let json = serde_json::to_string(&EquipmentType::HeatExchanger).unwrap();
        assert_eq!(json, "\"HeatExchanger\"");

        let back: EquipmentType = serde_json::from_str("\"Valve\"").unwrap();
        assert_eq!(back, EquipmentType::Valve);
    }
}
