#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const SOURCE_FILE_META: &str = "SOURCEFILE";

/// Location index of a dataset: what the orchestrator needs to know without reading the
/// engine's binary dataset file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub locations: Vec<Location>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub pmc: i32,
    #[serde(default)]
    pub beam: Option<BeamPosition>,
    #[serde(default)]
    pub spectra: Vec<SpectrumRef>,
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumRef {
    pub detector: String,
    pub read_type: String,
}

impl Location {
    fn has_read(&self, read_type: &str) -> bool {
        self.spectra.iter().any(|s| s.read_type == read_type)
    }

    pub fn has_quantifiable_spectra(&self) -> bool {
        self.has_read("Normal") || self.has_read("Dwell")
    }
}

impl Dataset {
    /// Location index -> PMC, for locations carrying Normal or Dwell spectra.
    pub fn location_pmcs(&self) -> HashMap<usize, i32> {
        self.locations
            .iter()
            .enumerate()
            .filter(|(_, loc)| loc.has_quantifiable_spectra())
            .map(|(idx, loc)| (idx, loc.pmc))
            .collect()
    }

    /// PMCs with Normal or Dwell spectra, in dataset order.
    pub fn quantifiable_pmcs(&self) -> Vec<i32> {
        self.locations
            .iter()
            .filter(|loc| loc.has_quantifiable_spectra())
            .map(|loc| loc.pmc)
            .collect()
    }

    pub fn dwell_pmcs(&self) -> HashSet<i32> {
        self.locations
            .iter()
            .filter(|loc| loc.has_read("Dwell"))
            .map(|loc| loc.pmc)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookups_skip_locations_without_spectra() {
        let dataset: Dataset = serde_json::from_value(json!({
            "datasetId": "ds1",
            "locations": [
                { "pmc": 10, "spectra": [{ "detector": "A", "readType": "Normal" }] },
                { "pmc": 11 },
                { "pmc": 12, "spectra": [
                    { "detector": "A", "readType": "Normal" },
                    { "detector": "A", "readType": "Dwell" }
                ] },
                { "pmc": 13, "spectra": [{ "detector": "A", "readType": "BulkSum" }] }
            ]
        }))
        .expect("dataset json");

        let lookup = dataset.location_pmcs();
        assert_eq!(lookup.get(&0), Some(&10));
        assert_eq!(lookup.get(&1), None);
        assert_eq!(lookup.get(&2), Some(&12));
        assert_eq!(lookup.get(&3), None);
        assert_eq!(dataset.quantifiable_pmcs(), vec![10, 12]);
        assert_eq!(dataset.dwell_pmcs(), HashSet::from([12]));
    }
}
