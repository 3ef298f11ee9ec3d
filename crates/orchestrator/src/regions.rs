#![forbid(unsafe_code)]

//! Region libraries: `UserContent/<owner>/<dataset>/ROI.json`, mapping region id to its
//! member location indexes.

use crate::QuantError;
use pq_core::RegionPoints;
use pq_core::dataset::Dataset;
use pq_core::ids::strip_shared_prefix;
use pq_storage::{ObjectStore, ObjectStoreExt, paths};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Covers every location with quantifiable spectra.
pub const ALL_POINTS_REGION: &str = "AllPoints";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionItem {
    pub name: String,
    #[serde(default)]
    pub location_indexes: Vec<usize>,
}

pub type RegionLibrary = BTreeMap<String, RegionItem>;

/// Empty when the owner has no library for this dataset.
pub fn read_library(
    store: &dyn ObjectStore,
    bucket: &str,
    owner: &str,
    dataset_id: &str,
) -> Result<RegionLibrary, QuantError> {
    let key = paths::region_library(owner, dataset_id);
    Ok(store.get_json_opt(bucket, &key)?.unwrap_or_default())
}

/// Region ids resolved to ascending, de-duplicated point ids. Ids with the `shared-` prefix
/// are looked up in the shared library, the rest in the user's.
pub fn resolve_regions(
    store: &dyn ObjectStore,
    bucket: &str,
    user_id: &str,
    dataset: &Dataset,
    dataset_id: &str,
    region_ids: &[String],
) -> Result<Vec<RegionPoints>, QuantError> {
    let user = read_library(store, bucket, user_id, dataset_id)?;
    let shared = read_library(store, bucket, paths::SHARED_OWNER, dataset_id)?;
    let pmc_by_index = dataset.location_pmcs();

    let mut out = Vec::with_capacity(region_ids.len());
    for requested in region_ids {
        if requested == ALL_POINTS_REGION {
            out.push(RegionPoints {
                id: ALL_POINTS_REGION.to_string(),
                points: sorted_unique(dataset.quantifiable_pmcs()),
            });
            continue;
        }
        let (id, is_shared) = strip_shared_prefix(requested);
        let library = if is_shared { &shared } else { &user };
        let item = library.get(id).ok_or_else(|| {
            QuantError::Validation(format!("unknown region {requested} for dataset {dataset_id}"))
        })?;
        // Indexes without Normal/Dwell spectra (housekeeping rows) are dropped.
        let points = item
            .location_indexes
            .iter()
            .filter_map(|idx| pmc_by_index.get(idx).copied())
            .collect();
        out.push(RegionPoints {
            id: id.to_string(),
            points: sorted_unique(points),
        });
    }
    Ok(out)
}

fn sorted_unique(mut points: Vec<i32>) -> Vec<i32> {
    points.sort_unstable();
    let mut seen = HashSet::new();
    points.retain(|p| seen.insert(*p));
    points
}
