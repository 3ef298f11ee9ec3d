#![forbid(unsafe_code)]

use pq_core::{
    ConvertOptions, RegionPoints, ShardCsv, combine_shards, convert_quant_csv, expand_regions,
};
use proptest::prelude::*;

fn shard_text(rows: &[(i32, u32)]) -> String {
    let mut text = String::from("engine header\nPMC,CaO_%\n");
    for (pmc, value) in rows {
        text.push_str(&format!("{pmc},{value}\n"));
    }
    text
}

proptest! {
    #[test]
    fn merged_rows_are_sorted_and_complete(
        shards in proptest::collection::vec(
            proptest::collection::vec((0i32..500, 0u32..1_000), 0..40),
            1..8,
        )
    ) {
        let inputs: Vec<ShardCsv> = shards
            .iter()
            .enumerate()
            .map(|(idx, rows)| ShardCsv::new(format!("node{idx:05}.pmcs"), shard_text(rows)))
            .collect();
        let merged = combine_shards("H", &inputs).expect("combine");

        let data: Vec<(i32, String)> = merged
            .lines()
            .skip(2)
            .map(|row| {
                let (pmc, rest) = row.split_once(',').expect("row");
                (pmc.parse().expect("pmc"), rest.to_string())
            })
            .collect();
        let total: usize = shards.iter().map(Vec::len).sum();
        prop_assert_eq!(data.len(), total);
        prop_assert!(data.windows(2).all(|w| w[0].0 <= w[1].0));

        // Stable: rows for the same PMC keep shard-then-row order.
        let mut expected: Vec<(i32, String)> = shards
            .iter()
            .flatten()
            .map(|(pmc, value)| (*pmc, value.to_string()))
            .collect();
        expected.sort_by_key(|(pmc, _)| *pmc);
        prop_assert_eq!(data, expected);
    }
}

fn region_shard(regions: &[RegionPoints]) -> ShardCsv {
    let mut text = String::from("engine header\nPMC,CaO_%,filename\n");
    for (idx, region) in regions.iter().enumerate() {
        for detector in ["A", "B"] {
            text.push_str(&format!("{},{idx}.5,Normal_{detector}_{}\n", region.points[0], region.id));
        }
    }
    ShardCsv::new("node00000.pmcs", text)
}

fn assert_strictly_ascending(regions: &[RegionPoints]) {
    let expanded = expand_regions("H", &region_shard(regions), regions).expect("expand");
    let converted = convert_quant_csv(&expanded, &ConvertOptions::default()).expect("convert");
    for set in &converted.quant.location_set {
        let pmcs: Vec<i32> = set.location.iter().map(|loc| loc.pmc).collect();
        assert!(
            pmcs.windows(2).all(|w| w[0] < w[1]),
            "detector {}: {pmcs:?}",
            set.detector
        );
    }
}

#[test]
fn overlapping_regions_keep_location_sets_strictly_ascending() {
    let regions = vec![
        RegionPoints {
            id: "roi1".to_string(),
            points: vec![7, 15, 388],
        },
        RegionPoints {
            id: "roi2".to_string(),
            points: vec![7, 450],
        },
    ];
    let expanded = expand_regions("H", &region_shard(&regions), &regions).expect("expand");
    let converted = convert_quant_csv(&expanded, &ConvertOptions::default()).expect("convert");
    let a = converted.quant.detector_set("A").expect("A set");
    let pmcs: Vec<i32> = a.location.iter().map(|loc| loc.pmc).collect();
    assert_eq!(pmcs, vec![7, 15, 388, 450]);
    assert_strictly_ascending(&regions);
}

proptest! {
    #[test]
    fn expanded_regions_never_repeat_a_point(
        members in proptest::collection::vec(
            proptest::collection::btree_set(0i32..60, 1..12),
            1..6,
        )
    ) {
        let regions: Vec<RegionPoints> = members
            .into_iter()
            .enumerate()
            .map(|(idx, points)| RegionPoints {
                id: format!("roi{idx}"),
                points: points.into_iter().collect(),
            })
            .collect();
        assert_strictly_ascending(&regions);
    }
}
