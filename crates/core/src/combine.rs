#![forbid(unsafe_code)]

//! Merging of per-shard engine CSV output.
//!
//! Every shard CSV has a free-text first line, a column header line whose first column is `PMC`,
//! then one data row per line. Both merge modes emit the caller's header line, the column header
//! of the first shard, then data rows.

use crate::filename::{DetectorTag, FilenameError, parse_region_row_name};
use crate::worklist::RegionPoints;
use std::collections::{BTreeMap, HashSet};

pub const RESULT_SUFFIX: &str = "_result.csv";

/// `<listName>_result.csv`
pub fn result_file_name(list_name: &str) -> String {
    format!("{list_name}{RESULT_SUFFIX}")
}

/// Engine output for one shard, read by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardCsv {
    pub list_name: String,
    pub text: String,
}

impl ShardCsv {
    pub fn new(list_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            list_name: list_name.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    #[error("no shard outputs to combine")]
    NoShards,
    #[error("{list}: missing column header line")]
    MissingHeader { list: String },
    #[error("{list}: PMC is not the first column")]
    PmcNotFirst { list: String },
    #[error("{list}: invalid PMC {value:?} at line {line}")]
    InvalidPmc {
        list: String,
        value: String,
        line: usize,
    },
    #[error("{list}: no filename column to match regions by")]
    NoFilenameColumn { list: String },
    #[error("{list}: line {line} has {found} columns, expected {expected}")]
    ColumnCount {
        list: String,
        line: usize,
        found: usize,
        expected: usize,
    },
    #[error("{list}: line {line}: {source}")]
    Filename {
        list: String,
        line: usize,
        #[source]
        source: FilenameError,
    },
    #[error("{list}: unexpected region {region:?} at line {line}")]
    UnknownRegion {
        list: String,
        region: String,
        line: usize,
    },
    #[error("{list}: PMC {pmc} at line {line} is not a member of region {region:?}")]
    NotInRegion {
        list: String,
        pmc: i32,
        region: String,
        line: usize,
    },
}

struct ParsedShard<'a> {
    columns: &'a str,
    /// (1-based line number, trimmed row)
    rows: Vec<(usize, &'a str)>,
}

fn parse_shard(shard: &ShardCsv) -> Result<ParsedShard<'_>, CombineError> {
    let mut lines = shard.text.split('\n').map(|line| line.trim_end_matches('\r'));
    let _free_text = lines.next();
    let columns = lines
        .next()
        .map(str::trim)
        .ok_or_else(|| CombineError::MissingHeader {
            list: shard.list_name.clone(),
        })?;
    let first_column = columns.split(',').next().unwrap_or_default().trim();
    if first_column != "PMC" {
        return Err(CombineError::PmcNotFirst {
            list: shard.list_name.clone(),
        });
    }

    let rows = lines
        .enumerate()
        .map(|(idx, row)| (idx + 3, row.trim()))
        .filter(|(_, row)| !row.is_empty())
        .collect();
    Ok(ParsedShard { columns, rows })
}

/// Splits a data row into its PMC and the remainder (starting at the first comma, if any).
fn split_pmc<'a>(list: &str, line: usize, row: &'a str) -> Result<(i32, &'a str), CombineError> {
    let (value, rest) = match row.find(',') {
        Some(pos) => row.split_at(pos),
        None => (row, ""),
    };
    let pmc = value
        .trim()
        .parse::<i32>()
        .map_err(|_| CombineError::InvalidPmc {
            list: list.to_string(),
            value: value.to_string(),
            line,
        })?;
    Ok((pmc, rest))
}

fn prolog(header: &str, columns: &str) -> String {
    let mut out = String::new();
    out.push_str(header.trim_end());
    out.push('\n');
    out.push_str(columns);
    out.push('\n');
    out
}

/// Merges shard outputs into one CSV ordered by ascending PMC. Rows sharing a PMC stay in the
/// order the shards were given.
pub fn combine_shards(header: &str, shards: &[ShardCsv]) -> Result<String, CombineError> {
    let first = shards.first().ok_or(CombineError::NoShards)?;
    let columns = parse_shard(first)?.columns;

    let mut rows_by_pmc: BTreeMap<i32, Vec<&str>> = BTreeMap::new();
    for shard in shards {
        let parsed = parse_shard(shard)?;
        for (line, row) in parsed.rows {
            let (pmc, _) = split_pmc(&shard.list_name, line, row)?;
            rows_by_pmc.entry(pmc).or_default().push(row);
        }
    }

    let mut out = prolog(header, columns);
    for row in rows_by_pmc.values().flatten() {
        out.push_str(row);
        out.push('\n');
    }
    Ok(out)
}

/// Expands one row per region into one row per member point, substituting the PMC column.
///
/// A point belonging to several regions takes its row from the first listed region only, so
/// each detector carries at most one row per PMC.
pub fn expand_regions(
    header: &str,
    shard: &ShardCsv,
    regions: &[RegionPoints],
) -> Result<String, CombineError> {
    let list = shard.list_name.as_str();
    let parsed = parse_shard(shard)?;
    let column_names: Vec<&str> = parsed.columns.split(',').map(str::trim).collect();
    let filename_idx = column_names
        .iter()
        .position(|name| *name == "filename")
        .ok_or_else(|| CombineError::NoFilenameColumn {
            list: list.to_string(),
        })?;

    let mut per_region: Vec<Vec<(DetectorTag, &str)>> = vec![Vec::new(); regions.len()];
    for (line, row) in parsed.rows {
        let values: Vec<&str> = row.split(',').collect();
        if values.len() != column_names.len() {
            return Err(CombineError::ColumnCount {
                list: list.to_string(),
                line,
                found: values.len(),
                expected: column_names.len(),
            });
        }

        let (detector, region_id) =
            parse_region_row_name(values[filename_idx].trim()).map_err(|source| {
                CombineError::Filename {
                    list: list.to_string(),
                    line,
                    source,
                }
            })?;
        let region_idx = regions
            .iter()
            .position(|region| region.id == region_id)
            .ok_or_else(|| CombineError::UnknownRegion {
                list: list.to_string(),
                region: region_id.clone(),
                line,
            })?;

        let (pmc, rest) = split_pmc(list, line, row)?;
        if !regions[region_idx].points.contains(&pmc) {
            return Err(CombineError::NotInRegion {
                list: list.to_string(),
                pmc,
                region: region_id,
                line,
            });
        }
        per_region[region_idx].push((detector, rest));
    }

    let mut out = prolog(header, parsed.columns);
    let mut emitted: HashSet<(DetectorTag, i32)> = HashSet::new();
    for (region, mut rows) in regions.iter().zip(per_region) {
        rows.sort_by_key(|(detector, _)| *detector);
        for (detector, rest) in rows {
            for point in &region.points {
                if !emitted.insert((detector, *point)) {
                    continue;
                }
                out.push_str(&point.to_string());
                out.push_str(rest);
                out.push('\n');
            }
        }
    }
    Ok(out)
}
