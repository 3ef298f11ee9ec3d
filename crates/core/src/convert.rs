#![forbid(unsafe_code)]

//! Merged engine CSV -> binary quantification artifact.

use crate::dataset::{Dataset, SOURCE_FILE_META};
use crate::filename::{DetectorTag, FilenameError, parse_spectrum_name};
use crate::quant_proto::{
    QuantDataItem, QuantDataType, QuantLocation, QuantLocationSet, Quantification,
};
use prost::Message;
use std::collections::{BTreeMap, HashMap, HashSet};

const PMC_COLUMN: &str = "PMC";
const SCLK_COLUMN: &str = "SCLK";
const RTT_COLUMN: &str = "RTT";
const FILENAME_COLUMN: &str = "filename";
const META_COLUMNS: [&str; 4] = [PMC_COLUMN, SCLK_COLUMN, RTT_COLUMN, FILENAME_COLUMN];
const ELEMENT_SUFFIX: &str = "_%";

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("failed to skip {0} lines before the CSV column header")]
    SkipHeader(usize),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("CSV has no column header")]
    NoHeader,
    #[error("expected at least 1 data row")]
    NoData,
    #[error("duplicate CSV column: {0}")]
    DuplicateColumn(String),
    #[error("CSV column missing: {0}")]
    MissingColumn(&'static str),
    #[error("{column} is not an int at row {row}: {value:?}")]
    NotInteger {
        column: String,
        value: String,
        row: usize,
    },
    #[error("failed to parse {value:?} as float or int in column {column}, row {row}")]
    NotNumeric {
        column: String,
        value: String,
        row: usize,
    },
    #[error("row {row}: {source}")]
    Filename {
        row: usize,
        #[source]
        source: FilenameError,
    },
    #[error("PMC matching failed: CSV does not contain X/Y/Z columns")]
    CoordinateColumnsMissing,
    #[error("row {row}: failed to read X/Y/Z coordinate for matching")]
    BadCoordinate { row: usize },
    #[error("dataset location {pmc} has no {SOURCE_FILE_META} metadata")]
    SourceFileMissing { pmc: i32 },
    #[error("dataset location {pmc} has a non-string {SOURCE_FILE_META}")]
    SourceFileNotString { pmc: i32 },
    #[error("failed to match {0:?} to a PMC in the dataset")]
    Unmatched(String),
    #[error("failed to decode quantification: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// How rows of a CSV without engine PMCs are matched to dataset locations.
#[derive(Clone, Copy, Debug)]
pub enum PmcMatch<'a> {
    /// Key by beam position formatted as `x,y,z` with two decimals.
    ByCoordinate(&'a Dataset),
    /// Key by the location's `SOURCEFILE` metadata against the `filename` column.
    ByFileName(&'a Dataset),
}

#[derive(Clone, Copy, Debug)]
pub struct ConvertOptions<'a> {
    /// Lines before the column header.
    pub header_row_idx: usize,
    pub detector_override: Option<DetectorTag>,
    /// With an A/B override, also copy every record into the opposite detector.
    pub duplicate_ab: bool,
    pub pmc_match: Option<PmcMatch<'a>>,
}

impl Default for ConvertOptions<'_> {
    fn default() -> Self {
        Self {
            header_row_idx: 1,
            detector_override: None,
            duplicate_ab: false,
            pmc_match: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConvertedQuant {
    pub quant: Quantification,
    /// Element columns (`<name>_%`) with the suffix stripped, in column order.
    pub elements: Vec<String>,
}

impl ConvertedQuant {
    pub fn encode(&self) -> Vec<u8> {
        self.quant.encode_to_vec()
    }
}

pub fn decode_quantification(bytes: &[u8]) -> Result<Quantification, ConvertError> {
    Ok(Quantification::decode(bytes)?)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|col| col == name)
    }
}

pub fn read_csv(data: &str, header_row_idx: usize) -> Result<CsvTable, ConvertError> {
    let mut body = data;
    for _ in 0..header_row_idx {
        let (_, rest) = body
            .split_once('\n')
            .ok_or(ConvertError::SkipHeader(header_row_idx))?;
        body = rest;
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut records = reader.records();
    let header = records
        .next()
        .transpose()?
        .ok_or(ConvertError::NoHeader)?
        .iter()
        .map(str::to_string)
        .collect();
    let mut rows = Vec::new();
    for record in records {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(CsvTable { header, rows })
}

fn xyz_key(x: f32, y: f32, z: f32) -> String {
    format!("{x:.2},{y:.2},{z:.2}")
}

fn build_match_lookup(mode: PmcMatch<'_>) -> Result<HashMap<String, i32>, ConvertError> {
    let mut lookup = HashMap::new();
    match mode {
        PmcMatch::ByCoordinate(dataset) => {
            for loc in &dataset.locations {
                if let Some(beam) = loc.beam {
                    lookup.insert(xyz_key(beam.x, beam.y, beam.z), loc.pmc);
                }
            }
        }
        PmcMatch::ByFileName(dataset) => {
            for loc in &dataset.locations {
                let value = loc
                    .meta
                    .get(SOURCE_FILE_META)
                    .ok_or(ConvertError::SourceFileMissing { pmc: loc.pmc })?;
                let name = value
                    .as_str()
                    .ok_or(ConvertError::SourceFileNotString { pmc: loc.pmc })?;
                lookup.insert(name.to_string(), loc.pmc);
            }
        }
    }
    Ok(lookup)
}

/// Fills (or appends) the PMC column by matching each row against the dataset.
pub fn match_pmcs(table: &mut CsvTable, mode: PmcMatch<'_>) -> Result<(), ConvertError> {
    let lookup = build_match_lookup(mode)?;

    let key = match mode {
        PmcMatch::ByCoordinate(_) => {
            match (table.column("X"), table.column("Y"), table.column("Z")) {
                (Some(x), Some(y), Some(z)) => MatchKey::Coordinate(x, y, z),
                _ => return Err(ConvertError::CoordinateColumnsMissing),
            }
        }
        PmcMatch::ByFileName(_) => MatchKey::FileName(
            table
                .column(FILENAME_COLUMN)
                .ok_or(ConvertError::MissingColumn(FILENAME_COLUMN))?,
        ),
    };

    let pmc_idx = match table.column(PMC_COLUMN) {
        Some(idx) => idx,
        None => {
            table.header.push(PMC_COLUMN.to_string());
            table.header.len() - 1
        }
    };

    for (row_idx, row) in table.rows.iter_mut().enumerate() {
        let value = key.value(row, row_idx)?;
        let pmc = lookup
            .get(&value)
            .ok_or_else(|| ConvertError::Unmatched(value.clone()))?;
        if pmc_idx == row.len() {
            row.push(pmc.to_string());
        } else if let Some(cell) = row.get_mut(pmc_idx) {
            *cell = pmc.to_string();
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum MatchKey {
    Coordinate(usize, usize, usize),
    FileName(usize),
}

impl MatchKey {
    fn value(self, row: &[String], row_idx: usize) -> Result<String, ConvertError> {
        match self {
            Self::Coordinate(x, y, z) => {
                let parse = |idx: usize| row.get(idx).and_then(|v| v.parse::<f32>().ok());
                match (parse(x), parse(y), parse(z)) {
                    (Some(x), Some(y), Some(z)) => Ok(xyz_key(x, y, z)),
                    _ => Err(ConvertError::BadCoordinate { row: row_idx }),
                }
            }
            Self::FileName(col) => Ok(row.get(col).cloned().unwrap_or_default()),
        }
    }
}

fn parse_float(value: &str) -> Option<f32> {
    let value = if value == "-nan" { "nan" } else { value };
    value.parse::<f32>().ok()
}

fn cell(row: &[String], col: usize) -> &str {
    row.get(col).map(String::as_str).unwrap_or_default()
}

fn infer_column_type(table: &CsvTable, col: usize) -> Result<QuantDataType, ConvertError> {
    if table.rows.iter().all(|row| cell(row, col).parse::<i32>().is_ok()) {
        return Ok(QuantDataType::Int);
    }
    for (row_idx, row) in table.rows.iter().enumerate() {
        if parse_float(cell(row, col)).is_none() {
            return Err(ConvertError::NotNumeric {
                column: table.header[col].clone(),
                value: cell(row, col).to_string(),
                row: row_idx,
            });
        }
    }
    Ok(QuantDataType::Float)
}

fn parse_meta_int(
    table: &CsvTable,
    row: &[String],
    row_idx: usize,
    col: Option<usize>,
) -> Result<Option<i32>, ConvertError> {
    let Some(col) = col else {
        return Ok(None);
    };
    let value = row.get(col).map(String::as_str).unwrap_or_default();
    value
        .parse::<i32>()
        .map(Some)
        .map_err(|_| ConvertError::NotInteger {
            column: table.header[col].clone(),
            value: value.to_string(),
            row: row_idx,
        })
}

pub fn elements_of(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .filter_map(|label| label.strip_suffix(ELEMENT_SUFFIX))
        .map(str::to_string)
        .collect()
}

pub fn convert_quant_csv(
    data: &str,
    options: &ConvertOptions<'_>,
) -> Result<ConvertedQuant, ConvertError> {
    let mut table = read_csv(data, options.header_row_idx)?;
    if let Some(mode) = options.pmc_match {
        match_pmcs(&mut table, mode)?;
    }
    convert_table(&table, options)
}

pub fn convert_table(
    table: &CsvTable,
    options: &ConvertOptions<'_>,
) -> Result<ConvertedQuant, ConvertError> {
    if table.rows.is_empty() {
        return Err(ConvertError::NoData);
    }

    let mut seen = HashSet::new();
    for col in &table.header {
        if !seen.insert(col.as_str()) {
            return Err(ConvertError::DuplicateColumn(col.clone()));
        }
    }

    let pmc_col = table
        .column(PMC_COLUMN)
        .ok_or(ConvertError::MissingColumn(PMC_COLUMN))?;
    let sclk_col = table.column(SCLK_COLUMN);
    let rtt_col = table.column(RTT_COLUMN);
    let filename_col = table.column(FILENAME_COLUMN);
    if options.detector_override.is_none() && filename_col.is_none() {
        return Err(ConvertError::MissingColumn(FILENAME_COLUMN));
    }

    let data_cols: Vec<usize> = (0..table.header.len())
        .filter(|&idx| !META_COLUMNS.contains(&table.header[idx].as_str()))
        .collect();
    let labels: Vec<String> = data_cols.iter().map(|&idx| table.header[idx].clone()).collect();
    let types = data_cols
        .iter()
        .map(|&idx| infer_column_type(table, idx))
        .collect::<Result<Vec<_>, _>>()?;

    let mut sets: BTreeMap<DetectorTag, Vec<QuantLocation>> = BTreeMap::new();
    for (row_idx, row) in table.rows.iter().enumerate() {
        let pmc = parse_meta_int(table, row, row_idx, Some(pmc_col))?.unwrap_or_default();
        let location = QuantLocation {
            pmc,
            rtt: parse_meta_int(table, row, row_idx, rtt_col)?,
            sclk: parse_meta_int(table, row, row_idx, sclk_col)?,
            values: data_cols
                .iter()
                .zip(&types)
                .map(|(&idx, kind)| data_item(row.get(idx).map(String::as_str), *kind))
                .collect(),
        };

        let detector = match (options.detector_override, filename_col) {
            (Some(tag), _) => tag,
            (None, Some(col)) => {
                let name = row.get(col).map(String::as_str).unwrap_or_default();
                parse_spectrum_name(name)
                    .map_err(|source| ConvertError::Filename {
                        row: row_idx,
                        source,
                    })?
                    .detector
            }
            (None, None) => return Err(ConvertError::MissingColumn(FILENAME_COLUMN)),
        };

        if options.detector_override.is_some() && options.duplicate_ab {
            if let Some(opposite) = detector.opposite() {
                sets.entry(opposite).or_default().push(location.clone());
            }
        }
        sets.entry(detector).or_default().push(location);
    }

    let location_set = sets
        .into_iter()
        .filter(|(_, locations)| !locations.is_empty())
        .map(|(detector, mut locations)| {
            locations.sort_by_key(|loc| loc.pmc);
            QuantLocationSet {
                detector: detector.as_str().to_string(),
                location: locations,
            }
        })
        .collect();

    let elements = elements_of(&table.header);
    Ok(ConvertedQuant {
        quant: Quantification {
            labels,
            types: types.into_iter().map(|t| t as i32).collect(),
            location_set,
        },
        elements,
    })
}

/// Values were validated by type inference; anything unparseable here is a zero.
fn data_item(value: Option<&str>, kind: QuantDataType) -> QuantDataItem {
    let value = value.unwrap_or_default();
    match kind {
        QuantDataType::Int => QuantDataItem {
            fvalue: 0.0,
            ivalue: value.parse().unwrap_or_default(),
        },
        QuantDataType::Float => QuantDataItem {
            fvalue: parse_float(value).unwrap_or_default(),
            ivalue: 0,
        },
    }
}
