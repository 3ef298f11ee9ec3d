#![forbid(unsafe_code)]

//! Work-list files handed to each engine worker.
//!
//! ```text
//! DATASET_BASENAME
//! (REGION_ID ":")? TOKEN ("," TOKEN)*
//! TOKEN := POINT "|" ("Normal" | "Dwell") "|" ("A" | "B")
//! ```

use std::collections::HashSet;
use std::fmt::{self, Write as _};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadType {
    Normal,
    Dwell,
}

impl ReadType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Dwell => "Dwell",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Detector {
    A,
    B,
}

impl Detector {
    pub const BOTH: [Detector; 2] = [Detector::A, Detector::B];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkToken {
    pub point: i32,
    pub read_type: ReadType,
    pub detector: Detector,
}

impl fmt::Display for WorkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.point,
            self.read_type.as_str(),
            self.detector.as_str()
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkLine {
    pub region: Option<String>,
    pub tokens: Vec<WorkToken>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkList {
    pub dataset_file: String,
    pub lines: Vec<WorkLine>,
}

impl WorkList {
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WorkList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.dataset_file)?;
        for line in &self.lines {
            if let Some(region) = &line.region {
                write!(f, "{region}:")?;
            }
            let mut first = true;
            for token in &line.tokens {
                if !first {
                    f.write_char(',')?;
                }
                first = false;
                write!(f, "{token}")?;
            }
            f.write_char('\n')?;
        }
        Ok(())
    }
}

/// A region with its member points in caller order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionPoints {
    pub id: String,
    pub points: Vec<i32>,
}

/// Which points have an extra dwell read, and whether to include them.
#[derive(Clone, Copy, Debug)]
pub struct DwellReads<'a> {
    pub include: bool,
    pub points: &'a HashSet<i32>,
}

impl DwellReads<'_> {
    fn has(&self, point: i32) -> bool {
        self.include && self.points.contains(&point)
    }
}

fn push_point(
    tokens: &mut Vec<WorkToken>,
    point: i32,
    detectors: &[Detector],
    dwells: DwellReads<'_>,
) {
    for &detector in detectors {
        tokens.push(WorkToken {
            point,
            read_type: ReadType::Normal,
            detector,
        });
    }
    if dwells.has(point) {
        for &detector in detectors {
            tokens.push(WorkToken {
                point,
                read_type: ReadType::Dwell,
                detector,
            });
        }
    }
}

fn detector_groups(combined: bool) -> Vec<Vec<Detector>> {
    if combined {
        vec![Detector::BOTH.to_vec()]
    } else {
        Detector::BOTH.iter().map(|&d| vec![d]).collect()
    }
}

/// One line per point (combined) or one per point and detector (separate).
pub fn point_work_list(
    points: &[i32],
    dataset_file: &str,
    combined: bool,
    dwells: DwellReads<'_>,
) -> WorkList {
    let groups = detector_groups(combined);
    let mut lines = Vec::with_capacity(points.len() * groups.len());
    for &point in points {
        for detectors in &groups {
            let mut tokens = Vec::new();
            push_point(&mut tokens, point, detectors, dwells);
            lines.push(WorkLine {
                region: None,
                tokens,
            });
        }
    }
    WorkList {
        dataset_file: dataset_file.to_string(),
        lines,
    }
}

/// One line per region (combined) or one per region and detector, A first (separate).
pub fn region_work_list(
    regions: &[RegionPoints],
    dataset_file: &str,
    combined: bool,
    dwells: DwellReads<'_>,
) -> WorkList {
    let groups = detector_groups(combined);
    let mut lines = Vec::with_capacity(regions.len() * groups.len());
    for region in regions {
        for detectors in &groups {
            let mut tokens = Vec::new();
            for &point in &region.points {
                push_point(&mut tokens, point, detectors, dwells);
            }
            lines.push(WorkLine {
                region: Some(region.id.clone()),
                tokens,
            });
        }
    }
    WorkList {
        dataset_file: dataset_file.to_string(),
        lines,
    }
}

/// `node00000.pmcs`, `node00001.pmcs`, ...
pub fn shard_list_name(index: usize) -> String {
    format!("node{index:05}.pmcs")
}
