#![forbid(unsafe_code)]

//! Grammar of the engine's `filename` column: `<ReadType>_<Detector>(_<RegionId>)?`, or a
//! five-token `.msa` name whose first two tokens carry the same information.

use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpectrumReadType {
    Normal,
    Dwell,
    BulkSum,
    MaxValue,
    Mixed,
}

impl FromStr for SpectrumReadType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Normal" => Ok(Self::Normal),
            "Dwell" => Ok(Self::Dwell),
            "BulkSum" => Ok(Self::BulkSum),
            "MaxValue" => Ok(Self::MaxValue),
            "Mixed" => Ok(Self::Mixed),
            _ => Err(()),
        }
    }
}

/// Detector tag of a location set. Ordering is the canonical emission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DetectorTag {
    A,
    B,
    Combined,
}

impl DetectorTag {
    pub const ALL: [DetectorTag; 3] = [DetectorTag::A, DetectorTag::B, DetectorTag::Combined];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::Combined => "Combined",
        }
    }

    /// A <-> B; `Combined` has no opposite.
    pub fn opposite(self) -> Option<Self> {
        match self {
            Self::A => Some(Self::B),
            Self::B => Some(Self::A),
            Self::Combined => None,
        }
    }
}

impl fmt::Display for DetectorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorTag {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "Combined" => Ok(Self::Combined),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpectrumName {
    pub read_type: SpectrumReadType,
    pub detector: DetectorTag,
    pub region: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FilenameError {
    #[error("invalid read type in filename {0:?}")]
    ReadType(String),
    #[error("invalid detector in filename {0:?}")]
    Detector(String),
    #[error("unrecognised filename shape {0:?}")]
    Shape(String),
}

fn has_msa_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("msa"))
}

pub fn parse_spectrum_name(name: &str) -> Result<SpectrumName, FilenameError> {
    let (read_type, detector, region) = if has_msa_extension(name) {
        let bits: Vec<&str> = name.split('_').collect();
        if bits.len() != 5 {
            return Err(FilenameError::Shape(name.to_string()));
        }
        (bits[0], bits[1], None)
    } else if name.contains('.') {
        return Err(FilenameError::Shape(name.to_string()));
    } else {
        let mut bits = name.splitn(3, '_');
        let read_type = bits.next().unwrap_or_default();
        let Some(detector) = bits.next() else {
            return Err(FilenameError::Shape(name.to_string()));
        };
        let region = bits.next().map(str::to_string);
        if region.as_deref() == Some("") {
            return Err(FilenameError::Shape(name.to_string()));
        }
        (read_type, detector, region)
    };

    let read_type = read_type
        .parse()
        .map_err(|()| FilenameError::ReadType(name.to_string()))?;
    let detector = detector
        .parse()
        .map_err(|()| FilenameError::Detector(name.to_string()))?;
    Ok(SpectrumName {
        read_type,
        detector,
        region,
    })
}

/// Strict form emitted for region quantifications: `Normal_<Detector>_<RegionId>`.
pub fn parse_region_row_name(name: &str) -> Result<(DetectorTag, String), FilenameError> {
    let parsed = parse_spectrum_name(name)?;
    match (parsed.read_type, parsed.region) {
        (SpectrumReadType::Normal, Some(region)) => Ok((parsed.detector, region)),
        (SpectrumReadType::Normal, None) => Err(FilenameError::Shape(name.to_string())),
        _ => Err(FilenameError::ReadType(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_and_region_names() {
        let bare = parse_spectrum_name("Normal_A").expect("bare");
        assert_eq!(bare.read_type, SpectrumReadType::Normal);
        assert_eq!(bare.detector, DetectorTag::A);
        assert_eq!(bare.region, None);

        let region = parse_spectrum_name("Mixed_Combined_roi_with_underscores").expect("region");
        assert_eq!(region.detector, DetectorTag::Combined);
        assert_eq!(region.region.as_deref(), Some("roi_with_underscores"));
    }

    #[test]
    fn accepts_five_token_msa_names() {
        let msa = parse_spectrum_name("Normal_B_0001_5x5_cal.MSA").expect("msa");
        assert_eq!(msa.detector, DetectorTag::B);
        assert!(parse_spectrum_name("Normal_B_0001.msa").is_err());
    }

    #[test]
    fn rejects_unknown_tokens() {
        assert!(matches!(
            parse_spectrum_name("Weird_A"),
            Err(FilenameError::ReadType(_))
        ));
        assert!(matches!(
            parse_spectrum_name("Normal_C"),
            Err(FilenameError::Detector(_))
        ));
        assert!(matches!(
            parse_spectrum_name("Normal"),
            Err(FilenameError::Shape(_))
        ));
        assert!(parse_spectrum_name("Normal_A.txt").is_err());
    }

    #[test]
    fn region_rows_must_be_normal_with_region() {
        assert_eq!(
            parse_region_row_name("Normal_A_roi1-id").expect("row"),
            (DetectorTag::A, "roi1-id".to_string())
        );
        assert!(parse_region_row_name("Normal_A").is_err());
        assert!(parse_region_row_name("Dwell_B_roi").is_err());
    }

    #[test]
    fn detector_tags_sort_canonically() {
        let mut tags = vec![DetectorTag::Combined, DetectorTag::B, DetectorTag::A];
        tags.sort();
        assert_eq!(tags, DetectorTag::ALL.to_vec());
    }
}
