#![forbid(unsafe_code)]

//! Binary quantification artifact, hand-derived protobuf messages.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct Quantification {
    #[prost(string, repeated, tag = "1")]
    pub labels: Vec<String>,
    #[prost(enumeration = "QuantDataType", repeated, tag = "2")]
    pub types: Vec<i32>,
    #[prost(message, repeated, tag = "3")]
    pub location_set: Vec<QuantLocationSet>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum QuantDataType {
    Float = 0,
    Int = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct QuantLocationSet {
    #[prost(string, tag = "1")]
    pub detector: String,
    #[prost(message, repeated, tag = "2")]
    pub location: Vec<QuantLocation>,
}

#[derive(Clone, PartialEq, Message)]
pub struct QuantLocation {
    #[prost(int32, tag = "1")]
    pub pmc: i32,
    #[prost(int32, optional, tag = "2")]
    pub rtt: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub sclk: Option<i32>,
    #[prost(message, repeated, tag = "5")]
    pub values: Vec<QuantDataItem>,
}

#[derive(Clone, PartialEq, Message)]
pub struct QuantDataItem {
    #[prost(float, tag = "2")]
    pub fvalue: f32,
    #[prost(int32, tag = "3")]
    pub ivalue: i32,
}

impl Quantification {
    /// Column types in label order; unknown wire values are reported as `None`.
    pub fn column_types(&self) -> Vec<Option<QuantDataType>> {
        self.types
            .iter()
            .map(|&raw| QuantDataType::try_from(raw).ok())
            .collect()
    }

    pub fn detector_set(&self, detector: &str) -> Option<&QuantLocationSet> {
        self.location_set.iter().find(|set| set.detector == detector)
    }
}
