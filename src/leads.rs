use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the twelve standard ECG leads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadName {
    I,
    II,
    III,
    #[serde(rename = "aVR")]
    AVR,
    #[serde(rename = "aVL")]
    AVL,
    #[serde(rename = "aVF")]
    AVF,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
}

pub const LEAD_COUNT: usize = 12;

/// Capture order and serialization order.
pub const CANONICAL_LEAD_ORDER: [LeadName; LEAD_COUNT] = [
    LeadName::I,
    LeadName::II,
    LeadName::III,
    LeadName::AVR,
    LeadName::AVL,
    LeadName::AVF,
    LeadName::V1,
    LeadName::V2,
    LeadName::V3,
    LeadName::V4,
    LeadName::V5,
    LeadName::V6,
];

impl LeadName {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadName::I => "I",
            LeadName::II => "II",
            LeadName::III => "III",
            LeadName::AVR => "aVR",
            LeadName::AVL => "aVL",
            LeadName::AVF => "aVF",
            LeadName::V1 => "V1",
            LeadName::V2 => "V2",
            LeadName::V3 => "V3",
            LeadName::V4 => "V4",
            LeadName::V5 => "V5",
            LeadName::V6 => "V6",
        }
    }

    /// Position of this lead in [`CANONICAL_LEAD_ORDER`].
    pub fn canonical_index(self) -> usize {
        CANONICAL_LEAD_ORDER
            .iter()
            .position(|&lead| lead == self)
            .unwrap_or(LEAD_COUNT)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        CANONICAL_LEAD_ORDER.get(index).copied()
    }
}

impl fmt::Display for LeadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown lead name: {0}")]
pub struct UnknownLead(pub String);

impl FromStr for LeadName {
    type Err = UnknownLead;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CANONICAL_LEAD_ORDER
            .iter()
            .copied()
            .find(|lead| lead.as_str() == s)
            .ok_or_else(|| UnknownLead(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_index_matches_order() {
        for (i, lead) in CANONICAL_LEAD_ORDER.iter().enumerate() {
            assert_eq!(lead.canonical_index(), i);
            assert_eq!(LeadName::from_index(i), Some(*lead));
        }
        assert_eq!(LeadName::from_index(LEAD_COUNT), None);
    }

    #[test]
    fn parses_display_names() {
        assert_eq!("aVF".parse::<LeadName>(), Ok(LeadName::AVF));
        assert_eq!("V6".parse::<LeadName>(), Ok(LeadName::V6));
        assert!("AVF".parse::<LeadName>().is_err());
    }

    #[test]
    fn serializes_with_display_names() {
        let json = serde_json::to_string(&[LeadName::I, LeadName::AVL]).unwrap();
        assert_eq!(json, r#"["I","aVL"]"#);
        let back: Vec<LeadName> = serde_json::from_str(r#"["aVR","V3"]"#).unwrap();
        assert_eq!(back, vec![LeadName::AVR, LeadName::V3]);
    }
}
