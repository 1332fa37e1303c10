//! Relation cells between unordered point pairs.

use serde::{Deserialize, Serialize};

use super::PointId;

/// Confirmed knowledge about a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Conducting,
    NonConducting,
}

/// Knowledge state of one cell, including "not yet known".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationState {
    #[default]
    Unknown,
    Conducting,
    NonConducting,
}

impl RelationState {
    pub fn is_known(self) -> bool {
        self != RelationState::Unknown
    }
}

impl From<Relation> for RelationState {
    fn from(rel: Relation) -> Self {
        match rel {
            Relation::Conducting => RelationState::Conducting,
            Relation::NonConducting => RelationState::NonConducting,
        }
    }
}

/// What the hardware reported for one target of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Conducting,
    NonConducting,
    /// No usable reading; the cell stays Unknown.
    Ambiguous,
}

impl Reading {
    /// The relation this reading confirms, if any.
    pub fn relation(self) -> Option<Relation> {
        match self {
            Reading::Conducting => Some(Relation::Conducting),
            Reading::NonConducting => Some(Relation::NonConducting),
            Reading::Ambiguous => None,
        }
    }
}

impl From<bool> for Reading {
    fn from(conducting: bool) -> Self {
        if conducting { Reading::Conducting } else { Reading::NonConducting }
    }
}

/// Canonical key of an unordered pair: `(min, max)`, never the diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    lo: PointId,
    hi: PointId,
}

impl PairKey {
    /// Returns `None` for a self-pair.
    pub fn new(a: PointId, b: PointId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { lo: a, hi: b }),
            std::cmp::Ordering::Greater => Some(Self { lo: b, hi: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn lo(self) -> PointId {
        self.lo
    }

    pub fn hi(self) -> PointId {
        self.hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_canonical() {
        let a = PairKey::new(PointId(7), PointId(3)).unwrap();
        let b = PairKey::new(PointId(3), PointId(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.lo(), PointId(3));
        assert_eq!(a.hi(), PointId(7));
    }

    #[test]
    fn test_pair_key_rejects_diagonal() {
        assert!(PairKey::new(PointId(5), PointId(5)).is_none());
    }

    #[test]
    fn test_reading_relation() {
        assert_eq!(Reading::from(true).relation(), Some(Relation::Conducting));
        assert_eq!(Reading::from(false).relation(), Some(Relation::NonConducting));
        assert_eq!(Reading::Ambiguous.relation(), None);
    }
}
