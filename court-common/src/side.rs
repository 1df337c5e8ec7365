use derivative::Derivative;
use enum_iterator::Sequence;
use serde::{Deserialize, Serialize};

#[derive(Derivative, Serialize, Deserialize, Sequence, Hash)]
#[derivative(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum Side {
    #[derivative(Default)]
    #[serde(rename = "side1")]
    One,
    #[serde(rename = "side2")]
    Two,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    /// Parses the wire name of a side, `"side1"` or `"side2"`
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "side1" => Some(Self::One),
            "side2" => Some(Self::Two),
            _ => None,
        }
    }
}

impl core::fmt::Display for Side {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            Self::One => write!(f, "Side 1"),
            Self::Two => write!(f, "Side 2"),
        }
    }
}

/// One of the four fixed player positions, two per side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Sequence)]
pub enum PlayerSlot {
    #[serde(rename = "side1a")]
    Side1A,
    #[serde(rename = "side1b")]
    Side1B,
    #[serde(rename = "side2a")]
    Side2A,
    #[serde(rename = "side2b")]
    Side2B,
}

impl PlayerSlot {
    pub fn key(self) -> &'static str {
        match self {
            Self::Side1A => "side1a",
            Self::Side1B => "side1b",
            Self::Side2A => "side2a",
            Self::Side2B => "side2b",
        }
    }
}

impl core::fmt::Display for PlayerSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use enum_iterator::all;

    #[test]
    fn test_other() {
        assert_eq!(Side::One.other(), Side::Two);
        assert_eq!(Side::Two.other(), Side::One);
        for side in all::<Side>() {
            assert_eq!(side.other().other(), side);
        }
    }

    #[test]
    fn test_side_keys() {
        assert_eq!(serde_json::to_string(&Side::Two).unwrap(), "\"side2\"");
        assert_eq!(Side::from_key("side1"), Some(Side::One));
        assert_eq!(Side::from_key("side3"), None);
        for slot in all::<PlayerSlot>() {
            assert_eq!(
                serde_json::to_string(&slot).unwrap(),
                format!("\"{}\"", slot.key())
            );
        }
    }
}
