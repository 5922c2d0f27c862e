// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of board a chip is mounted on.
///
/// Serialized by name (`"n300"`, `"p150"`, ...) in cluster descriptor files.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum BoardType {
    E75,
    E150,
    E300,
    N150,
    N300,
    P100,
    P150,
    P300,
    Galaxy,
    /// 6U galaxy tray, Wormhole.
    Ubb,
    UbbBlackhole,
    UbbWormhole,
    Quasar,
    #[default]
    Unknown,
}

impl BoardType {
    /// Decode the board type from the upi field of the board id.
    ///
    /// Unrecognized ids come back as [`BoardType::Unknown`].
    pub fn from_board_id(board_id: u64) -> Self {
        let upi = (board_id >> 36) & 0xFFFFF;
        match upi {
            0x36 | 0x43 => BoardType::P100,
            0x40..=0x42 => BoardType::P150,
            0x44..=0x46 => BoardType::P300,
            0x18 => BoardType::N150,
            0x14 => BoardType::N300,
            0xB => BoardType::Galaxy,
            0x35 => BoardType::UbbWormhole,
            0x47 => BoardType::UbbBlackhole,
            _ => BoardType::Unknown,
        }
    }

    /// Number of chips expected on one board of this type, if known.
    pub fn chips_per_board(&self) -> Option<usize> {
        match self {
            BoardType::N150 | BoardType::P100 | BoardType::P150 | BoardType::Galaxy => Some(1),
            BoardType::N300 | BoardType::P300 => Some(2),
            BoardType::Ubb | BoardType::UbbWormhole | BoardType::UbbBlackhole => Some(32),
            BoardType::E75
            | BoardType::E150
            | BoardType::E300
            | BoardType::Quasar
            | BoardType::Unknown => None,
        }
    }

    pub fn is_ubb(&self) -> bool {
        matches!(
            self,
            BoardType::Ubb | BoardType::UbbWormhole | BoardType::UbbBlackhole
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BoardType::E75 => "e75",
            BoardType::E150 => "e150",
            BoardType::E300 => "e300",
            BoardType::N150 => "n150",
            BoardType::N300 => "n300",
            BoardType::P100 => "p100",
            BoardType::P150 => "p150",
            BoardType::P300 => "p300",
            BoardType::Galaxy => "galaxy",
            BoardType::Ubb => "ubb",
            BoardType::UbbBlackhole => "ubb_blackhole",
            BoardType::UbbWormhole => "ubb_wormhole",
            BoardType::Quasar => "quasar",
            BoardType::Unknown => "unknown",
        }
    }
}

impl FromStr for BoardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let board = match s.to_lowercase().as_str() {
            "e75" => BoardType::E75,
            "e150" => BoardType::E150,
            "e300" => BoardType::E300,
            "n150" => BoardType::N150,
            "n300" => BoardType::N300,
            "p100" => BoardType::P100,
            "p150" | "p150a" | "p150c" => BoardType::P150,
            "p300" | "p300a" | "p300c" => BoardType::P300,
            "galaxy" => BoardType::Galaxy,
            "ubb" => BoardType::Ubb,
            "ubb_blackhole" => BoardType::UbbBlackhole,
            "ubb_wormhole" => BoardType::UbbWormhole,
            "quasar" => BoardType::Quasar,
            "unknown" => BoardType::Unknown,
            err => return Err(format!("Unknown board type {err}")),
        };
        Ok(board)
    }
}

impl TryFrom<String> for BoardType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BoardType> for String {
    fn from(value: BoardType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_id_decode() {
        assert_eq!(BoardType::from_board_id(0x18 << 36), BoardType::N150);
        assert_eq!(BoardType::from_board_id((0x14 << 36) | 0x1234), BoardType::N300);
        assert_eq!(BoardType::from_board_id(0x41 << 36), BoardType::P150);
        assert_eq!(BoardType::from_board_id(0x46 << 36), BoardType::P300);
        assert_eq!(BoardType::from_board_id(0x35 << 36), BoardType::UbbWormhole);
        assert_eq!(BoardType::from_board_id(0), BoardType::Unknown);
    }

    #[test]
    fn test_board_names() {
        assert_eq!("p150a".parse::<BoardType>(), Ok(BoardType::P150));
        assert_eq!("P300C".parse::<BoardType>(), Ok(BoardType::P300));
        assert!("e999".parse::<BoardType>().is_err());
        assert_eq!(BoardType::UbbBlackhole.to_string(), "ubb_blackhole");
    }

    #[test]
    fn test_chips_per_board() {
        assert_eq!(BoardType::N300.chips_per_board(), Some(2));
        assert_eq!(BoardType::UbbWormhole.chips_per_board(), Some(32));
        assert_eq!(BoardType::E150.chips_per_board(), None);
    }
}
