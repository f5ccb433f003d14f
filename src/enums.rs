use serde::{Deserialize, Serialize};
use std::fmt::Formatter;

/// A pulse-guide direction as understood by the actuator interface.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
    None,
}

impl Direction {
    /// The declination-axis sign convention used throughout the backlash
    /// compensator: `North`/`Up` is positive, `South`/`Down` is negative.
    pub fn dec_sign(self) -> Option<DecDirection> {
        match self {
            Direction::North => Some(DecDirection::Up),
            Direction::South => Some(DecDirection::Down),
            _ => None,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::None => Direction::None,
        }
    }
}

/// Declination-axis-only direction; separated from the full compass
/// `Direction` because the backlash compensator and measurement engine only
/// ever reason about one axis at a time.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DecDirection {
    Up,
    Down,
}

impl DecDirection {
    pub fn opposite(self) -> DecDirection {
        match self {
            DecDirection::Up => DecDirection::Down,
            DecDirection::Down => DecDirection::Up,
        }
    }
}

/// Side of a German-equatorial mount's pier, or `Unknown` for mounts that
/// don't report it (e.g. fork mounts, or before the first slew).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum PierSide {
    East,
    West,
    Unknown,
}

impl PierSide {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn opposite(self) -> Self {
        match self {
            PierSide::Unknown => self,
            PierSide::East => PierSide::West,
            PierSide::West => PierSide::East,
        }
    }

    pub fn flip(&mut self) {
        *self = self.opposite();
    }
}

/// Serde (de)serialization as the bare strings `"East"`/`"West"`/`"Unknown"`,
/// matching the persistence schema's `pierSide` scalar.
pub mod pier_side_string {
    use super::PierSide;
    use serde::de::{Error, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt::Formatter;

    struct PierSideVisitor;
    impl<'de> Visitor<'de> for PierSideVisitor {
        type Value = PierSide;

        fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
            formatter.write_str("East, West or Unknown")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(match &*v.to_lowercase() {
                "east" => PierSide::East,
                "west" => PierSide::West,
                "unknown" => PierSide::Unknown,
                _ => return Err(E::custom(format!("unknown pier side: \"{}\"", v))),
            })
        }
    }

    pub fn serialize<S>(s: &PierSide, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(match s {
            PierSide::East => "East",
            PierSide::West => "West",
            PierSide::Unknown => "Unknown",
        })
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PierSide, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(PierSideVisitor)
    }
}

/// Which axis a value pertains to, used by the calibration engine and the
/// coordinate transform.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Axis {
    X,
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Axis::X => "X",
            Axis::Y => "Y",
        })
    }
}
