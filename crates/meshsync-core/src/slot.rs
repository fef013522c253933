//! Compass-slot palette for edge attachment points.
//!
//! Every node exposes eight anchors: four compass positions, each with a
//! source and a target role. Anchors are identified on the wire and in the
//! persisted table by tokens such as `"right-source"` or `"top-target"`.

use std::f64::consts::FRAC_PI_4;
use std::fmt::{self, Write};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SlotParseError;
use crate::id::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compass {
    Right,
    Bottom,
    Left,
    Top,
}

impl Compass {
    /// Rotation order used when fanning out parallel edges.
    pub const ROTATION: [Compass; 4] =
        [Compass::Right, Compass::Bottom, Compass::Left, Compass::Top];

    pub fn as_str(&self) -> &'static str {
        match self {
            Compass::Right => "right",
            Compass::Bottom => "bottom",
            Compass::Left => "left",
            Compass::Top => "top",
        }
    }

    pub fn opposite(self) -> Compass {
        match self {
            Compass::Right => Compass::Left,
            Compass::Bottom => Compass::Top,
            Compass::Left => Compass::Right,
            Compass::Top => Compass::Bottom,
        }
    }

    /// Index of the base direction for a source-to-target vector in screen
    /// coordinates (y grows downwards). Boundaries sit at ±45° and ±135°;
    /// each bucket is closed on its counter-clockwise edge.
    pub fn bucket(dx: f64, dy: f64) -> usize {
        let angle = dy.atan2(dx);
        if angle > -FRAC_PI_4 && angle <= FRAC_PI_4 {
            0
        } else if angle > FRAC_PI_4 && angle <= 3.0 * FRAC_PI_4 {
            1
        } else if angle > 3.0 * FRAC_PI_4 || angle <= -3.0 * FRAC_PI_4 {
            2
        } else {
            3
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Target,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Target => "target",
        }
    }
}

/// One anchor on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub compass: Compass,
    pub role: Role,
}

impl Slot {
    pub fn new(compass: Compass, role: Role) -> Self {
        Slot { compass, role }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.compass.as_str(), self.role.as_str())
    }
}

impl FromStr for Slot {
    type Err = SlotParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SlotParseError(s.to_string());
        let (compass, role) = s.split_once('-').ok_or_else(invalid)?;
        let compass = match compass {
            "right" => Compass::Right,
            "bottom" => Compass::Bottom,
            "left" => Compass::Left,
            "top" => Compass::Top,
            _ => return Err(invalid()),
        };
        let role = match role {
            "source" => Role::Source,
            "target" => Role::Target,
            _ => return Err(invalid()),
        };
        Ok(Slot { compass, role })
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Slot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        token.parse().map_err(de::Error::custom)
    }
}

/// Anchors used at both ends of one directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPair {
    pub source: Slot,
    pub target: Slot,
}

impl SlotPair {
    /// The `index`th entry of the rotation: leave through one side, enter
    /// through the facing side of the other node.
    pub fn base(index: usize) -> Self {
        let compass = Compass::ROTATION[index % Compass::ROTATION.len()];
        SlotPair {
            source: Slot::new(compass, Role::Source),
            target: Slot::new(compass.opposite(), Role::Target),
        }
    }

    /// Pair for a source-to-target vector, advanced `rotation` steps so
    /// parallel edges between the same two nodes do not overlap.
    pub fn toward(dx: f64, dy: f64, rotation: usize) -> Self {
        SlotPair::base(Compass::bucket(dx, dy) + rotation)
    }
}

/// Persisted identity of one directed edge: `"source-target"`, with a
/// `#n` suffix for the nth repeat of the same directed pair. Separator
/// characters inside ids are percent-escaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source: EntityId,
    pub target: EntityId,
    pub occurrence: usize,
}

impl EdgeKey {
    pub fn new(source: EntityId, target: EntityId) -> Self {
        EdgeKey {
            source,
            target,
            occurrence: 0,
        }
    }

    pub fn nth(source: EntityId, target: EntityId, occurrence: usize) -> Self {
        EdgeKey {
            source,
            target,
            occurrence,
        }
    }

    /// Direction-independent key shared by `a -> b` and `b -> a`.
    pub fn unordered(&self) -> (&EntityId, &EntityId) {
        if self.source <= self.target {
            (&self.source, &self.target)
        } else {
            (&self.target, &self.source)
        }
    }
}

/// Writes an id with the key's own separators escaped (`%` as `%25`, `-`
/// as `%2D`, `#` as `%23`). Ids without them are written unchanged.
fn write_key_part(f: &mut fmt::Formatter<'_>, id: &EntityId) -> fmt::Result {
    for ch in id.as_str().chars() {
        match ch {
            '%' => f.write_str("%25")?,
            '-' => f.write_str("%2D")?,
            '#' => f.write_str("%23")?,
            other => f.write_char(other)?,
        }
    }
    Ok(())
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_key_part(f, &self.source)?;
        f.write_char('-')?;
        write_key_part(f, &self.target)?;
        if self.occurrence > 0 {
            write!(f, "#{}", self.occurrence)?;
        }
        Ok(())
    }
}
