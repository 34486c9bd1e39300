//! Grouping identifiers.
//!
//! A grouping is any user-level collection of entities: an explicit group, a
//! scene, an area, a floor or a label. Groupings are identified by
//! `<kind>.<name>`, for example `area.living_room` or `scene.movie_night`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of user grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingKind {
    Group,
    Scene,
    Area,
    Floor,
    Label,
}

impl GroupingKind {
    pub const ALL: [GroupingKind; 5] = [
        GroupingKind::Group,
        GroupingKind::Scene,
        GroupingKind::Area,
        GroupingKind::Floor,
        GroupingKind::Label,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingKind::Group => "group",
            GroupingKind::Scene => "scene",
            GroupingKind::Area => "area",
            GroupingKind::Floor => "floor",
            GroupingKind::Label => "label",
        }
    }
}

impl fmt::Display for GroupingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupingKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "group" => Ok(GroupingKind::Group),
            "scene" => Ok(GroupingKind::Scene),
            "area" => Ok(GroupingKind::Area),
            "floor" => Ok(GroupingKind::Floor),
            "label" => Ok(GroupingKind::Label),
            other => Err(Error::InvalidGroupingId(format!("unknown kind '{other}'"))),
        }
    }
}

/// Stable identifier of a user grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupingId {
    kind: GroupingKind,
    name: String,
}

impl GroupingId {
    pub fn new(kind: GroupingKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(GroupingKind::Group, name)
    }

    pub fn scene(name: impl Into<String>) -> Self {
        Self::new(GroupingKind::Scene, name)
    }

    pub fn area(name: impl Into<String>) -> Self {
        Self::new(GroupingKind::Area, name)
    }

    pub fn floor(name: impl Into<String>) -> Self {
        Self::new(GroupingKind::Floor, name)
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::new(GroupingKind::Label, name)
    }

    /// Parse `<kind>.<name>`.
    pub fn parse(s: &str) -> Result<Self> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidGroupingId(s.to_string()))?;
        if name.is_empty() {
            return Err(Error::InvalidGroupingId(s.to_string()));
        }
        Ok(Self::new(kind.parse()?, name))
    }

    pub fn kind(&self) -> GroupingKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier-safe form used inside native group names.
    ///
    /// Every character outside `[a-z0-9_]` becomes `_`, so
    /// `area.Living Room` turns into `area_living_room`.
    pub fn slug(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{}", self.kind, name)
    }
}

impl fmt::Display for GroupingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for GroupingId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for GroupingId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<GroupingId> for String {
    fn from(id: GroupingId) -> Self {
        id.to_string()
    }
}
