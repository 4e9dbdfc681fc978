//! Entities that own media: recipes and users.
//!
//! Only the media-reference column matters to this service; the rest of the
//! record belongs to the catalog layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The kind of record a media directory belongs to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Recipe,
    User,
}

/// How many media files an entity may reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaPolicy {
    /// One file, attached once. Further attaches conflict until replaced or detached.
    Single,
    /// Any number of files; attach is additive.
    Multiple,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Recipe, EntityKind::User];

    /// Path segment used both in routes and under the media root.
    pub fn as_segment(self) -> &'static str {
        match self {
            EntityKind::Recipe => "recipes",
            EntityKind::User => "users",
        }
    }

    /// SQLite table holding records of this kind.
    pub fn table(self) -> &'static str {
        self.as_segment()
    }

    pub fn media_policy(self) -> MediaPolicy {
        match self {
            EntityKind::Recipe => MediaPolicy::Multiple,
            EntityKind::User => MediaPolicy::Single,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Recipe => write!(f, "recipe"),
            EntityKind::User => write!(f, "user"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recipes" => Ok(EntityKind::Recipe),
            "users" => Ok(EntityKind::User),
            other => Err(format!("unknown entity kind `{}`", other)),
        }
    }
}

/// A recipe or user record as seen by the media pipeline.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MediaOwner {
    pub kind: EntityKind,

    /// Record id (the catalog's primary key).
    pub id: String,

    /// Recipe title or username.
    pub label: String,

    /// Unique names of stored media files, in attach order.
    pub media: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl MediaOwner {
    pub fn new(kind: EntityKind, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            label: label.into(),
            media: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }

    /// Append names not already referenced, keeping existing order.
    pub fn union_media<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        for name in names {
            if !self.media.contains(&name) {
                self.media.push(name);
            }
        }
    }
}
