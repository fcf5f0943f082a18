// src/owner.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ResolverError;

/// The external user-identity namespace an owner id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Turon,
    Cinerama,
}

impl OwnerKind {
    /// Name of the namespace. Also the slug of the source its mutations are
    /// attributed to, and the stored `owner_kind`.
    pub fn slug(&self) -> &'static str {
        match self {
            OwnerKind::Turon => "turon",
            OwnerKind::Cinerama => "cinerama",
        }
    }
}

impl FromStr for OwnerKind {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turon" => Ok(OwnerKind::Turon),
            "cinerama" => Ok(OwnerKind::Cinerama),
            _ => Err(ResolverError::AmbiguousOwner),
        }
    }
}

/// Identity a balance and its mutations are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    pub kind: OwnerKind,
    pub id: i64,
}

impl OwnerKey {
    pub fn turon(id: i64) -> Self {
        Self {
            kind: OwnerKind::Turon,
            id,
        }
    }

    pub fn cinerama(id: i64) -> Self {
        Self {
            kind: OwnerKind::Cinerama,
            id,
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.slug(), self.id)
    }
}

/// Owner ids as supplied by a client; exactly one must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerIdentity {
    #[serde(default)]
    pub turon_user_id: Option<i64>,
    #[serde(default)]
    pub cinerama_user_id: Option<i64>,
}

impl OwnerIdentity {
    pub fn turon(id: i64) -> Self {
        Self {
            turon_user_id: Some(id),
            cinerama_user_id: None,
        }
    }

    pub fn cinerama(id: i64) -> Self {
        Self {
            turon_user_id: None,
            cinerama_user_id: Some(id),
        }
    }

    /// Maps the identity onto a single namespace.
    ///
    /// A zero id counts as absent, matching clients that send `0` for unused fields.
    pub fn classify(&self) -> Result<OwnerKey, ResolverError> {
        let turon = self.turon_user_id.filter(|id| *id != 0);
        let cinerama = self.cinerama_user_id.filter(|id| *id != 0);

        match (turon, cinerama) {
            (Some(id), None) if id > 0 => Ok(OwnerKey::turon(id)),
            (None, Some(id)) if id > 0 => Ok(OwnerKey::cinerama(id)),
            _ => Err(ResolverError::AmbiguousOwner),
        }
    }
}
