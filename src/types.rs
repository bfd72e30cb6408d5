use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Backend user identifier (hex ObjectId, also the token's `sub` claim).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Clothing item identifier (hex ObjectId).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct ClothingId(pub String);

/// Path segments under `/clothing/` that name other routes.
const RESERVED_CLOTHING_SEGMENTS: &[&str] = &["", ".", "..", "stats", "search", "upload"];

impl ClothingId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rejects ids that would address another route or cache group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClothingId`] for an empty id, a dot segment,
    /// or one of `stats`, `search` and `upload`.
    pub fn validate(&self) -> Result<(), Error> {
        if RESERVED_CLOTHING_SEGMENTS.contains(&self.0.trim()) {
            return Err(Error::InvalidClothingId(self.0.clone()));
        }
        Ok(())
    }
}

impl From<&str> for ClothingId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
