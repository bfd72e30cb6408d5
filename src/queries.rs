//! Cache keys for every read, and the groups each write invalidates.
//!
//! Layout:
//!
//! | key                               | read                        |
//! |-----------------------------------|-----------------------------|
//! | `user/info`                       | `GET /user/userinfo`        |
//! | `clothing/stats`                  | `GET /clothing/stats`       |
//! | `clothing/search/<params json>`   | `POST /clothing/search`     |
//! | `clothing/<id>`                   | `GET /clothing/{id}`        |
//! | `clothing/<id>/owner`             | `GET /clothing/{id}/owner`  |
//! | `dashboard/stylist`               | `GET /dashboard/stylist`    |
//!
//! Item ids are hex ObjectIds, so they never collide with `stats` or
//! `search`.

use std::time::Duration;

use crate::cache::{QueryKey, QueryOptions, WriteOperation};
use crate::models::SearchClothingParams;
use crate::types::ClothingId;

/// User info is refetched at most every 20 minutes unless invalidated.
pub const USER_INFO_STALE_TIME: Duration = Duration::from_secs(20 * 60);

pub mod keys {
    use super::*;

    #[must_use]
    pub fn user_info() -> QueryKey {
        QueryKey::from(["user", "info"])
    }

    #[must_use]
    pub fn clothing() -> QueryKey {
        QueryKey::from(["clothing"])
    }

    #[must_use]
    pub fn clothing_stats() -> QueryKey {
        clothing().child("stats")
    }

    /// Group holding every search result.
    #[must_use]
    pub fn clothing_search_group() -> QueryKey {
        clothing().child("search")
    }

    #[must_use]
    pub fn clothing_search(params: &SearchClothingParams) -> QueryKey {
        // Struct fields serialize in declaration order, so equal params give equal keys.
        let params = serde_json::to_string(params).unwrap_or_default();
        clothing_search_group().child(params)
    }

    #[must_use]
    pub fn clothing_item(id: &ClothingId) -> QueryKey {
        clothing().child(id.as_str())
    }

    #[must_use]
    pub fn clothing_owner(id: &ClothingId) -> QueryKey {
        clothing_item(id).child("owner")
    }

    #[must_use]
    pub fn dashboard_stylist() -> QueryKey {
        QueryKey::from(["dashboard", "stylist"])
    }
}

#[must_use]
pub fn user_info_options() -> QueryOptions {
    QueryOptions::new().with_stale_time(USER_INFO_STALE_TIME)
}

/// `POST /clothing/upload`: a new item changes the counts and may match any
/// search.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadClothing;

impl WriteOperation for UploadClothing {
    fn name(&self) -> &'static str {
        "clothing upload"
    }

    fn invalidates(&self) -> Vec<QueryKey> {
        vec![keys::clothing_stats(), keys::clothing_search_group()]
    }
}

/// `PATCH /clothing/{id}`: name, description and visibility are all shown
/// in search results, so searches go stale along with the item. Category and
/// colour counts are untouched.
#[derive(Debug, Clone)]
pub struct UpdateClothing {
    pub id: ClothingId,
}

impl UpdateClothing {
    #[must_use]
    pub fn new(id: ClothingId) -> Self {
        Self { id }
    }
}

impl WriteOperation for UpdateClothing {
    fn name(&self) -> &'static str {
        "clothing update"
    }

    fn invalidates(&self) -> Vec<QueryKey> {
        vec![keys::clothing_item(&self.id), keys::clothing_search_group()]
    }
}
