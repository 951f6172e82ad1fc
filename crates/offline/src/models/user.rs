//! Signed-in user profile

use serde::{Deserialize, Serialize};

use crate::storage::{Collection, Entity, IndexValue, RecordKey};

/// Profile of the signed-in user, cached for offline display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    pub phone_number: String,
    pub full_name: String,
    pub user_type: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub farm_name: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl Entity for User {
    const COLLECTION: Collection = Collection::CachedUser;

    fn key(&self) -> RecordKey {
        RecordKey::Id(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        Vec::new()
    }
}
