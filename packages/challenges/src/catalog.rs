// ABOUTME: Bundled challenge catalog loaded from JSON embedded at compile time
// ABOUTME: Serves as the default store and as the fallback when the database is unreachable

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{Challenge, ChallengeStore};

#[derive(Debug, serde::Deserialize)]
struct CatalogConfig {
    challenges: Vec<Challenge>,
}

/// In-memory store over the catalog shipped inside the binary.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    by_id: HashMap<String, Challenge>,
    order: Vec<String>,
}

impl CatalogStore {
    /// Load the catalog embedded at compile time.
    pub fn bundled() -> Result<Self> {
        let catalog_json = include_str!("../config/catalog.json");
        let config: CatalogConfig = serde_json::from_str(catalog_json)?;
        Ok(Self::from_challenges(config.challenges))
    }

    pub fn from_challenges(challenges: Vec<Challenge>) -> Self {
        let order = challenges.iter().map(|c| c.id.clone()).collect();
        let by_id = challenges.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self { by_id, order }
    }

    pub fn find(&self, id: &str) -> Option<&Challenge> {
        self.by_id.get(id)
    }

    pub fn all(&self) -> Vec<Challenge> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for CatalogStore {
    async fn get(&self, id: &str) -> Result<Option<Challenge>> {
        Ok(self.find(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Challenge>> {
        Ok(self.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Difficulty;

    #[test]
    fn bundled_catalog_parses() {
        let catalog = CatalogStore::bundled().unwrap();
        assert!(!catalog.is_empty());
    }

    #[test]
    fn bundled_catalog_contains_known_challenges() {
        let catalog = CatalogStore::bundled().unwrap();

        let cache = catalog.find("ai-cost-cache-002").unwrap();
        assert_eq!(cache.difficulty, Difficulty::Medium);
        assert!(cache.broken_code.contains("estimate_cost"));
        assert!(cache.test_code.contains("from solution import"));
        assert!(cache.solution_code.is_some());

        assert!(catalog.find("no-such-challenge").is_none());
    }

    #[test]
    fn all_preserves_catalog_order() {
        let catalog = CatalogStore::bundled().unwrap();
        let ids: Vec<String> = catalog.all().into_iter().map(|c| c.id).collect();
        assert_eq!(ids.first().map(String::as_str), Some("retry-storm-001"));
        assert_eq!(ids.len(), catalog.len());
    }

    #[tokio::test]
    async fn store_trait_lookup_matches_find() {
        let catalog = CatalogStore::bundled().unwrap();
        let via_trait = catalog.get("token-window-003").await.unwrap();
        assert_eq!(via_trait.as_ref(), catalog.find("token-window-003"));
    }
}
