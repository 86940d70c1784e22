use anyhow::{Context, Result};
use async_trait::async_trait;
use pk::basic_models::Recipe;

use crate::config::RecipeApiConfig;

/// Where browsable recipes come from
#[async_trait]
pub trait RecipeSource: Send + Sync {
    async fn fetch_recipes(&self) -> Result<Vec<Recipe>>;
}

/// The public recipe API, read with one unauthenticated GET
#[derive(Clone)]
pub struct MealDb {
    client: reqwest::Client,
    url: String,
}

impl MealDb {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn from_config(config: &RecipeApiConfig) -> Self {
        Self::new(config.url.clone())
    }
}

#[async_trait]
impl RecipeSource for MealDb {
    async fn fetch_recipes(&self) -> Result<Vec<Recipe>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Requesting recipes")?
            .error_for_status()?
            .text()
            .await?;
        let recipes = pk::mealdb::parse_meals(&body).context("Decoding recipe API response")?;
        tracing::info!("Fetched {} recipes from {}", recipes.len(), self.url);
        Ok(recipes)
    }
}

/// A fixed set of recipes, for running without network access
#[derive(Clone, Default)]
pub struct StaticSource {
    pub recipes: Vec<Recipe>,
}

#[async_trait]
impl RecipeSource for StaticSource {
    async fn fetch_recipes(&self) -> Result<Vec<Recipe>> {
        Ok(self.recipes.clone())
    }
}
