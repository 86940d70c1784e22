use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::basic_models::Recipe;

/// The picker value that disables a facet
pub const ALL: &str = "All";

/// A field recipes can be browsed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Facet {
    Category,
    Area,
    Tag,
}

impl Facet {
    /// Whether a recipe has exactly this value for the facet. Case sensitive.
    pub fn matches(self, recipe: &Recipe, value: &str) -> bool {
        match self {
            Facet::Category => recipe.category == value,
            Facet::Area => recipe.area == value,
            Facet::Tag => recipe.tag_list().any(|tag| tag == value),
        }
    }
}

/// Keep the recipes whose facet equals `value`. [`ALL`] keeps everything.
pub fn filter_by(recipes: &[Recipe], facet: Facet, value: &str) -> Vec<Recipe> {
    if value == ALL {
        return recipes.to_vec();
    }
    recipes
        .iter()
        .filter(|r| facet.matches(r, value))
        .cloned()
        .collect()
}

/// Case-insensitive substring search over recipe names
pub fn search_by_name(recipes: &[Recipe], query: &str) -> Vec<Recipe> {
    let needle = query.to_lowercase();
    recipes
        .iter()
        .filter(|r| r.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// The options shown in a picker for `facet`: [`ALL`] first, then every
/// distinct value in sorted order.
pub fn facet_values(recipes: &[Recipe], facet: Facet) -> Vec<String> {
    let values: Vec<&str> = match facet {
        Facet::Category => recipes.iter().map(|r| r.category.as_str()).collect(),
        Facet::Area => recipes.iter().map(|r| r.area.as_str()).collect(),
        Facet::Tag => recipes.iter().flat_map(|r| r.tag_list()).collect(),
    };
    std::iter::once(ALL.to_string())
        .chain(
            values
                .into_iter()
                .filter(|v| !v.is_empty() && *v != ALL)
                .sorted()
                .dedup()
                .map(str::to_string),
        )
        .collect()
}

/// A combined browse request. `None` and `Some("All")` both disable a facet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeQuery {
    pub category: Option<String>,
    pub area: Option<String>,
    pub tag: Option<String>,
    pub name: Option<String>,
}

impl RecipeQuery {
    pub fn apply(&self, mut recipes: Vec<Recipe>) -> Vec<Recipe> {
        for (facet, value) in [
            (Facet::Category, &self.category),
            (Facet::Area, &self.area),
            (Facet::Tag, &self.tag),
        ] {
            if let Some(value) = value.as_deref().filter(|v| *v != ALL) {
                recipes.retain(|r| facet.matches(r, value));
            }
        }
        if let Some(name) = &self.name {
            let needle = name.to_lowercase();
            recipes.retain(|r| r.name.to_lowercase().contains(&needle));
        }
        recipes
    }
}
