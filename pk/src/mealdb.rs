//! Adapter for the public recipe API's flat meal schema.
//!
//! The API has no arrays: a meal carries up to twenty numbered
//! `strIngredientN` / `strMeasureN` pairs. Inside this workspace recipes always
//! hold a native ingredient list; this module is the only place that knows
//! about the numbered slots.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::basic_models::{Ingredient, MediaRef, Recipe, RecipeDraft};

/// Number of ingredient/measure slots in the meal schema
pub const SLOT_COUNT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Recipe has {count} ingredients but the meal schema only has {SLOT_COUNT} slots")]
pub struct SlotOverflow {
    pub count: usize,
}

#[derive(Deserialize)]
struct MealsEnvelope {
    #[serde(default)]
    meals: Option<Vec<Value>>,
}

/// Parse a `{"meals": [...]}` response body into recipes.
///
/// The API answers `"meals": null` when nothing matched, which is an empty list
/// here. Entries that are not objects are skipped.
pub fn parse_meals(body: &str) -> serde_json::Result<Vec<Recipe>> {
    let envelope: MealsEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .meals
        .unwrap_or_default()
        .iter()
        .filter_map(|meal| match meal {
            Value::Object(fields) => Some(decode_meal(fields)),
            other => {
                tracing::warn!("Skipping meal entry that is not an object: {}", other);
                None
            }
        })
        .collect())
}

/// Read a single meal record.
///
/// All twenty slots are visited in order; a slot with a missing or blank
/// ingredient is skipped without ending the scan. Fields that are missing or
/// have an unexpected type fall back to their defaults, so this never fails.
pub fn decode_meal(fields: &Map<String, Value>) -> Recipe {
    let mut ingredients = vec![];
    for slot in 1..=SLOT_COUNT {
        let Some(name) = non_blank(text(fields, &format!("strIngredient{slot}"))) else {
            continue;
        };
        let measure = text(fields, &format!("strMeasure{slot}")).unwrap_or_default();
        ingredients.push(Ingredient { name, measure });
    }

    let id = non_blank(text(fields, "idMeal")).unwrap_or_else(|| {
        let generated = uuid::Uuid::new_v4().to_string();
        tracing::warn!("Meal has no idMeal, using generated id {}", generated);
        generated
    });

    Recipe::external(
        id,
        RecipeDraft {
            name: text(fields, "strMeal").unwrap_or_default(),
            category: text(fields, "strCategory").unwrap_or_default(),
            area: text(fields, "strArea").unwrap_or_default(),
            instructions: text(fields, "strInstructions").unwrap_or_default(),
            tags: non_blank(text(fields, "strTags")),
            youtube: non_blank(text(fields, "strYoutube")),
            ingredients,
            images: non_blank(text(fields, "strMealThumb"))
                .map(MediaRef::url)
                .into_iter()
                .collect(),
            videos: vec![],
        },
    )
}

/// Write a recipe back out in the flat meal schema.
///
/// Ingredient `i` lands in slot `i + 1`; unused slots are null. A recipe with
/// more ingredients than there are slots is rejected rather than truncated.
pub fn encode_meal(recipe: &Recipe) -> Result<Map<String, Value>, SlotOverflow> {
    if recipe.ingredients.len() > SLOT_COUNT {
        return Err(SlotOverflow {
            count: recipe.ingredients.len(),
        });
    }

    let mut fields = Map::new();
    fields.insert("idMeal".into(), Value::from(recipe.id()));
    fields.insert("strMeal".into(), Value::from(recipe.name.as_str()));
    fields.insert("strCategory".into(), Value::from(recipe.category.as_str()));
    fields.insert("strArea".into(), Value::from(recipe.area.as_str()));
    fields.insert(
        "strInstructions".into(),
        Value::from(recipe.instructions.as_str()),
    );
    fields.insert("strTags".into(), Value::from(recipe.tags.clone()));
    fields.insert("strYoutube".into(), Value::from(recipe.youtube.clone()));
    fields.insert(
        "strMealThumb".into(),
        Value::from(recipe.thumbnail_url().map(str::to_string)),
    );
    for slot in 1..=SLOT_COUNT {
        let ingredient = recipe.ingredients.get(slot - 1);
        fields.insert(
            format!("strIngredient{slot}"),
            Value::from(ingredient.map(|i| i.name.clone())),
        );
        fields.insert(
            format!("strMeasure{slot}"),
            Value::from(ingredient.map(|i| i.measure.clone())),
        );
    }
    Ok(fields)
}

fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        other => {
            tracing::warn!("Ignoring {} with unexpected value {}", key, other);
            None
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
