//! Conversion between recipes and stored documents.
//!
//! Reads are forgiving: a field that is missing or has the wrong type falls
//! back to its default and is logged, so one damaged document never fails a
//! whole listing.

use anyhow::Result;
use pk::basic_models::{Ingredient, MediaRef, Provenance, Recipe, RecipeDraft, UserProfile};
use pk::mealdb;
use serde_json::{Map, Value};

use crate::database::Document;

/// Serialize a recipe for storage
pub fn recipe_to_document(recipe: &Recipe) -> Result<Value> {
    Ok(serde_json::to_value(recipe)?)
}

/// Read a stored recipe.
///
/// The document id is the recipe id. `fallback` is the provenance used when
/// the document does not record one.
pub fn recipe_from_document(doc: &Document, fallback: Provenance) -> Recipe {
    let empty = Map::new();
    let fields = match &doc.body {
        Value::Object(fields) => fields,
        other => {
            tracing::warn!("Recipe document {} is not an object: {}", doc.path, other);
            &empty
        }
    };
    let provenance = fields
        .get("provenance")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(fallback);

    Recipe::restore(
        doc.id.clone(),
        provenance,
        RecipeDraft {
            name: string_field(fields, "name"),
            category: string_field(fields, "category"),
            area: string_field(fields, "area"),
            instructions: string_field(fields, "instructions"),
            tags: optional_string_field(fields, "tags"),
            youtube: optional_string_field(fields, "youtube"),
            ingredients: ingredients_field(fields),
            images: media_field(fields, "images"),
            videos: media_field(fields, "videos"),
        },
    )
}

/// Read a list of documents as recipes, in order
pub fn recipes_from_documents(docs: &[Document], fallback: Provenance) -> Vec<Recipe> {
    docs.iter()
        .map(|doc| recipe_from_document(doc, fallback))
        .collect()
}

pub fn profile_to_document(profile: &UserProfile) -> Result<Value> {
    Ok(serde_json::to_value(profile)?)
}

pub fn profile_from_document(body: &Value) -> UserProfile {
    let empty = Map::new();
    let fields = body.as_object().unwrap_or(&empty);
    UserProfile {
        uid: string_field(fields, "uid"),
        email: string_field(fields, "email"),
        first_name: string_field(fields, "firstName"),
        last_name: string_field(fields, "lastName"),
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> String {
    optional_string_field(fields, key).unwrap_or_default()
}

fn optional_string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => {
            tracing::warn!("Ignoring {} with unexpected value {}", key, other);
            None
        }
    }
}

/// Ingredients are stored as a list of `{name, measure}` objects. Two older
/// shapes are also understood: parallel `ingredients` / `measures` string
/// lists, and the numbered slots of the public recipe API.
fn ingredients_field(fields: &Map<String, Value>) -> Vec<Ingredient> {
    match fields.get("ingredients") {
        Some(Value::Array(items)) => {
            let measures: &[Value] = match fields.get("measures") {
                Some(Value::Array(measures)) => measures.as_slice(),
                _ => &[],
            };
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| match item {
                    Value::String(name) => Some(Ingredient {
                        name: name.clone(),
                        measure: measures
                            .get(i)
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    }),
                    other => serde_json::from_value::<Ingredient>(other.clone())
                        .map_err(|e| tracing::warn!("Skipping unreadable ingredient: {}", e))
                        .ok(),
                })
                .collect()
        }
        Some(other) => {
            tracing::warn!("Ignoring ingredients with unexpected value {}", other);
            vec![]
        }
        None if fields.keys().any(|k| k.starts_with("strIngredient")) => {
            mealdb::decode_meal(fields).ingredients
        }
        None => vec![],
    }
}

fn media_field(fields: &Map<String, Value>, key: &str) -> Vec<MediaRef> {
    let Some(Value::Array(items)) = fields.get(key) else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(MediaRef::url(url.clone())),
            other => serde_json::from_value::<MediaRef>(other.clone())
                .map_err(|e| tracing::warn!("Skipping unreadable {} entry: {}", key, e))
                .ok(),
        })
        .collect()
}
