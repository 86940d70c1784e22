use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

/// Where a recipe came from. Set once when the recipe is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Provenance {
    /// Decoded from the public recipe API
    External,
    /// Written by a signed-in user
    UserAdded,
}

/// One ingredient line, e.g. "Flour" / "200g"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub measure: String,
}

impl Ingredient {
    pub fn new(name: impl Into<String>, measure: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measure: measure.into(),
        }
    }
}

/// A photo or video attached to a recipe.
///
/// Media submitted by a user starts out as raw bytes and is replaced by a URL
/// once it has been uploaded to object storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaRef {
    Url {
        url: String,
    },
    Bytes {
        content_type: Option<String>,
        content_bytes: Vec<u8>,
    },
}

impl MediaRef {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn bytes(content_type: Option<String>, content_bytes: Vec<u8>) -> Self {
        Self::Bytes {
            content_type,
            content_bytes,
        }
    }

    /// The remote location, if this media has been uploaded
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url { url } => Some(url),
            Self::Bytes { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Bytes { .. })
    }
}

impl std::fmt::Debug for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url { url } => f.debug_tuple("Url").field(url).finish(),
            Self::Bytes {
                content_type,
                content_bytes,
            } => f
                .debug_struct("Bytes")
                .field("content_type", content_type)
                .field("content_bytes", &content_bytes.len())
                .finish(),
        }
    }
}

/// Everything about a recipe except its identity and provenance.
///
/// This is what a user submits from the recipe form, and what replaces the
/// contents of an existing recipe on edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeDraft {
    pub name: String,
    pub category: String,
    pub area: String,
    pub instructions: String,
    pub tags: Option<String>,
    pub youtube: Option<String>,
    pub ingredients: Vec<Ingredient>,
    pub images: Vec<MediaRef>,
    pub videos: Vec<MediaRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("Recipe name is required")]
    EmptyName,
    #[error("Ingredient {0} has no name")]
    EmptyIngredient(usize),
}

impl RecipeDraft {
    /// Check the fields a user must fill in before a draft can be stored.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.name.trim().is_empty() {
            return Err(DraftError::EmptyName);
        }
        if let Some(position) = self
            .ingredients
            .iter()
            .position(|i| i.name.trim().is_empty())
        {
            return Err(DraftError::EmptyIngredient(position + 1));
        }
        Ok(())
    }
}

/// A dish, either from the public recipe API or written by a user.
///
/// The identifier and provenance cannot be changed after construction; every
/// other field is replaced wholesale through [`Recipe::replaced_by`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    id: String,
    pub name: String,
    pub category: String,
    pub area: String,
    pub instructions: String,
    pub tags: Option<String>,
    pub youtube: Option<String>,
    pub ingredients: Vec<Ingredient>,
    pub images: Vec<MediaRef>,
    pub videos: Vec<MediaRef>,
    provenance: Provenance,
}

impl Recipe {
    fn new(id: String, provenance: Provenance, draft: RecipeDraft) -> Self {
        Self {
            id,
            name: draft.name,
            category: draft.category,
            area: draft.area,
            instructions: draft.instructions,
            tags: draft.tags,
            youtube: draft.youtube,
            ingredients: draft.ingredients,
            images: draft.images,
            videos: draft.videos,
            provenance,
        }
    }

    /// A recipe that came from the public recipe API
    pub fn external(id: impl Into<String>, draft: RecipeDraft) -> Self {
        Self::new(id.into(), Provenance::External, draft)
    }

    /// A recipe authored by the signed-in user
    pub fn user_added(id: impl Into<String>, draft: RecipeDraft) -> Self {
        Self::new(id.into(), Provenance::UserAdded, draft)
    }

    /// Rebuild a recipe read back from storage
    pub fn restore(id: impl Into<String>, provenance: Provenance, draft: RecipeDraft) -> Self {
        Self::new(id.into(), provenance, draft)
    }

    /// Replace every field except the identifier and provenance.
    pub fn replaced_by(&self, draft: RecipeDraft) -> Self {
        Self::new(self.id.clone(), self.provenance, draft)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn is_user_added(&self) -> bool {
        self.provenance == Provenance::UserAdded
    }

    pub fn ingredient_names(&self) -> Vec<&str> {
        self.ingredients.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn measures(&self) -> Vec<&str> {
        self.ingredients.iter().map(|i| i.measure.as_str()).collect()
    }

    /// Individual tags from the comma separated tag string
    pub fn tag_list(&self) -> impl Iterator<Item = &str> {
        self.tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// The first uploaded image, used as the list thumbnail
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.images.iter().find_map(MediaRef::as_url)
    }

    /// Whether any photo or video still needs to be uploaded
    pub fn has_pending_media(&self) -> bool {
        self.images.iter().chain(&self.videos).any(MediaRef::is_pending)
    }
}

/// The profile document written when a user registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}
