//! Recipe use cases for a signed-in user: saving bookmarks, writing and
//! editing their own recipes, and deleting them everywhere they are referenced.
//!
//! Multi-step operations are not transactional. If a step fails the error says
//! which step it was, and whatever the earlier steps did stays done.

use std::sync::Arc;

use pk::basic_models::{MediaRef, Provenance, Recipe, RecipeDraft};
use serde::Serialize;
use strum::{Display, IntoStaticStr};

use crate::database::{self, DocumentStore, RECIPES, SAVED_RECIPES};
use crate::media;
use crate::models;
use crate::storage::ObjectStore;

pub type BookResult<T> = Result<T, BookError>;

#[derive(thiserror::Error, Debug)]
pub enum BookError {
    #[error("No user is signed in")]
    NotAuthenticated,
    #[error("Recipe not found: {0}")]
    NotFound(String),
    #[error("Invalid recipe: {0}")]
    Invalid(#[from] pk::basic_models::DraftError),
    #[error("Invalid media: {0}")]
    InvalidMedia(String),
    #[error("Upload failed after storing {} objects: {source}", .uploaded.len())]
    UploadFailed {
        uploaded: Vec<String>,
        source: anyhow::Error,
    },
    #[error("Deleting recipe {recipe_id} stopped at the {step} step: {source}")]
    DeletionFailed {
        recipe_id: String,
        step: DeletionStep,
        source: anyhow::Error,
    },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Data access for recipes, with the backends passed in explicitly.
#[derive(Clone)]
pub struct RecipeBook {
    docs: Arc<dyn DocumentStore>,
    storage: Arc<dyn ObjectStore>,
}

impl RecipeBook {
    pub fn new(docs: Arc<dyn DocumentStore>, storage: Arc<dyn ObjectStore>) -> Self {
        Self { docs, storage }
    }

    /// Bookmark any recipe. The bookmark is a full copy of the recipe.
    pub async fn save_recipe(&self, uid: &str, recipe: &Recipe) -> BookResult<()> {
        let uid = signed_in(uid)?;
        if recipe.has_pending_media() {
            return Err(BookError::InvalidMedia(
                "Saved recipes can only reference uploaded media".into(),
            ));
        }
        self.docs
            .set(
                &saved_document(uid, recipe.id()),
                &models::recipe_to_document(recipe)?,
            )
            .await?;
        tracing::info!("User {} saved recipe {}", uid, recipe.id());
        Ok(())
    }

    /// Remove a bookmark. Returns whether there was one.
    pub async fn unsave_recipe(&self, uid: &str, recipe_id: &str) -> BookResult<bool> {
        let uid = signed_in(uid)?;
        Ok(self.docs.delete(&saved_document(uid, recipe_id)).await?)
    }

    pub async fn is_saved(&self, uid: &str, recipe_id: &str) -> BookResult<bool> {
        let uid = signed_in(uid)?;
        Ok(self
            .docs
            .get(&saved_document(uid, recipe_id))
            .await?
            .is_some())
    }

    pub async fn saved_recipes(&self, uid: &str) -> BookResult<Vec<Recipe>> {
        let uid = signed_in(uid)?;
        let docs = self.docs.list(&database::saved_path(uid)).await?;
        Ok(models::recipes_from_documents(&docs, Provenance::External))
    }

    /// Recipes written by this user
    pub async fn user_recipes(&self, uid: &str) -> BookResult<Vec<Recipe>> {
        let uid = signed_in(uid)?;
        let docs = self.docs.list(&database::recipes_path(uid)).await?;
        Ok(models::recipes_from_documents(&docs, Provenance::UserAdded))
    }

    /// Recipes written by every user
    pub async fn community_recipes(&self) -> BookResult<Vec<Recipe>> {
        let docs = self.docs.collection_group(RECIPES).await?;
        Ok(models::recipes_from_documents(&docs, Provenance::UserAdded))
    }

    pub async fn get_recipe(&self, uid: &str, recipe_id: &str) -> BookResult<Option<Recipe>> {
        let uid = signed_in(uid)?;
        let path = owned_document(uid, recipe_id);
        Ok(self.docs.get(&path).await?.map(|body| {
            models::recipe_from_document(
                &database::Document {
                    path,
                    id: recipe_id.to_string(),
                    body,
                },
                Provenance::UserAdded,
            )
        }))
    }

    /// Store a new recipe written by the user.
    ///
    /// Media are uploaded first, then the recipe document is written. If the
    /// write fails the uploaded objects stay behind and are listed in the error.
    pub async fn add_recipe(&self, uid: &str, draft: RecipeDraft) -> BookResult<Recipe> {
        let uid = signed_in(uid)?;
        draft.validate()?;
        let recipe_id = uuid::Uuid::new_v4().simple().to_string();

        let mut uploaded = vec![];
        let draft = self
            .upload_pending_media(uid, &recipe_id, draft, &mut uploaded)
            .await?;
        let recipe = Recipe::user_added(recipe_id, draft);
        self.write_owned(uid, &recipe, uploaded).await?;
        tracing::info!("User {} added recipe {}", uid, recipe.id());
        Ok(recipe)
    }

    /// Replace the contents of one of the user's recipes.
    ///
    /// The identifier and provenance stay the same. A bookmark of the recipe in
    /// the user's saved list is replaced too.
    pub async fn update_recipe(
        &self,
        uid: &str,
        recipe_id: &str,
        draft: RecipeDraft,
    ) -> BookResult<Recipe> {
        let uid = signed_in(uid)?;
        draft.validate()?;
        let existing = self
            .get_recipe(uid, recipe_id)
            .await?
            .ok_or_else(|| BookError::NotFound(recipe_id.to_string()))?;

        let mut uploaded = vec![];
        let draft = self
            .upload_pending_media(uid, recipe_id, draft, &mut uploaded)
            .await?;
        let recipe = existing.replaced_by(draft);
        self.write_owned(uid, &recipe, uploaded).await?;

        if self.is_saved(uid, recipe_id).await? {
            self.save_recipe(uid, &recipe).await?;
        }
        tracing::info!("User {} updated recipe {}", uid, recipe_id);
        Ok(recipe)
    }

    /// Delete one of the user's recipes along with its media and every
    /// bookmark of it.
    pub async fn delete_recipe(&self, uid: &str, recipe_id: &str) -> BookResult<DeletionReport> {
        let uid = signed_in(uid)?;
        if self.docs.get(&owned_document(uid, recipe_id)).await?.is_none() {
            return Err(BookError::NotFound(recipe_id.to_string()));
        }
        Deletion::new(self, uid, recipe_id).run().await
    }

    async fn write_owned(
        &self,
        uid: &str,
        recipe: &Recipe,
        uploaded: Vec<String>,
    ) -> BookResult<()> {
        let written = match models::recipe_to_document(recipe) {
            Ok(body) => self.docs.set(&owned_document(uid, recipe.id()), &body).await,
            Err(e) => Err(e),
        };
        written.map_err(|source| {
            if uploaded.is_empty() {
                BookError::Backend(source)
            } else {
                tracing::error!(
                    "Recipe {} was not written; {} uploaded objects are orphaned",
                    recipe.id(),
                    uploaded.len()
                );
                BookError::UploadFailed { uploaded, source }
            }
        })
    }

    /// Upload every photo and video that is still raw bytes, in order, and
    /// swap in their URLs. `uploaded` collects the object names as they land.
    ///
    /// Every item is checked and converted before the first upload, so bad
    /// media never leaves objects behind.
    async fn upload_pending_media(
        &self,
        uid: &str,
        recipe_id: &str,
        mut draft: RecipeDraft,
        uploaded: &mut Vec<String>,
    ) -> BookResult<RecipeDraft> {
        let images = std::mem::take(&mut draft.images)
            .into_iter()
            .map(|image| PreparedMedia::image(uid, recipe_id, image))
            .collect::<BookResult<Vec<_>>>()?;
        let videos = std::mem::take(&mut draft.videos)
            .into_iter()
            .map(|video| PreparedMedia::video(uid, recipe_id, video))
            .collect::<BookResult<Vec<_>>>()?;

        for prepared in images {
            draft.images.push(self.place(prepared, uploaded).await?);
        }
        for prepared in videos {
            draft.videos.push(self.place(prepared, uploaded).await?);
        }
        Ok(draft)
    }

    async fn place(
        &self,
        prepared: PreparedMedia,
        uploaded: &mut Vec<String>,
    ) -> BookResult<MediaRef> {
        match prepared {
            PreparedMedia::Keep(media) => Ok(media),
            PreparedMedia::Upload {
                path,
                content,
                content_type,
            } => Ok(MediaRef::url(
                self.upload(&path, content, content_type, uploaded).await?,
            )),
        }
    }

    async fn upload(
        &self,
        path: &str,
        content: Vec<u8>,
        content_type: &str,
        uploaded: &mut Vec<String>,
    ) -> BookResult<String> {
        match self.storage.upload(path, content, content_type).await {
            Ok(url) => {
                uploaded.push(path.to_string());
                Ok(url)
            }
            Err(source) => Err(BookError::UploadFailed {
                uploaded: std::mem::take(uploaded),
                source,
            }),
        }
    }
}

/// A media item that is either kept as it is or ready to upload
enum PreparedMedia {
    Keep(MediaRef),
    Upload {
        path: String,
        content: Vec<u8>,
        content_type: &'static str,
    },
}

impl PreparedMedia {
    fn image(uid: &str, recipe_id: &str, image: MediaRef) -> BookResult<Self> {
        let content_bytes = match image {
            MediaRef::Bytes { content_bytes, .. } => content_bytes,
            uploaded_already => return Ok(Self::Keep(uploaded_already)),
        };
        let webp = media::normalize_image(&content_bytes)
            .map_err(|e| BookError::InvalidMedia(e.to_string()))?;
        Ok(Self::Upload {
            path: media::image_path(uid, recipe_id, &object_name()),
            content: webp,
            content_type: "image/webp",
        })
    }

    fn video(uid: &str, recipe_id: &str, video: MediaRef) -> BookResult<Self> {
        let (content_type, content_bytes) = match video {
            MediaRef::Bytes {
                content_type,
                content_bytes,
            } => (content_type, content_bytes),
            uploaded_already => return Ok(Self::Keep(uploaded_already)),
        };
        let extension = media::check_video(&content_bytes, content_type.as_deref())
            .map_err(|e| BookError::InvalidMedia(e.to_string()))?;
        Ok(Self::Upload {
            path: media::video_path(uid, recipe_id, &object_name(), extension),
            content: content_bytes,
            content_type: media::video_content_type(extension),
        })
    }
}

/// Where a deletion is up to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionState {
    Pending,
    MediaDeleted,
    SavedRemoved,
    Done,
}

/// The step a deletion was working on when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeletionStep {
    Media,
    SavedCopies,
    Owned,
}

/// What a finished deletion removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub recipe_id: String,
    pub media_deleted: Vec<String>,
    pub saved_removed: Vec<String>,
    pub owned_removed: bool,
}

/// Deleting a user's recipe, one step at a time:
/// `Pending -> MediaDeleted -> SavedRemoved -> Done`.
///
/// Bookmarks of the recipe are removed from every user's saved list. A recipe
/// that nobody saved never has a saved list written to.
pub struct Deletion<'b> {
    book: &'b RecipeBook,
    uid: String,
    state: DeletionState,
    report: DeletionReport,
}

impl<'b> Deletion<'b> {
    pub fn new(book: &'b RecipeBook, uid: &str, recipe_id: &str) -> Self {
        Self {
            book,
            uid: uid.to_string(),
            state: DeletionState::Pending,
            report: DeletionReport {
                recipe_id: recipe_id.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn state(&self) -> DeletionState {
        self.state
    }

    pub fn report(&self) -> &DeletionReport {
        &self.report
    }

    /// Perform the next step. A failed step leaves the state where it was, so
    /// calling `step` again retries it.
    pub async fn step(&mut self) -> BookResult<DeletionState> {
        let recipe_id = self.report.recipe_id.clone();
        let fail = |step: DeletionStep| {
            let recipe_id = recipe_id.clone();
            move |source: anyhow::Error| {
                tracing::error!("Deleting recipe {} failed at {}: {:?}", recipe_id, step, source);
                BookError::DeletionFailed {
                    recipe_id,
                    step,
                    source,
                }
            }
        };

        self.state = match self.state {
            DeletionState::Pending => {
                let prefix = media::recipe_media_prefix(&self.uid, &recipe_id);
                let objects = self
                    .book
                    .storage
                    .list(&prefix)
                    .await
                    .map_err(fail(DeletionStep::Media))?;
                for object in objects {
                    self.book
                        .storage
                        .delete(&object)
                        .await
                        .map_err(fail(DeletionStep::Media))?;
                    self.report.media_deleted.push(object);
                }
                DeletionState::MediaDeleted
            }
            DeletionState::MediaDeleted => {
                let copies = self
                    .book
                    .docs
                    .collection_group(SAVED_RECIPES)
                    .await
                    .map_err(fail(DeletionStep::SavedCopies))?;
                for copy in copies {
                    if copy.id != recipe_id
                        || !models::recipe_from_document(&copy, Provenance::External)
                            .is_user_added()
                    {
                        continue;
                    }
                    self.book
                        .docs
                        .delete(&copy.path)
                        .await
                        .map_err(fail(DeletionStep::SavedCopies))?;
                    self.report.saved_removed.push(copy.path);
                }
                DeletionState::SavedRemoved
            }
            DeletionState::SavedRemoved => {
                self.report.owned_removed = self
                    .book
                    .docs
                    .delete(&owned_document(&self.uid, &recipe_id))
                    .await
                    .map_err(fail(DeletionStep::Owned))?;
                DeletionState::Done
            }
            DeletionState::Done => DeletionState::Done,
        };
        Ok(self.state)
    }

    /// Run every remaining step
    pub async fn run(mut self) -> BookResult<DeletionReport> {
        while self.step().await? != DeletionState::Done {}
        tracing::info!(
            "Deleted recipe {} ({} media objects, {} bookmarks)",
            self.report.recipe_id,
            self.report.media_deleted.len(),
            self.report.saved_removed.len()
        );
        Ok(self.report)
    }
}

fn signed_in(uid: &str) -> BookResult<&str> {
    if uid.trim().is_empty() {
        Err(BookError::NotAuthenticated)
    } else {
        Ok(uid)
    }
}

fn owned_document(uid: &str, recipe_id: &str) -> String {
    format!("{}/{}", database::recipes_path(uid), recipe_id)
}

fn saved_document(uid: &str, recipe_id: &str) -> String {
    format!("{}/{}", database::saved_path(uid), recipe_id)
}

fn object_name() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
