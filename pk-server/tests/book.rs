use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pk::basic_models::{Ingredient, MediaRef, Recipe, RecipeDraft};
use pk_server::book::{BookError, Deletion, DeletionState, DeletionStep, RecipeBook};
use pk_server::database::{Database, Document, DocumentStore};
use pk_server::media;
use pk_server::storage::{LocalStorage, ObjectStore};
use serde_json::Value;

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(6, 6, image::Rgb([90, 160, 30]));
    let mut out = Cursor::new(vec![]);
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn draft(name: &str) -> RecipeDraft {
    RecipeDraft {
        name: name.into(),
        category: "Dessert".into(),
        area: "British".into(),
        instructions: "Mix and bake.".into(),
        ingredients: vec![
            Ingredient::new("Flour", "200g"),
            Ingredient::new("Egg", "2"),
        ],
        ..Default::default()
    }
}

/// Delegates to a database and remembers every deleted path
struct RecordingStore {
    inner: Database,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.inner.get(path).await
    }
    async fn set(&self, path: &str, body: &Value) -> Result<()> {
        self.inner.set(path, body).await
    }
    async fn delete(&self, path: &str) -> Result<bool> {
        self.deleted.lock().unwrap().push(path.to_string());
        self.inner.delete(path).await
    }
    async fn list(&self, collection_path: &str) -> Result<Vec<Document>> {
        self.inner.list(collection_path).await
    }
    async fn collection_group(&self, collection: &str) -> Result<Vec<Document>> {
        self.inner.collection_group(collection).await
    }
}

/// Local storage that can be told to fail uploads after a number of successes,
/// or to fail every delete
struct FlakyStorage {
    inner: LocalStorage,
    uploads_left: Mutex<Option<usize>>,
    deletes_fail: Mutex<bool>,
}

#[async_trait]
impl ObjectStore for FlakyStorage {
    async fn upload(&self, rel_path: &str, content: Vec<u8>, content_type: &str) -> Result<String> {
        if let Some(left) = self.uploads_left.lock().unwrap().as_mut() {
            if *left == 0 {
                return Err(anyhow!("bucket is full"));
            }
            *left -= 1;
        }
        self.inner.upload(rel_path, content, content_type).await
    }
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }
    async fn delete(&self, rel_path: &str) -> Result<()> {
        if *self.deletes_fail.lock().unwrap() {
            return Err(anyhow!("permission denied"));
        }
        self.inner.delete(rel_path).await
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    docs: Arc<RecordingStore>,
    storage: Arc<FlakyStorage>,
    book: RecipeBook,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let docs = Arc::new(RecordingStore {
        inner: Database::connect_in_memory().await.unwrap(),
        deleted: Mutex::new(vec![]),
    });
    let storage = Arc::new(FlakyStorage {
        inner: LocalStorage::new(dir.path(), "http://media.test".into()),
        uploads_left: Mutex::new(None),
        deletes_fail: Mutex::new(false),
    });
    let book = RecipeBook::new(docs.clone(), storage.clone());
    Fixture {
        _dir: dir,
        docs,
        storage,
        book,
    }
}

#[tokio::test]
async fn add_recipe_uploads_media_and_stores_urls() {
    let f = fixture().await;
    let mut d = draft("Victoria Sponge");
    d.images = vec![
        MediaRef::url("http://elsewhere/cake.jpg"),
        MediaRef::bytes(Some("image/png".into()), png_bytes()),
    ];
    d.videos = vec![MediaRef::bytes(Some("video/webm".into()), vec![1, 2, 3])];

    let recipe = f.book.add_recipe("u1", d).await.unwrap();
    assert!(recipe.is_user_added());
    assert!(!recipe.has_pending_media());
    assert_eq!(recipe.images[0].as_url(), Some("http://elsewhere/cake.jpg"));
    let uploaded = recipe.images[1].as_url().unwrap();
    assert!(uploaded.starts_with("http://media.test/users/u1/recipes/"));
    assert!(uploaded.ends_with(".webp"));
    assert!(recipe.videos[0].as_url().unwrap().ends_with(".webm"));

    let stored = f.storage
        .list(&media::recipe_media_prefix("u1", recipe.id()))
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);

    let mine = f.book.user_recipes("u1").await.unwrap();
    assert_eq!(mine, vec![recipe.clone()]);
    assert_eq!(f.book.community_recipes().await.unwrap(), vec![recipe]);
    assert!(f.book.user_recipes("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_drafts_and_media_are_rejected() {
    let f = fixture().await;
    assert!(matches!(
        f.book.add_recipe("u1", draft("  ")).await,
        Err(BookError::Invalid(_))
    ));

    let mut d = draft("Toast");
    d.images = vec![MediaRef::bytes(None, b"not an image".to_vec())];
    assert!(matches!(
        f.book.add_recipe("u1", d).await,
        Err(BookError::InvalidMedia(_))
    ));
    assert!(f.book.user_recipes("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn bad_media_is_caught_before_anything_is_uploaded() {
    let f = fixture().await;
    let mut d = draft("Bakewell Tart");
    d.images = vec![
        MediaRef::bytes(None, png_bytes()),
        MediaRef::bytes(None, b"not an image".to_vec()),
    ];
    assert!(matches!(
        f.book.add_recipe("u1", d).await,
        Err(BookError::InvalidMedia(_))
    ));
    assert!(f.storage.list("users/u1/").await.unwrap().is_empty());

    // An empty video after a good photo
    let mut d = draft("Bakewell Tart");
    d.images = vec![MediaRef::bytes(None, png_bytes())];
    d.videos = vec![MediaRef::bytes(Some("video/mp4".into()), vec![])];
    assert!(matches!(
        f.book.add_recipe("u1", d).await,
        Err(BookError::InvalidMedia(_))
    ));
    assert!(f.storage.list("users/u1/").await.unwrap().is_empty());

    let recipe = f.book.add_recipe("u1", draft("Bakewell Tart")).await.unwrap();
    let mut edit = draft("Bakewell Tart");
    edit.images = vec![
        MediaRef::bytes(None, png_bytes()),
        MediaRef::bytes(None, vec![0; 16]),
    ];
    assert!(matches!(
        f.book.update_recipe("u1", recipe.id(), edit).await,
        Err(BookError::InvalidMedia(_))
    ));
    assert!(f.storage.list("users/u1/").await.unwrap().is_empty());
}

#[tokio::test]
async fn signed_out_calls_are_refused() {
    let f = fixture().await;
    assert!(matches!(
        f.book.saved_recipes("").await,
        Err(BookError::NotAuthenticated)
    ));
    assert!(matches!(
        f.book.add_recipe(" ", draft("Soup")).await,
        Err(BookError::NotAuthenticated)
    ));
    assert!(matches!(
        f.book.delete_recipe("", "r1").await,
        Err(BookError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn failed_upload_reports_what_was_stored() {
    let f = fixture().await;
    *f.storage.uploads_left.lock().unwrap() = Some(1);
    let mut d = draft("Scones");
    d.images = vec![
        MediaRef::bytes(None, png_bytes()),
        MediaRef::bytes(None, png_bytes()),
    ];
    match f.book.add_recipe("u1", d).await {
        Err(BookError::UploadFailed { uploaded, .. }) => {
            assert_eq!(uploaded.len(), 1);
            assert!(uploaded[0].starts_with("users/u1/recipes/"));
        }
        other => panic!("expected UploadFailed, got {other:?}"),
    }
    assert!(f.book.user_recipes("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn save_and_unsave() {
    let f = fixture().await;
    let external = Recipe::external("52772", draft("Teriyaki Chicken"));
    f.book.save_recipe("u1", &external).await.unwrap();
    f.book.save_recipe("u1", &external).await.unwrap();
    assert!(f.book.is_saved("u1", "52772").await.unwrap());
    assert_eq!(f.book.saved_recipes("u1").await.unwrap(), vec![external]);

    assert!(f.book.unsave_recipe("u1", "52772").await.unwrap());
    assert!(!f.book.unsave_recipe("u1", "52772").await.unwrap());
    assert!(f.book.saved_recipes("u1").await.unwrap().is_empty());

    let mut pending = Recipe::external("1", draft("Raw"));
    pending.images.push(MediaRef::bytes(None, vec![1]));
    assert!(matches!(
        f.book.save_recipe("u1", &pending).await,
        Err(BookError::InvalidMedia(_))
    ));
}

#[tokio::test]
async fn update_replaces_contents_and_saved_copy() {
    let f = fixture().await;
    let recipe = f.book.add_recipe("u1", draft("Pancakes")).await.unwrap();
    f.book.save_recipe("u1", &recipe).await.unwrap();

    let mut edit = draft("Fluffy Pancakes");
    edit.ingredients = vec![Ingredient::new("Milk", "300ml")];
    let updated = f
        .book
        .update_recipe("u1", recipe.id(), edit)
        .await
        .unwrap();
    assert_eq!(updated.id(), recipe.id());
    assert!(updated.is_user_added());
    assert_eq!(updated.ingredient_names(), vec!["Milk"]);

    assert_eq!(
        f.book.get_recipe("u1", recipe.id()).await.unwrap(),
        Some(updated.clone())
    );
    assert_eq!(f.book.saved_recipes("u1").await.unwrap(), vec![updated]);

    assert!(matches!(
        f.book.update_recipe("u2", recipe.id(), draft("Mine now")).await,
        Err(BookError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_removes_owned_media_and_every_saved_copy() {
    let f = fixture().await;
    let mut d = draft("Eton Mess");
    d.images = vec![MediaRef::bytes(None, png_bytes())];
    let recipe = f.book.add_recipe("u1", d).await.unwrap();
    f.book.save_recipe("u1", &recipe).await.unwrap();
    f.book.save_recipe("u2", &recipe).await.unwrap();

    let report = f.book.delete_recipe("u1", recipe.id()).await.unwrap();
    assert_eq!(report.media_deleted.len(), 1);
    assert_eq!(report.saved_removed.len(), 2);
    assert!(report.owned_removed);

    assert!(f.book.user_recipes("u1").await.unwrap().is_empty());
    assert!(f.book.saved_recipes("u1").await.unwrap().is_empty());
    assert!(f.book.saved_recipes("u2").await.unwrap().is_empty());
    assert!(f
        .storage
        .list(&media::recipe_media_prefix("u1", recipe.id()))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn deleting_an_unsaved_recipe_never_touches_saved_lists() {
    let f = fixture().await;
    let recipe = f.book.add_recipe("u1", draft("Trifle")).await.unwrap();
    // An external bookmark that happens to share the identifier is not a copy
    let lookalike = Recipe::external(recipe.id(), draft("Other Trifle"));
    f.book.save_recipe("u2", &lookalike).await.unwrap();

    let report = f.book.delete_recipe("u1", recipe.id()).await.unwrap();
    assert!(report.saved_removed.is_empty());
    assert_eq!(
        *f.docs.deleted.lock().unwrap(),
        vec![format!("users/u1/recipes/{}", recipe.id())]
    );
    assert_eq!(f.book.saved_recipes("u2").await.unwrap(), vec![lookalike]);
}

#[tokio::test]
async fn deleting_a_missing_recipe_is_not_found() {
    let f = fixture().await;
    assert!(matches!(
        f.book.delete_recipe("u1", "nope").await,
        Err(BookError::NotFound(_))
    ));
    assert!(f.docs.deleted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_deletion_step_is_reported_and_can_be_retried() {
    let f = fixture().await;
    let mut d = draft("Crumble");
    d.images = vec![MediaRef::bytes(None, png_bytes())];
    let recipe = f.book.add_recipe("u1", d).await.unwrap();
    f.book.save_recipe("u1", &recipe).await.unwrap();

    *f.storage.deletes_fail.lock().unwrap() = true;
    match f.book.delete_recipe("u1", recipe.id()).await {
        Err(BookError::DeletionFailed { step, recipe_id, .. }) => {
            assert_eq!(step, DeletionStep::Media);
            assert_eq!(recipe_id, recipe.id());
        }
        other => panic!("expected DeletionFailed, got {other:?}"),
    }
    // Nothing after the failed step ran
    assert!(f.book.is_saved("u1", recipe.id()).await.unwrap());
    assert!(f.book.get_recipe("u1", recipe.id()).await.unwrap().is_some());

    let mut deletion = Deletion::new(&f.book, "u1", recipe.id());
    assert!(deletion.step().await.is_err());
    assert_eq!(deletion.state(), DeletionState::Pending);

    *f.storage.deletes_fail.lock().unwrap() = false;
    assert_eq!(deletion.step().await.unwrap(), DeletionState::MediaDeleted);
    assert_eq!(deletion.step().await.unwrap(), DeletionState::SavedRemoved);
    assert_eq!(deletion.step().await.unwrap(), DeletionState::Done);
    assert_eq!(deletion.step().await.unwrap(), DeletionState::Done);
    assert_eq!(deletion.report().saved_removed.len(), 1);
    assert!(deletion.report().owned_removed);
    assert!(f.book.get_recipe("u1", recipe.id()).await.unwrap().is_none());
}
