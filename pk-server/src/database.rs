use anyhow::{ensure, Result};
use async_trait::async_trait;
use rusqlite::params;
use serde_json::Value;

pub const USERS: &str = "users";
pub const RECIPES: &str = "recipes";
pub const SAVED_RECIPES: &str = "savedRecipes";

/// The profile document of a user
pub fn user_path(uid: &str) -> String {
    format!("{USERS}/{uid}")
}

/// Recipes written by a user
pub fn recipes_path(uid: &str) -> String {
    format!("{USERS}/{uid}/{RECIPES}")
}

/// Recipes a user has bookmarked
pub fn saved_path(uid: &str) -> String {
    format!("{USERS}/{uid}/{SAVED_RECIPES}")
}

pub fn sqlite_current_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// A stored JSON document and where it lives
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: String,
    pub id: String,
    pub body: Value,
}

/// A hierarchical document database.
///
/// Paths alternate collection and document segments, e.g.
/// `users/{uid}/recipes/{recipe_id}`. Writes replace the whole document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>>;
    async fn set(&self, path: &str, body: &Value) -> Result<()>;
    /// Returns whether a document was removed
    async fn delete(&self, path: &str) -> Result<bool>;
    /// All documents directly inside a collection path
    async fn list(&self, collection_path: &str) -> Result<Vec<Document>>;
    /// All documents in every collection with this name, for every parent
    async fn collection_group(&self, collection: &str) -> Result<Vec<Document>>;
}

/// The parts of a document path: (parent collection path, collection name, id)
pub fn split_document_path(path: &str) -> Result<(String, String, String)> {
    let segments = path.split('/').collect::<Vec<_>>();
    ensure!(
        segments.len() >= 2 && segments.len() % 2 == 0,
        "Not a document path: {path}"
    );
    ensure!(
        segments.iter().all(|s| !s.is_empty()),
        "Empty segment in document path: {path}"
    );
    let parent = &segments[..segments.len() - 1];
    Ok((
        parent.join("/"),
        parent[parent.len() - 1].to_string(),
        segments[segments.len() - 1].to_string(),
    ))
}

fn check_collection_path(path: &str) -> Result<()> {
    let segments = path.split('/').collect::<Vec<_>>();
    ensure!(
        segments.len() % 2 == 1 && segments.iter().all(|s| !s.is_empty()),
        "Not a collection path: {path}"
    );
    Ok(())
}

#[derive(Clone)]
pub struct Database {
    pub pool: r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>,
}

impl Database {
    /// Open (or create) the database file and bring its schema up to date.
    pub async fn connect(path: &str) -> Result<Self> {
        let manager = r2d2_sqlite::SqliteConnectionManager::file(path);
        let pool = r2d2::Pool::new(manager)?;
        let me = Self { pool };
        me.migrate().await?;
        Ok(me)
    }

    /// A private in-memory database.
    ///
    /// Every in-memory connection is its own database, so the pool holds
    /// exactly one connection.
    pub async fn connect_in_memory() -> Result<Self> {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager)?;
        let me = Self { pool };
        me.migrate().await?;
        Ok(me)
    }

    /// Migrate the database to the latest version.
    async fn migrate(&self) -> Result<()> {
        let migrations = [
            include_str!("migrations/01-initial.sql"),
            include_str!("migrations/02-accounts.sql"),
        ];
        // Find the current migration version. If it fails, we need to run all the migrations.
        let conn = self.pool.get()?;
        let current_version: String = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                rusqlite::params![],
                |row| row.get(0),
            )
            .unwrap_or("0".to_string());
        let current_version = current_version.parse::<usize>().unwrap_or(0);
        ensure!(
            current_version <= migrations.len(),
            "Database schema version {current_version} is newer than this build supports"
        );
        tracing::info!("Current schema version: {}", current_version);
        for (version, migration) in migrations.iter().enumerate().skip(current_version) {
            tracing::warn!("Applying migration {}", version + 1);
            conn.execute_batch(migration)?;
        }
        Ok(())
    }

    /// Convenience method to collect rows from a query into a Vec.
    pub fn collect_rows<T: FromRow, P: rusqlite::Params>(
        &self,
        sql: &str,
        parameters: P,
    ) -> Result<Vec<T>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query(parameters)?;
        rows.mapped(T::from_row)
            .map(|r| r.map_err(Into::into))
            .collect::<Result<_>>()
    }
}

pub trait FromRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self>
    where
        Self: Sized;
}

impl FromRow for Document {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let path: String = row.get("path")?;
        let body: String = row.get("body")?;
        // A corrupt body decodes as null so one bad document can't fail a whole listing
        let body = serde_json::from_str(&body).unwrap_or_else(|e| {
            tracing::warn!("Unreadable document body at {}: {}", path, e);
            Value::Null
        });
        Ok(Self {
            id: row.get("doc_id")?,
            path,
            body,
        })
    }
}

impl Database {
    /// Run blocking SQLite work on tokio's blocking threads
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Database) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || work(db)).await?
    }
}

#[async_trait]
impl DocumentStore for Database {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let path = path.to_string();
        self.blocking(move |db| {
            Ok(db
                .collect_rows::<Document, _>("SELECT * FROM Document WHERE path = ?", params![path])?
                .pop()
                .map(|doc| doc.body))
        })
        .await
    }

    async fn set(&self, path: &str, body: &Value) -> Result<()> {
        let (parent, collection, id) = split_document_path(path)?;
        let path = path.to_string();
        let body = serde_json::to_string(body)?;
        self.blocking(move |db| {
            let conn = db.pool.get()?;
            conn.execute(
                "INSERT OR REPLACE INTO Document (path, parent, collection, doc_id, body, updated_on)
                VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    path,
                    parent,
                    collection,
                    id,
                    body,
                    sqlite_current_timestamp()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        split_document_path(path)?;
        let path = path.to_string();
        self.blocking(move |db| {
            let conn = db.pool.get()?;
            let changed = conn.execute("DELETE FROM Document WHERE path = ?", params![path])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list(&self, collection_path: &str) -> Result<Vec<Document>> {
        check_collection_path(collection_path)?;
        let collection_path = collection_path.to_string();
        self.blocking(move |db| {
            db.collect_rows(
                "SELECT * FROM Document WHERE parent = ? ORDER BY doc_id",
                params![collection_path],
            )
        })
        .await
    }

    async fn collection_group(&self, collection: &str) -> Result<Vec<Document>> {
        ensure!(
            !collection.is_empty() && !collection.contains('/'),
            "Not a collection name: {collection}"
        );
        let collection = collection.to_string();
        self.blocking(move |db| {
            db.collect_rows(
                "SELECT * FROM Document WHERE collection = ? ORDER BY path",
                params![collection],
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_paths() {
        let (parent, collection, id) = split_document_path("users/u1/recipes/r1").unwrap();
        assert_eq!(parent, "users/u1/recipes");
        assert_eq!(collection, "recipes");
        assert_eq!(id, "r1");
        assert!(split_document_path("users").is_err());
        assert!(split_document_path("users/u1/recipes").is_err());
        assert!(split_document_path("users//recipes/r1").is_err());
    }

    #[tokio::test]
    async fn set_get_replace_delete() {
        let db = Database::connect_in_memory().await.unwrap();
        let path = "users/u1/recipes/r1";
        assert_eq!(db.get(path).await.unwrap(), None);

        db.set(path, &json!({"name": "Soup"})).await.unwrap();
        db.set(path, &json!({"name": "Stew"})).await.unwrap();
        assert_eq!(db.get(path).await.unwrap(), Some(json!({"name": "Stew"})));

        assert!(db.delete(path).await.unwrap());
        assert!(!db.delete(path).await.unwrap());
        assert_eq!(db.get(path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_and_collection_group() {
        let db = Database::connect_in_memory().await.unwrap();
        db.set("users/a/recipes/1", &json!(1)).await.unwrap();
        db.set("users/a/recipes/2", &json!(2)).await.unwrap();
        db.set("users/b/recipes/3", &json!(3)).await.unwrap();
        db.set("users/a/savedRecipes/9", &json!(9)).await.unwrap();
        db.set("users/a", &json!({"uid": "a"})).await.unwrap();

        let mine = db.list(&recipes_path("a")).await.unwrap();
        assert_eq!(mine.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), ["1", "2"]);

        let everyone = db.collection_group(RECIPES).await.unwrap();
        assert_eq!(everyone.len(), 3);
        assert_eq!(everyone[2].path, "users/b/recipes/3");

        assert_eq!(db.list(&saved_path("a")).await.unwrap().len(), 1);
        assert!(db.list("users/a").await.is_err());
    }

    #[tokio::test]
    async fn migrations_are_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("potluck.db");
        let path = path.to_str().unwrap();
        {
            let db = Database::connect(path).await.unwrap();
            db.set("users/a", &json!({"uid": "a"})).await.unwrap();
        }
        let db = Database::connect(path).await.unwrap();
        assert_eq!(db.get("users/a").await.unwrap(), Some(json!({"uid": "a"})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writers_share_the_pool() {
        let db = Database::connect_in_memory().await.unwrap();
        let writers = (0..8)
            .map(|i| {
                let db = db.clone();
                tokio::spawn(async move {
                    db.set(&format!("users/a/recipes/{i}"), &json!(i)).await
                })
            })
            .collect::<Vec<_>>();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        assert_eq!(db.list(&recipes_path("a")).await.unwrap().len(), 8);
    }
}
