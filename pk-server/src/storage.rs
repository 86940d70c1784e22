use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Result};
use async_trait::async_trait;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};

use crate::config::StorageConfig;

/// A flat object store for recipe photos and videos.
///
/// Object names are relative, slash separated paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object and return the URL it can be fetched from.
    async fn upload(&self, rel_path: &str, content: Vec<u8>, content_type: &str)
        -> Result<String>;
    /// Names of every object starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn delete(&self, rel_path: &str) -> Result<()>;
}

/// Build the object store named in the configuration.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    Ok(match config {
        StorageConfig::Gcs { bucket, prefix } => {
            Arc::new(StorageClient::new(bucket.clone(), prefix.clone()).await?)
        }
        StorageConfig::Local { root, public_url } => {
            Arc::new(LocalStorage::new(root, public_url.clone()))
        }
    })
}

/// Google Cloud Storage bucket, optionally under a folder prefix
#[derive(Clone)]
pub struct StorageClient {
    gcs_client: Client,
    bucket: String,
    prefix: String,
}

impl StorageClient {
    pub async fn new(bucket: String, prefix: String) -> Result<Self> {
        let config = ClientConfig::default().with_auth().await?;
        let gcs_client = Client::new(config);
        Ok(Self {
            gcs_client,
            bucket,
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    fn gcs_path(&self, rel_path: &str) -> String {
        if self.prefix.is_empty() {
            rel_path.to_string()
        } else {
            format!("{}/{}", self.prefix, rel_path)
        }
    }
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn upload(
        &self,
        rel_path: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let gcs_path = self.gcs_path(rel_path);
        let mut media = Media::new(gcs_path.clone());
        media.content_type = content_type.to_string().into();
        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };
        self.gcs_client
            .upload_object(&request, content, &UploadType::Simple(media))
            .await?;
        Ok(format!(
            "https://storage.googleapis.com/{}/{}",
            self.bucket, gcs_path
        ))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let folder = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let mut names = vec![];
        let mut page_token = None;
        loop {
            let response = self
                .gcs_client
                .list_objects(&ListObjectsRequest {
                    bucket: self.bucket.clone(),
                    prefix: Some(self.gcs_path(prefix)),
                    page_token: page_token.take(),
                    ..Default::default()
                })
                .await?;
            for object in response.items.unwrap_or_default() {
                names.push(match object.name.strip_prefix(&folder) {
                    Some(rel) => rel.to_string(),
                    None => object.name.clone(),
                });
            }
            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(names)
    }

    async fn delete(&self, rel_path: &str) -> Result<()> {
        self.gcs_client
            .delete_object(&DeleteObjectRequest {
                bucket: self.bucket.clone(),
                object: self.gcs_path(rel_path),
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

/// Objects kept as files under a local directory, served elsewhere under `public_url`
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    public_url: String,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>, public_url: String) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    fn file_path(&self, rel_path: &str) -> Result<PathBuf> {
        ensure!(
            !rel_path.is_empty()
                && rel_path
                    .split('/')
                    .all(|s| !s.is_empty() && s != "." && s != ".."),
            "Invalid object path: {rel_path}"
        );
        Ok(self.root.join(rel_path))
    }
}

#[async_trait]
impl ObjectStore for LocalStorage {
    async fn upload(
        &self,
        rel_path: &str,
        content: Vec<u8>,
        _content_type: &str,
    ) -> Result<String> {
        let path = self.file_path(rel_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(format!("{}/{}", self.public_url, rel_path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = vec![];
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let rel = path
                    .strip_prefix(&self.root)?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if rel.starts_with(prefix) {
                    names.push(rel);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, rel_path: &str) -> Result<()> {
        tokio::fs::remove_file(self.file_path(rel_path)?).await?;
        Ok(())
    }
}
