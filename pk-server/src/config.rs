use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub recipe_api: RecipeApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load the configuration from a YAML file.
    pub fn load(yml_path: &str) -> anyhow::Result<Self> {
        let yml = std::fs::read_to_string(yml_path)?;
        Self::from_yaml(&yml)
    }

    pub fn from_yaml(yml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yml)?;
        Ok(config)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub tls: Option<TLSConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TLSConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Where recipe photos and videos are kept
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Gcs {
        bucket: String,
        #[serde(default)]
        prefix: String,
    },
    Local {
        root: String,
        /// Base URL the root directory is served under
        public_url: String,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct RecipeApiConfig {
    pub url: String,
}

impl Default for RecipeApiConfig {
    fn default() -> Self {
        Self {
            url: "https://www.themealdb.com/api/json/v1/1/search.php?s=".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    pub min_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            min_password_len: 6,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    /// Write JSON logs to a daily rolling file in this directory instead of stdout
    pub directory: Option<String>,
    #[serde(default = "default_log_file")]
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_name: default_log_file(),
        }
    }
}

fn default_log_file() -> String {
    "potluck.log".into()
}
