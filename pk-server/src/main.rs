use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pk_server::{
    auth::Identity,
    book::RecipeBook,
    calendar::Calendars,
    config::Config,
    database::Database,
    logging,
    mealdb::MealDb,
    routes::{self, AppState},
    storage,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to the YAML configuration file
    #[clap(long, default_value = "potluck.yml")]
    config: String,

    /// The address and optionally port to bind to, overriding the config file
    #[clap(long)]
    address: Option<String>,

    /// Whether to use HTTPS / TLS. Needs `server.tls` in the config file.
    #[clap(long)]
    tls: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Loading configuration from {}", args.config))?;
    let _guard = logging::init(&config.logging)?;

    // connect to the database
    let db = Database::connect(&config.database.path)
        .await
        .context("Connecting to database")?;
    let docs = Arc::new(db.clone());
    let media = storage::from_config(&config.storage)
        .await
        .context("Connecting to object storage")?;

    let state = AppState {
        book: RecipeBook::new(docs.clone(), media),
        identity: Identity::new(db, docs, &config.auth),
        source: Arc::new(MealDb::from_config(&config.recipe_api)),
        calendars: Calendars::new(),
    };
    let app = routes::router(state);

    let address = args.address.unwrap_or(config.server.address);
    // In development, use HTTP. In production, use HTTPS.
    if args.tls {
        let tls = config
            .server
            .tls
            .context("--tls needs server.tls in the configuration")?;
        rustls::crypto::ring::default_provider()
            .install_default()
            .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;
        let tls_config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .context("Loading TLS certificate")?;

        let addr = address.parse()?;
        tracing::info!("Listening on {} with TLS", addr);
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await
            .context("Starting TLS server")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&address).await?;
        tracing::info!("Listening on {}", address);
        axum::serve(listener, app).await?;
    }
    Ok(())
}
