use anyhow::Result;
use tradelink::api::ApiServer;
use tradelink::util::db::Db;
use tradelink::util::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    env::preflight_check(
        "api_server",
        &["API_SECRET"],
        &["API_HOST", "API_PORT", "DATABASE_URL", "ALLOWED_ORIGINS"],
    )?;

    let server = ApiServer::from_env()?;
    let database_url = env::db_url()?;
    let max_connections = env::env_parse("DB_MAX_CONNECTIONS", 10u32);
    let db = Db::connect(&database_url, max_connections).await?;

    server.run(db).await
}
