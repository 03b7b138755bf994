use perpbot::bybit::{BybitAuth, BybitClient};
use perpbot::config::AppConfig;
use perpbot::db::{self, PgOrderStore};
use perpbot::services::{Manager, ManagerSettings};
use perpbot::signal::MultiTimeframeSignal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;
    tracing::info!("Database connected");

    let auth = BybitAuth::new(config.bybit_api_key.clone(), config.bybit_api_secret.clone());
    let exchange = BybitClient::new(
        reqwest::Client::new(),
        auth,
        config.testnet,
        config.symbol.clone(),
    );
    let store = PgOrderStore::new(pool);
    let signal = MultiTimeframeSignal::new();

    let settings = ManagerSettings {
        leverage: config.leverage,
        poll_interval: config.poll_interval,
    };
    let mut manager = Manager::new(exchange, store, signal, settings);

    tracing::info!(
        symbol = %config.symbol,
        leverage = %config.leverage,
        testnet = config.testnet,
        "Starting lifecycle loop"
    );
    manager.preload_history().await?;
    manager.run().await?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
