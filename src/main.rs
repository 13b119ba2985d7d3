use std::sync::Arc;
use tokio::sync::Semaphore;

mod api;
mod config;
mod error;
mod metrics;
mod model;
mod scraper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env()?;

    let shared_state = Arc::new(model::AppState {
        scraper: Arc::new(scraper::CommandScraper::new(&config)),
        scrape_permits: Semaphore::new(config.max_concurrent_scrapes),
    });

    let app = api::app(shared_state);

    let addr = format!("0.0.0.0:{}", config.port);
    println!("🚀 Server running on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
