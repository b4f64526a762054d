mod handlers;

use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use common::config::AppConfig;
use proxy::SessionRegistry;

#[derive(Parser, Clone)]
#[command(name = "capture-proxy")]
pub struct Args {
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// SQLite file holding the captured messages (`:memory:` for a throwaway store).
    #[arg(long, default_value = "messages.db")]
    pub db: String,

    #[arg(long, default_value = "capture.toml")]
    pub config: String,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let port = args.port;

    let config = AppConfig::load(&args.config)?;
    let pool = db::init_pool(&args.db).await?;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    log::info!("Capture proxy listening on http://localhost:{}", port);
    log::info!(
        "Usage: http://localhost:{}/v1/chat/completions?id=your_session_id",
        port
    );
    log::info!(
        "Default route: session {} -> {}",
        config.default_session_id,
        config.default_upstream
    );

    let registry_data = web::Data::new(SessionRegistry::from_config(&config));
    let config_data = web::Data::new(config);
    let pool_data = web::Data::new(pool);
    let client_data = web::Data::new(client);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(pool_data.clone())
            .app_data(client_data.clone())
            .app_data(registry_data.clone())
            .app_data(config_data.clone())
            .default_service(web::to(handlers::capture_catch_all))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    Ok(())
}
