use actix::Actor;
use actix_web::{App, HttpServer, middleware::Logger, web};
use geo_royale_server::config::Config;
use geo_royale_server::db;
use geo_royale_server::game::manager::BattleRoyaleManager;
use geo_royale_server::game::registry::SessionRegistry;
use geo_royale_server::handlers::configure_routes;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting battle royale server...");
    let config = Config::load()?;

    // データベース初期化（出題ロケーション）
    let db_pool = db::init_db(&config.database_url).await?;
    db::seed_locations(&db_pool).await?;

    // 共有状態初期化
    let sessions = SessionRegistry::new().shared();

    // マネージャーアクター起動
    let manager = BattleRoyaleManager::new(sessions.clone(), config.timing).start();

    let address = (config.host.clone(), config.port);
    info!("Listening on http://{}:{}", address.0, address.1);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::new(sessions.clone()))
            .app_data(web::Data::new(manager.clone()))
            .configure(configure_routes)
    })
    .bind(address)?
    .run()
    .await?;

    info!("Server shut down");
    Ok(())
}
