use solardesign::config::{AppConfig, IdentityBackend};
use solardesign::routes;
use solardesign::state::AppState;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().expect("invalid configuration");
    let state = AppState::from_config(&config).expect("identity service init failed");

    match &config.identity {
        IdentityBackend::Supabase(supabase) => tracing::info!(url = %supabase.url, "using supabase identity service"),
        IdentityBackend::Memory => tracing::warn!("using in-memory identity service; accounts vanish on restart"),
    }

    let app = routes::app(state);
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, cookie_secure = config.cookie_secure, "solardesign listening");
    axum::serve(listener, app).await.expect("server failed");
}
