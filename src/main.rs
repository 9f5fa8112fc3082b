mod config;
mod domain;
mod error;
mod notify;
mod review;
mod routes;
mod scan;
mod state;
mod storage;
mod store;
mod workflow;

#[cfg(test)]
mod test_utils;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::notify::{Notifier, TemplateMailer};
use crate::scan::ScanEngine;
use crate::storage::FileStore;
use crate::store::{MemoryStore, PgStore, Store};
use crate::workflow::Desk;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "referee_desk=info,tower_http=info".into()),
        )
        .init();

    let config = config::Config::from_env()?;
    let config = Arc::new(config);

    let files = FileStore::new(config.upload_folder.clone());
    files.ensure_dir()?;

    let store: Arc<dyn Store> = if config.uses_memory_store() {
        tracing::warn!("using the in-memory store, nothing survives a restart");
        Arc::new(MemoryStore::new())
    } else {
        let pg = PgStore::connect(&config.database_url).await?;
        pg.run_migrations().await?;
        Arc::new(pg)
    };

    // No defaults are assumed if the settings row cannot be loaded or created.
    let settings = store.settings().await?;
    tracing::info!(
        reports_expected = settings.number_of_reports_expected,
        "duration settings loaded"
    );

    let mailer = Arc::new(TemplateMailer::new(&config.template_dir)?);
    let notifier = Notifier::new(store.clone(), mailer, config.notifier());
    let scans = ScanEngine::new(store.clone(), notifier.clone());
    let desk = Desk::new(store.clone(), notifier, scans.clone());

    let _scan_tasks = scan::spawn_scans(scans.clone(), config.scan_interval);

    let state = Arc::new(state::AppState {
        desk,
        scans,
        files,
    });

    let app = Router::new()
        .route("/api/users", post(routes::create_user))
        .route(
            "/api/settings",
            get(routes::get_settings).put(routes::update_settings),
        )
        .route("/api/submissions", post(routes::create_submission))
        .route("/api/submissions/:id", get(routes::view_submission))
        .route(
            "/api/submissions/:id/area-editor",
            post(routes::assign_area_editor),
        )
        .route("/api/submissions/:id/referees", post(routes::invite_referee))
        .route("/api/submissions/:id/decision", post(routes::enter_decision))
        .route("/api/submissions/:id/approve", post(routes::approve_decision))
        .route("/api/submissions/:id/withdraw", post(routes::withdraw_submission))
        .route("/api/submissions/:id/archive", post(routes::set_archived))
        .route("/api/submissions/:id/revisions", post(routes::submit_revision))
        .route("/api/assignments/:id/respond", post(routes::respond))
        .route(
            "/api/assignments/:id/report",
            post(routes::submit_report).put(routes::save_report_draft),
        )
        .route("/api/assignments/:id/cancel", post(routes::cancel_assignment))
        .route("/api/scans/:name/run", post(routes::run_scan))
        .route(
            "/api/files",
            post(routes::upload_file).layer(DefaultBodyLimit::max(routes::UPLOAD_BODY_LIMIT)),
        )
        .route("/api/files/:reference", get(routes::download_file))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Referee desk listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
