mod app;
mod config;
mod dispatch;
mod error;
mod leads;
mod mapper;
mod payload;
mod preview;
mod report;
mod service;
mod session;

use std::path::PathBuf;

use eframe::egui;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::app::EcgApp;
use crate::config::AppConfig;

fn main() -> eframe::Result {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecg_digitize=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Invalid configuration, using defaults");
        AppConfig::default()
    });
    tracing::info!(
        conversion_url = %config.conversion_url,
        analysis_url = %config.analysis_url,
        "Starting ECG digitizer"
    );

    let image_path = std::env::args().nth(1).map(PathBuf::from);
    let title = match image_path.as_deref().and_then(|p| p.file_name()) {
        Some(name) => format!("ECG digitizer: {}", name.to_string_lossy()),
        None => "ECG digitizer".to_string(),
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_title(&title),
        ..Default::default()
    };

    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| Ok(Box::new(EcgApp::new(cc, config, image_path)))),
    )
}
