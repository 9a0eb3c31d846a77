#![recursion_limit = "256"]

mod diagnosis_commands;

pub mod diagnosis;
pub mod logging;
pub mod model;
pub mod preview;
#[cfg(feature = "ml")]
pub mod ml;

use diagnosis::XrayClassifier;
use diagnosis_commands::AppState;
use model::AppConfig;
use tauri::Manager;

/// 設定に従って分類器（推論エンジン）を読み込む
#[cfg(feature = "ml")]
pub fn load_classifier(config: &AppConfig) -> anyhow::Result<Box<dyn XrayClassifier + Send>> {
    use burn::backend::Wgpu;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use burn_wgpu::WgpuDevice;
    use ml::InferenceEngine;
    use model::DeviceType;

    let model_path = config.model.model_path();
    tracing::info!(
        "[Startup] モデルを読み込みます: {} ({})",
        model_path.display(),
        config.device_type
    );

    let classifier: Box<dyn XrayClassifier + Send> = match config.device_type {
        DeviceType::Wgpu => Box::new(InferenceEngine::<Wgpu>::load(&model_path, WgpuDevice::default())?),
        DeviceType::Cpu => Box::new(InferenceEngine::<NdArray<f32>>::load(&model_path, NdArrayDevice::Cpu)?),
    };
    Ok(classifier)
}

#[cfg(not(feature = "ml"))]
pub fn load_classifier(_config: &AppConfig) -> anyhow::Result<Box<dyn XrayClassifier + Send>> {
    tracing::warn!("[Startup] 機械学習機能が有効化されていません");
    Ok(Box::new(diagnosis_commands::UnavailableClassifier))
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    logging::init_logging();

    let config = AppConfig::load_or_default();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(move |app| {
            // モデルが読み込めない場合は起動しない
            let classifier = load_classifier(&config)?;
            app.manage(AppState::new(classifier));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            diagnosis_commands::get_form_state,
            diagnosis_commands::get_symptoms,
            diagnosis_commands::set_symptom,
            diagnosis_commands::upload_xray,
            diagnosis_commands::run_diagnosis,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
