//! 診断フォームのTauriコマンド
//!
//! ファイル選択・結果表示は `tauri-plugin-dialog` のブロッキングダイアログで行います。
//! ブロッキングAPIはメインスレッドで呼べないため、ダイアログを開くコマンドは async。

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tauri::State;
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};

use crate::diagnosis::{DiagnosisForm, DiagnosisSummary, FormError, FormSnapshot, SymptomEntry, XrayClassifier};
use crate::preview::preview_data_url;

/// ファイル選択ダイアログで選択可能な拡張子
pub const IMAGE_FILTER_EXTENSIONS: [&str; 3] = ["jpg", "png", "jpeg"];

/// 診断フォームの共有状態
pub struct AppState {
    form: Mutex<DiagnosisForm>,
    classifier: Mutex<Box<dyn XrayClassifier + Send>>,
}

impl AppState {
    pub fn new(classifier: Box<dyn XrayClassifier + Send>) -> Self {
        Self {
            form: Mutex::new(DiagnosisForm::new()),
            classifier: Mutex::new(classifier),
        }
    }
}

/// 機械学習機能が無効なビルドで使用する分類器
#[cfg(not(feature = "ml"))]
pub struct UnavailableClassifier;

#[cfg(not(feature = "ml"))]
impl XrayClassifier for UnavailableClassifier {
    fn predict_probabilities(&self, _image_path: &std::path::Path) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("機械学習機能が有効化されていません")
    }
}

/// アップロード結果
#[derive(Debug, Clone, Serialize)]
pub struct UploadedImage {
    pub path: String,
    /// 300x300 のプレビュー（data URL）
    pub preview: String,
}

fn lock_error<T>(e: std::sync::PoisonError<T>) -> String {
    format!("状態のロックに失敗しました: {}", e)
}

/// フォームの状態を取得
#[tauri::command]
pub fn get_form_state(state: State<'_, AppState>) -> Result<FormSnapshot, String> {
    let form = state.form.lock().map_err(lock_error)?;
    Ok(form.snapshot())
}

/// 症状チェックリストを取得
#[tauri::command]
pub fn get_symptoms(state: State<'_, AppState>) -> Result<Vec<SymptomEntry>, String> {
    let form = state.form.lock().map_err(lock_error)?;
    Ok(form.symptoms().entries())
}

/// 症状のチェック状態を更新
#[tauri::command]
pub fn set_symptom(symptom: String, checked: bool, state: State<'_, AppState>) -> Result<FormSnapshot, String> {
    let mut form = state.form.lock().map_err(lock_error)?;
    form.set_symptom(&symptom, checked).map_err(|e| e.to_string())?;
    Ok(form.snapshot())
}

/// 胸部X線画像を選択して読み込む
///
/// ダイアログがキャンセルされた場合は `None` を返し、状態は変更しない
#[tauri::command]
pub async fn upload_xray(app: tauri::AppHandle, state: State<'_, AppState>) -> Result<Option<UploadedImage>, String> {
    let picked = app
        .dialog()
        .file()
        .add_filter("Image Files", &IMAGE_FILTER_EXTENSIONS)
        .blocking_pick_file();

    let Some(file) = picked else {
        tracing::debug!("[Upload] ファイル選択がキャンセルされました");
        return Ok(None);
    };

    let path: PathBuf = file
        .into_path()
        .map_err(|e| format!("ファイルパスの取得エラー: {}", e))?;
    let preview = preview_data_url(&path).map_err(|e| e.to_string())?;

    let mut form = state.form.lock().map_err(lock_error)?;
    form.load_image(path.clone());
    tracing::info!("[Upload] 画像を読み込みました: {}", path.display());

    Ok(Some(UploadedImage {
        path: path.to_string_lossy().to_string(),
        preview,
    }))
}

/// 診断を実行し、結果をモーダルダイアログで表示
///
/// 画像未読み込みの場合はエラーダイアログを表示して `None` を返す（モデルは呼ばない）
#[tauri::command]
pub async fn run_diagnosis(app: tauri::AppHandle, state: State<'_, AppState>) -> Result<Option<DiagnosisSummary>, String> {
    let result = {
        let mut form = state.form.lock().map_err(lock_error)?;
        let classifier = state.classifier.lock().map_err(lock_error)?;
        form.diagnose(&**classifier)
    };

    match result {
        Ok(summary) => {
            app.dialog()
                .message(summary.render())
                .title("Diagnosis Result")
                .kind(MessageDialogKind::Info)
                .blocking_show();
            Ok(Some(summary))
        }
        Err(FormError::NoImage) => {
            app.dialog()
                .message(FormError::NoImage.to_string())
                .title("⚠️ Error")
                .kind(MessageDialogKind::Error)
                .blocking_show();
            Ok(None)
        }
        Err(e) => {
            tracing::error!("[Diagnosis] {}", e);
            Err(e.to_string())
        }
    }
}
