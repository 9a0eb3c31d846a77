//! 結核重症度分類モデルの学習
//!
//! `dataset/<クラス名>/*` から学習し、`model/tb_model.tar.gz` に保存します。
//! 学習条件は `config.json`（存在しない場合はデフォルト値）に従います。

use burn::backend::Wgpu;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;

use tb_diagnosis_lib::logging::init_logging;
use tb_diagnosis_lib::ml::train_model;
use tb_diagnosis_lib::model::{load_metadata, print_metadata_info, AppConfig, DeviceType};

fn main() -> anyhow::Result<()> {
    init_logging();

    let config = AppConfig::load_or_default();
    config.display();

    let output_path = config.model.model_path();
    let report = match config.device_type {
        DeviceType::Wgpu => {
            train_model::<Autodiff<Wgpu>>(&config.training, &output_path, WgpuDevice::default())?
        }
        DeviceType::Cpu => train_model::<Autodiff<NdArray<f32>>>(
            &config.training,
            &output_path,
            NdArrayDevice::Cpu,
        )?,
    };

    tracing::info!(
        "学習完了: {} に保存しました (学習 {} 枚 / 検証 {} 枚, {} パラメータ)",
        report.model_path.display(),
        report.train_samples,
        report.val_samples,
        report.num_params
    );
    print_metadata_info(&load_metadata(&report.model_path)?);

    Ok(())
}
