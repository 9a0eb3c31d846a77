//! アップロード画像のプレビュー生成

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// プレビューの表示サイズ
pub const PREVIEW_SIZE: u32 = 300;

/// 画像を 300x300 に縮小し、`data:image/png;base64,...` 形式で返す
pub fn preview_data_url(path: &Path) -> Result<String> {
    let img = image::open(path)
        .with_context(|| format!("画像を読み込めません: {}", path.display()))?
        .resize_exact(PREVIEW_SIZE, PREVIEW_SIZE, FilterType::Triangle);

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("プレビュー画像のエンコードに失敗しました")?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
}
