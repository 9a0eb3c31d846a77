//! ログ出力の初期化
//!
//! `tracing` の購読者を設定します。`RUST_LOG` が未設定の場合は `info` レベル。
//! Burn 内部（wgpu, cubecl）のログは `warn` 以上に抑制します。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn,cubecl=warn";

/// ログ出力を初期化（2回目以降の呼び出しは無視）
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();

    if result.is_err() {
        tracing::debug!("[Logging] 既に初期化されています");
    }
}
