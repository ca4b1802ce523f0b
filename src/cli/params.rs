//! # params 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/params.rs`

use clap::Args;
use std::path::PathBuf;

/// params 子命令参数
#[derive(Args, Debug)]
pub struct ParamsArgs {
    /// Write the default parameters to this TOML file instead of printing them
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
