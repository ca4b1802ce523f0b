//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `maps`: 孪晶数据图系数计算（主流程）
//! - `laws`: 孪晶律搜索（单文件或批量）
//! - `params`: 输出默认参数文件
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: maps, laws, params

pub mod laws;
pub mod maps;
pub mod params;

use clap::{Parser, Subcommand};

/// twinmap - 孪晶晶体学数据的图系数工具
#[derive(Parser)]
#[command(name = "twinmap")]
#[command(version)]
#[command(about = "Map coefficients for twinned X-ray diffraction data", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Compute detwinned map coefficients for every twin law
    #[command(disable_help_flag = true)]
    Maps(maps::MapsArgs),

    /// List (pseudo)merohedral twin laws for one file or a directory of files
    Laws(laws::LawsArgs),

    /// Print or write the default parameter file
    Params(params::ParamsArgs),
}
