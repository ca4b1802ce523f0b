//! # laws 子命令 CLI 定义
//!
//! 由晶胞与空间群搜索格子对称性，列出可能的孪晶律
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/laws.rs`

use clap::Args;
use std::path::PathBuf;

/// laws 子命令参数
#[derive(Args, Debug)]
pub struct LawsArgs {
    /// Input file (.mtz, .hkl, .pdb) or directory for batch processing
    pub input: PathBuf,

    /// Maximum Le Page delta (degrees) for lattice symmetry
    #[arg(long, default_value_t = 3.0)]
    pub max_delta: f64,

    /// Unit cell "a b c alpha beta gamma" (overrides the file)
    #[arg(long)]
    pub unit_cell: Option<String>,

    /// Space group symbol or number (overrides the file)
    #[arg(long)]
    pub space_group: Option<String>,

    /// File pattern for batch mode (comma-separated)
    #[arg(long, default_value = "*.mtz,*.hkl,*.pdb")]
    pub pattern: String,

    /// Number of parallel jobs (0 = all CPUs)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Search subdirectories recursively
    #[arg(short, long, default_value_t = false)]
    pub recursive: bool,
}
