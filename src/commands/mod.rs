//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `config/`, `parsers/`, `fmodel/`, `twin/`, `utils/`
//! - 子模块: maps, laws, params

pub mod laws;
pub mod maps;
pub mod params;

use crate::cli::Commands;
use crate::error::Result;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Maps(args) => maps::execute(args),
        Commands::Laws(args) => laws::execute(args),
        Commands::Params(args) => params::execute(args),
    }
}
