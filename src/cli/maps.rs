//! # maps 子命令 CLI 定义
//!
//! 参数以 `key=value` 或文件路径形式原样交给参数解释器，
//! 因此关闭 clap 自带的帮助选项，由命令自身处理 `-h`/`--h`/`--help`。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/maps.rs`

use clap::Args;

/// maps 子命令参数
#[derive(Args, Debug)]
pub struct MapsArgs {
    /// Only write the log file, no terminal output
    #[arg(long, default_value_t = false)]
    pub quiet: bool,

    /// Reflection file, model file, parameter file or key=value assignments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
