//! # twinmap - 孪晶晶体学数据的图系数工具
//!
//! 对（可能）孪晶的 X 射线数据与原子模型，逐个孪晶律拟合孪晶分数与体相溶剂，
//! 去孪晶后输出 2mFo-DFc、mFo-DFc 与梯度图系数（MTZ）。
//!
//! ## 子命令
//! - `maps`   - 主流程：参数解释、对称性、孪晶律、建模、写出图系数
//! - `laws`   - 孪晶律搜索（单文件或目录批量）
//! - `params` - 输出默认参数文件
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     ├── config/    (参数树与参数解释)
//!   │     ├── parsers/   (MTZ / HKLF4 / PDB 解析)
//!   │     ├── twin/      (孪晶律)
//!   │     ├── fmodel/    (标度、孪晶模型、图系数)
//!   │     └── xray/      (结构因子与 MTZ 写出)
//!   ├── batch/      (批量处理)
//!   ├── models/ symmetry/
//!   ├── utils/      (工具函数)
//!   └── error.rs    (错误处理)
//! ```

mod batch;
mod cli;
mod commands;
mod config;
mod error;
mod fmodel;
mod models;
mod parsers;
mod symmetry;
mod twin;
mod utils;
mod xray;

use clap::Parser;
use cli::Cli;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
