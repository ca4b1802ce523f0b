//! # 批量处理模块
//!
//! 对一批反射/模型文件并行执行孪晶律分析。
//!
//! ## 功能
//! - 自动检测输入类型（文件/目录）
//! - 按 glob 模式收集文件
//! - rayon 线程池并行处理，indicatif 进度条
//!
//! ## 依赖关系
//! - 被 `commands/laws.rs` 使用
//! - 使用 `walkdir`、`glob`、`rayon`、`num_cpus`

pub mod collector;
pub mod runner;

pub use collector::FileCollector;
pub use runner::{BatchRunner, ProcessResult};
