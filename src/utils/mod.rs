//! # 工具函数模块
//!
//! 提供美化输出（含日志文件镜像）、进度条等工具。
//!
//! ## 依赖关系
//! - 被 `commands/`、`fmodel/`、`twin/` 等模块使用
//! - 子模块: output, progress

pub mod output;
pub mod progress;
