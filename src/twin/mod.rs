//! # 孪晶模块
//!
//! 孪晶律的枚举、解析与格式化。
//!
//! ## 依赖关系
//! - 被 `commands/`、`fmodel/twin_manager.rs` 使用
//! - 子模块: laws

pub mod laws;

pub use laws::{lattice_rotations, TwinLaw, TwinLawSearch};
