//! # 晶体学对称性模块
//!
//! 对称操作的解析/格式化、空间群展开及倒易空间对称性判断。
//!
//! ## 依赖关系
//! - 被 `models/`、`parsers/`、`twin/`、`xray/`、`fmodel/` 使用
//! - 子模块: ops, space_group

pub mod ops;
pub mod space_group;

pub use ops::{IntMatrix, SymOp};
pub use space_group::{asu_index_with, CrystalSystem, SpaceGroup};
