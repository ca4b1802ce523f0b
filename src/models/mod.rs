//! # 数据模型模块
//!
//! 晶胞、晶体对称性、衍射数据与原子模型的统一表示。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`twin/`、`xray/`、`fmodel/`、`commands/` 使用
//! - 子模块: cell, miller, structure, symmetry

pub mod cell;
pub mod miller;
pub mod structure;
pub mod symmetry;

pub use cell::UnitCell;
pub use miller::{FreeFlags, MillerIndex, ObservationType, ReflectionData, ResolutionBinner};
pub use structure::{Atom, AtomicModel};
pub use symmetry::CrystalSymmetry;
