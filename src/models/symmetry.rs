//! # 晶体对称性
//!
//! 晶胞与空间群的组合，两者均可缺失；多来源按优先级逐项合并。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`commands/maps.rs` 使用
//! - 使用 `models/cell.rs`、`symmetry/space_group.rs`

use crate::error::{Result, TwinMapError};
use crate::models::UnitCell;
use crate::symmetry::SpaceGroup;

/// 可能不完整的晶体对称性
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrystalSymmetry {
    pub unit_cell: Option<UnitCell>,
    pub space_group: Option<SpaceGroup>,
}

impl CrystalSymmetry {
    pub fn new(unit_cell: Option<UnitCell>, space_group: Option<SpaceGroup>) -> Self {
        CrystalSymmetry {
            unit_cell,
            space_group,
        }
    }

    /// 按给定顺序逐项合并，每一项取第一个非空来源
    pub fn select<'a>(sources: impl IntoIterator<Item = &'a CrystalSymmetry>) -> CrystalSymmetry {
        let mut out = CrystalSymmetry::default();
        for s in sources {
            if out.unit_cell.is_none() {
                out.unit_cell = s.unit_cell;
            }
            if out.space_group.is_none() {
                out.space_group = s.space_group.clone();
            }
        }
        out
    }

    /// 要求晶胞与空间群均已给定
    pub fn require_complete(self) -> Result<(UnitCell, SpaceGroup)> {
        let cell = self.unit_cell.ok_or(TwinMapError::UnitCellNotSpecified)?;
        let sg = self.space_group.ok_or(TwinMapError::SpaceGroupNotSpecified)?;
        Ok((cell, sg))
    }

    /// 晶胞与空间群均未给定
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.unit_cell.is_none() && self.space_group.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(a: f64) -> UnitCell {
        UnitCell::new([a, a, a, 90.0, 90.0, 90.0]).unwrap()
    }

    #[test]
    fn test_select_precedence_per_field() {
        let config = CrystalSymmetry::new(Some(cell(10.0)), None);
        let reflections = CrystalSymmetry::new(
            Some(cell(20.0)),
            Some(SpaceGroup::from_symbol("P 21 21 21").unwrap()),
        );
        let model = CrystalSymmetry::new(Some(cell(30.0)), Some(SpaceGroup::from_symbol("P1").unwrap()));

        let chosen = CrystalSymmetry::select([&config, &reflections, &model]);
        assert_eq!(chosen.unit_cell.unwrap().parameters()[0], 10.0);
        assert_eq!(chosen.space_group.unwrap().number(), 19);
    }

    #[test]
    fn test_missing_fields_are_errors() {
        let only_cell = CrystalSymmetry::new(Some(cell(10.0)), None);
        let err = only_cell.require_complete().unwrap_err();
        assert_eq!(err.to_string(), "space group not specified");

        let err = CrystalSymmetry::default().require_complete().unwrap_err();
        assert_eq!(err.to_string(), "unit cell not specified");
    }
}
