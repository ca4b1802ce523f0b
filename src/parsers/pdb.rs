//! # PDB 坐标文件解析器
//!
//! ## 读取的记录
//! ```text
//! CRYST1   52.000   58.000   63.000  90.00  90.00  90.00 P 21 21 21    4
//! ATOM      1  N   MET A   1      11.104   6.134  -6.504  1.00 25.00           N
//! ```
//! - CRYST1: 7-15 a, 16-24 b, 25-33 c, 34-40 α, 41-47 β, 48-54 γ, 56-66 空间群
//! - ATOM/HETATM: 13-16 原子名, 31-54 坐标, 55-60 占有率, 61-66 B, 77-78 元素
//!
//! 只读取第一个 MODEL。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 使用
//! - 使用 `models/structure.rs`、`xray/scattering.rs`（元素规范化）

use crate::error::{Result, TwinMapError};
use crate::models::{Atom, AtomicModel, CrystalSymmetry, UnitCell};
use crate::symmetry::SpaceGroup;
use crate::utils::output;
use crate::xray::scattering::normalize_element;

use std::fs;
use std::path::Path;

/// 解析 PDB 文件
pub fn parse_pdb_file(path: &Path) -> Result<AtomicModel> {
    let content = fs::read_to_string(path).map_err(|e| TwinMapError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_pdb_content(
        &content,
        path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown"),
    )
    .map_err(|reason| TwinMapError::ParseError {
        format: "PDB".to_string(),
        path: path.display().to_string(),
        reason,
    })
}

/// 从字符串内容解析 PDB
pub fn parse_pdb_content(content: &str, name: &str) -> std::result::Result<AtomicModel, String> {
    let mut model = AtomicModel::new(name, Vec::new());

    for (line_no, line) in content.lines().enumerate() {
        let record: String = line.chars().take(6).collect();
        match record.trim_end() {
            "CRYST1" => model.symmetry = parse_cryst1(line),
            "ATOM" | "HETATM" => {
                let atom = parse_atom(line).map_err(|e| format!("line {}: {}", line_no + 1, e))?;
                model.atoms.push(atom);
            }
            "ENDMDL" => break,
            _ => {}
        }
    }

    Ok(model)
}

fn column(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    if start >= end {
        return "";
    }
    line.get(start..end).map(str::trim).unwrap_or("")
}

/// CRYST1 记录；无法识别的字段记为缺失
pub fn parse_cryst1(line: &str) -> CrystalSymmetry {
    let nums: Option<Vec<f64>> = [(6, 15), (15, 24), (24, 33), (33, 40), (40, 47), (47, 54)]
        .iter()
        .map(|&(a, b)| column(line, a, b).parse().ok())
        .collect();
    let cell = nums.and_then(|v| UnitCell::new([v[0], v[1], v[2], v[3], v[4], v[5]]).ok());
    // 1×1×1 晶胞为占位值
    let cell = cell.filter(|c| {
        let p = c.parameters();
        !(p[0] == 1.0 && p[1] == 1.0 && p[2] == 1.0)
    });

    let symbol = column(line, 55, 66);
    let space_group = if symbol.is_empty() {
        None
    } else {
        match SpaceGroup::from_symbol(symbol) {
            Ok(sg) => Some(sg),
            Err(_) => {
                output::print_warning(&format!("Unrecognized space group in CRYST1: '{}'", symbol));
                None
            }
        }
    };

    CrystalSymmetry::new(cell, space_group)
}

fn parse_atom(line: &str) -> std::result::Result<Atom, String> {
    let coord = |a, b, what: &str| {
        column(line, a, b)
            .parse::<f64>()
            .map_err(|_| format!("bad {} coordinate", what))
    };
    let xyz = [coord(30, 38, "x")?, coord(38, 46, "y")?, coord(46, 54, "z")?];
    let occupancy = column(line, 54, 60).parse().unwrap_or(1.0);
    let b_iso = column(line, 60, 66).parse().unwrap_or(0.0);

    let name = column(line, 12, 16).to_string();
    let element_field = column(line, 76, 78);
    let element = if !element_field.is_empty() {
        normalize_element(element_field)
    } else {
        element_from_name(line)
    };
    if element.is_empty() {
        return Err(format!("cannot determine element for atom '{}'", name));
    }

    let mut atom = Atom::new(element, xyz).with_occupancy(occupancy).with_b_iso(b_iso);
    atom.name = name;
    Ok(atom)
}

/// 元素列缺失时由原子名推断：13 列为空格时元素为单字母
fn element_from_name(line: &str) -> String {
    let raw = line.get(12..14).unwrap_or("");
    if raw.starts_with(' ') || raw.starts_with(|c: char| c.is_ascii_digit()) {
        normalize_element(&raw[1..])
    } else {
        normalize_element(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
HEADER    TEST
CRYST1   52.000   58.000   63.000  90.00  90.00  90.00 P 21 21 21    4
ATOM      1  N   MET A   1      11.104   6.134  -6.504  1.00 25.00           N
ATOM      2  CA  MET A   1      11.639   6.071  -5.147  1.00 26.50           C
HETATM    3 FE   HEM A 101       1.000   2.000   3.000  0.50 30.00          FE3+
ATOM      4  SD  MET A   1      10.000   5.000  -4.000  1.00 40.00
ENDMDL
ATOM      5  N   MET A   1      11.104   6.134  -6.504  1.00 25.00           N
";

    #[test]
    fn test_parse_pdb() {
        let model = parse_pdb_content(SAMPLE, "sample.pdb").unwrap();
        assert_eq!(model.len(), 4);
        assert_eq!(model.atoms[0].element, "N");
        assert_eq!(model.atoms[1].element, "C");
        assert_eq!(model.atoms[2].element, "Fe");
        assert!((model.atoms[2].occupancy - 0.5).abs() < 1e-12);
        assert_eq!(model.atoms[3].element, "S");
        assert!((model.atoms[1].xyz[2] + 5.147).abs() < 1e-9);
        assert!((model.atoms[1].b_iso - 26.5).abs() < 1e-9);
    }

    #[test]
    fn test_cryst1() {
        let model = parse_pdb_content(SAMPLE, "sample.pdb").unwrap();
        let cell = model.symmetry.unit_cell.unwrap();
        assert!((cell.parameters()[1] - 58.0).abs() < 1e-9);
        assert_eq!(model.symmetry.space_group.unwrap().number(), 19);
    }

    #[test]
    fn test_placeholder_cell_is_ignored() {
        let sym = parse_cryst1("CRYST1    1.000    1.000    1.000  90.00  90.00  90.00 P 1           1");
        assert!(sym.unit_cell.is_none());
        assert_eq!(sym.space_group.unwrap().number(), 1);
    }

    #[test]
    fn test_bad_coordinates_are_errors() {
        let bad = "ATOM      1  N   MET A   1      xx.xxx   6.134  -6.504  1.00 25.00           N\n";
        assert!(parse_pdb_content(bad, "bad").is_err());
    }
}
