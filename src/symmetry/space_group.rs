//! # 空间群
//!
//! 由生成元闭包展开的空间群操作表，以及常用的倒易空间对称性判断：
//! 系统消光、中心对称反射、ε 因子、不对称单元代表指数。
//!
//! ## 数据范围
//! 65 个 Sohncke 群（大分子晶体）加上若干常见中心对称群，
//! R 格子使用六方设定（H 3, H 3 2）。
//!
//! ## 依赖关系
//! - 被 `models/symmetry.rs`、`parsers/`、`twin/`、`xray/`、`fmodel/` 使用
//! - 使用 `symmetry/ops.rs`

use crate::error::{Result, TwinMapError};
use crate::models::MillerIndex;
use crate::symmetry::ops::{self, IntMatrix, SymOp, TDEN};

use std::collections::HashSet;
use std::fmt;

/// 晶系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrystalSystem {
    Triclinic,
    Monoclinic,
    Orthorhombic,
    Tetragonal,
    Trigonal,
    Hexagonal,
    Cubic,
}

impl fmt::Display for CrystalSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrystalSystem::Triclinic => "triclinic",
            CrystalSystem::Monoclinic => "monoclinic",
            CrystalSystem::Orthorhombic => "orthorhombic",
            CrystalSystem::Tetragonal => "tetragonal",
            CrystalSystem::Trigonal => "trigonal",
            CrystalSystem::Hexagonal => "hexagonal",
            CrystalSystem::Cubic => "cubic",
        };
        write!(f, "{}", name)
    }
}

/// 空间群表条目
struct SpaceGroupEntry {
    number: u16,
    symbol: &'static str,
    point_group: &'static str,
    centering: char,
    generators: &'static [&'static str],
    aliases: &'static [&'static str],
}

const fn entry(
    number: u16,
    symbol: &'static str,
    point_group: &'static str,
    centering: char,
    generators: &'static [&'static str],
    aliases: &'static [&'static str],
) -> SpaceGroupEntry {
    SpaceGroupEntry {
        number,
        symbol,
        point_group,
        centering,
        generators,
        aliases,
    }
}

const P212121_GENS: &[&str] = &["-x+1/2,-y,z+1/2", "-x,y+1/2,-z+1/2"];
const P213_GENS: &[&str] = &["-x+1/2,-y,z+1/2", "-x,y+1/2,-z+1/2", "z,x,y"];
const P23_GENS: &[&str] = &["-x,-y,z", "-x,y,-z", "z,x,y"];
const P432_GENS: &[&str] = &["-x,-y,z", "-x,y,-z", "z,x,y", "y,x,-z"];

static SPACE_GROUP_TABLE: &[SpaceGroupEntry] = &[
    // 三斜
    entry(1, "P 1", "PG1", 'P', &[], &[]),
    entry(2, "P -1", "PG-1", 'P', &["-x,-y,-z"], &[]),
    // 单斜
    entry(3, "P 1 2 1", "PG2", 'P', &["-x,y,-z"], &["P2"]),
    entry(4, "P 1 21 1", "PG2", 'P', &["-x,y+1/2,-z"], &["P21"]),
    entry(5, "C 1 2 1", "PG2", 'C', &["-x,y,-z"], &["C2"]),
    // C2 的 I 心化设定（PDB 常用）
    entry(5, "I 1 2 1", "PG2", 'I', &["-x,y,-z"], &["I2"]),
    entry(10, "P 1 2/m 1", "PG2/m", 'P', &["-x,y,-z", "-x,-y,-z"], &["P2/M"]),
    entry(
        14,
        "P 1 21/c 1",
        "PG2/m",
        'P',
        &["-x,y+1/2,-z+1/2", "-x,-y,-z"],
        &["P21/C"],
    ),
    entry(
        15,
        "C 1 2/c 1",
        "PG2/m",
        'C',
        &["-x,y,-z+1/2", "-x,-y,-z"],
        &["C2/C"],
    ),
    // 正交
    entry(16, "P 2 2 2", "PG222", 'P', &["-x,-y,z", "-x,y,-z"], &[]),
    entry(17, "P 2 2 21", "PG222", 'P', &["-x,-y,z+1/2", "-x,y,-z+1/2"], &[]),
    entry(18, "P 21 21 2", "PG222", 'P', &["-x,-y,z", "-x+1/2,y+1/2,-z"], &[]),
    entry(19, "P 21 21 21", "PG222", 'P', P212121_GENS, &[]),
    entry(20, "C 2 2 21", "PG222", 'C', &["-x,-y,z+1/2", "-x,y,-z+1/2"], &[]),
    entry(21, "C 2 2 2", "PG222", 'C', &["-x,-y,z", "-x,y,-z"], &[]),
    entry(22, "F 2 2 2", "PG222", 'F', &["-x,-y,z", "-x,y,-z"], &[]),
    entry(23, "I 2 2 2", "PG222", 'I', &["-x,-y,z", "-x,y,-z"], &[]),
    entry(24, "I 21 21 21", "PG222", 'I', P212121_GENS, &[]),
    entry(
        61,
        "P 21/b 21/c 21/a",
        "PGmmm",
        'P',
        &["-x+1/2,-y,z+1/2", "-x,y+1/2,-z+1/2", "-x,-y,-z"],
        &["PBCA"],
    ),
    entry(
        62,
        "P 21/n 21/m 21/a",
        "PGmmm",
        'P',
        &["-x+1/2,-y,z+1/2", "-x,y+1/2,-z", "-x,-y,-z"],
        &["PNMA"],
    ),
    // 四方
    entry(75, "P 4", "PG4", 'P', &["-y,x,z"], &[]),
    entry(76, "P 41", "PG4", 'P', &["-y,x,z+1/4"], &[]),
    entry(77, "P 42", "PG4", 'P', &["-y,x,z+1/2"], &[]),
    entry(78, "P 43", "PG4", 'P', &["-y,x,z+3/4"], &[]),
    entry(79, "I 4", "PG4", 'I', &["-y,x,z"], &[]),
    entry(80, "I 41", "PG4", 'I', &["-y,x+1/2,z+1/4"], &[]),
    entry(89, "P 4 2 2", "PG422", 'P', &["-y,x,z", "-x,y,-z"], &[]),
    entry(
        90,
        "P 4 21 2",
        "PG422",
        'P',
        &["-y+1/2,x+1/2,z", "-x+1/2,y+1/2,-z"],
        &[],
    ),
    entry(91, "P 41 2 2", "PG422", 'P', &["-y,x,z+1/4", "-x,y,-z"], &[]),
    entry(
        92,
        "P 41 21 2",
        "PG422",
        'P',
        &["-y+1/2,x+1/2,z+1/4", "-x+1/2,y+1/2,-z+1/4"],
        &[],
    ),
    entry(93, "P 42 2 2", "PG422", 'P', &["-y,x,z+1/2", "-x,y,-z"], &[]),
    entry(
        94,
        "P 42 21 2",
        "PG422",
        'P',
        &["-y+1/2,x+1/2,z+1/2", "-x+1/2,y+1/2,-z+1/2"],
        &[],
    ),
    entry(95, "P 43 2 2", "PG422", 'P', &["-y,x,z+3/4", "-x,y,-z"], &[]),
    entry(
        96,
        "P 43 21 2",
        "PG422",
        'P',
        &["-y+1/2,x+1/2,z+3/4", "-x+1/2,y+1/2,-z+3/4"],
        &[],
    ),
    entry(97, "I 4 2 2", "PG422", 'I', &["-y,x,z", "-x,y,-z"], &[]),
    entry(
        98,
        "I 41 2 2",
        "PG422",
        'I',
        &["-y,x+1/2,z+1/4", "-x+1/2,y,-z+3/4"],
        &[],
    ),
    // 三方
    entry(143, "P 3", "PG3", 'P', &["-y,x-y,z"], &[]),
    entry(144, "P 31", "PG3", 'P', &["-y,x-y,z+1/3"], &[]),
    entry(145, "P 32", "PG3", 'P', &["-y,x-y,z+2/3"], &[]),
    entry(146, "H 3", "PG3", 'R', &["-y,x-y,z"], &["R3", "R3:H"]),
    entry(149, "P 3 1 2", "PG312", 'P', &["-y,x-y,z", "-y,-x,-z"], &[]),
    entry(150, "P 3 2 1", "PG321", 'P', &["-y,x-y,z", "y,x,-z"], &[]),
    entry(151, "P 31 1 2", "PG312", 'P', &["-y,x-y,z+1/3", "-y,-x,-z+2/3"], &[]),
    entry(152, "P 31 2 1", "PG321", 'P', &["-y,x-y,z+1/3", "y,x,-z"], &[]),
    entry(153, "P 32 1 2", "PG312", 'P', &["-y,x-y,z+2/3", "-y,-x,-z+1/3"], &[]),
    entry(154, "P 32 2 1", "PG321", 'P', &["-y,x-y,z+2/3", "y,x,-z"], &[]),
    entry(155, "H 3 2", "PG32", 'R', &["-y,x-y,z", "y,x,-z"], &["R32", "R32:H"]),
    // 六方
    entry(168, "P 6", "PG6", 'P', &["x-y,x,z"], &[]),
    entry(169, "P 61", "PG6", 'P', &["x-y,x,z+1/6"], &[]),
    entry(170, "P 65", "PG6", 'P', &["x-y,x,z+5/6"], &[]),
    entry(171, "P 62", "PG6", 'P', &["x-y,x,z+1/3"], &[]),
    entry(172, "P 64", "PG6", 'P', &["x-y,x,z+2/3"], &[]),
    entry(173, "P 63", "PG6", 'P', &["x-y,x,z+1/2"], &[]),
    entry(177, "P 6 2 2", "PG622", 'P', &["x-y,x,z", "y,x,-z"], &[]),
    entry(178, "P 61 2 2", "PG622", 'P', &["x-y,x,z+1/6", "y,x,-z+1/3"], &[]),
    entry(179, "P 65 2 2", "PG622", 'P', &["x-y,x,z+5/6", "y,x,-z+2/3"], &[]),
    entry(180, "P 62 2 2", "PG622", 'P', &["x-y,x,z+1/3", "y,x,-z+2/3"], &[]),
    entry(181, "P 64 2 2", "PG622", 'P', &["x-y,x,z+2/3", "y,x,-z+1/3"], &[]),
    entry(182, "P 63 2 2", "PG622", 'P', &["x-y,x,z+1/2", "y,x,-z"], &[]),
    // 立方
    entry(195, "P 2 3", "PG23", 'P', P23_GENS, &[]),
    entry(196, "F 2 3", "PG23", 'F', P23_GENS, &[]),
    entry(197, "I 2 3", "PG23", 'I', P23_GENS, &[]),
    entry(198, "P 21 3", "PG23", 'P', P213_GENS, &[]),
    entry(199, "I 21 3", "PG23", 'I', P213_GENS, &[]),
    entry(207, "P 4 3 2", "PG432", 'P', P432_GENS, &[]),
    entry(
        208,
        "P 42 3 2",
        "PG432",
        'P',
        &["-x,-y,z", "-x,y,-z", "z,x,y", "y+1/2,x+1/2,-z+1/2"],
        &[],
    ),
    entry(209, "F 4 3 2", "PG432", 'F', P432_GENS, &[]),
    entry(
        210,
        "F 41 3 2",
        "PG432",
        'F',
        &["-x,-y+1/2,z+1/2", "-x+1/2,y+1/2,-z", "z,x,y", "y+3/4,x+1/4,-z+3/4"],
        &[],
    ),
    entry(211, "I 4 3 2", "PG432", 'I', P432_GENS, &[]),
    entry(
        212,
        "P 43 3 2",
        "PG432",
        'P',
        &["-x+1/2,-y,z+1/2", "-x,y+1/2,-z+1/2", "z,x,y", "y+1/4,x+3/4,-z+3/4"],
        &[],
    ),
    entry(
        213,
        "P 41 3 2",
        "PG432",
        'P',
        &["-x+1/2,-y,z+1/2", "-x,y+1/2,-z+1/2", "z,x,y", "y+3/4,x+1/4,-z+1/4"],
        &[],
    ),
    entry(
        214,
        "I 41 3 2",
        "PG432",
        'I',
        &["-x+1/2,-y,z+1/2", "-x,y+1/2,-z+1/2", "z,x,y", "y+3/4,x+1/4,-z+1/4"],
        &[],
    ),
];

/// 格子心化平移向量（单位 1/TDEN，不含零向量）
pub fn centering_translations(centering: char) -> Vec<[i32; 3]> {
    let h = TDEN / 2;
    match centering {
        'A' => vec![[0, h, h]],
        'B' => vec![[h, 0, h]],
        'C' => vec![[h, h, 0]],
        'I' => vec![[h, h, h]],
        'F' => vec![[0, h, h], [h, 0, h], [h, h, 0]],
        'R' => vec![
            [2 * TDEN / 3, TDEN / 3, TDEN / 3],
            [TDEN / 3, 2 * TDEN / 3, 2 * TDEN / 3],
        ],
        _ => vec![],
    }
}

/// 空间群
#[derive(Debug, Clone)]
pub struct SpaceGroup {
    number: u16,
    symbol: &'static str,
    point_group: &'static str,
    centering: char,
    ops: Vec<SymOp>,
}

impl PartialEq for SpaceGroup {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl SpaceGroup {
    /// 按符号查找（忽略空格与大小写），也接受纯数字
    pub fn from_symbol(text: &str) -> Result<Self> {
        let key = normalize_symbol(text);
        if key.is_empty() {
            return Err(TwinMapError::UnknownSpaceGroup(text.to_string()));
        }
        if let Ok(number) = key.parse::<u16>() {
            return Self::from_number(number);
        }

        for e in SPACE_GROUP_TABLE {
            let compact = normalize_symbol(e.symbol);
            if compact == key
                || short_symbol(&compact) == key
                || e.aliases.iter().any(|a| normalize_symbol(a) == key)
            {
                return Self::build(e);
            }
        }

        Err(TwinMapError::UnknownSpaceGroup(text.to_string()))
    }

    /// 按国际表编号查找
    pub fn from_number(number: u16) -> Result<Self> {
        SPACE_GROUP_TABLE
            .iter()
            .find(|e| e.number == number)
            .map(Self::build)
            .unwrap_or_else(|| Err(TwinMapError::UnknownSpaceGroup(number.to_string())))
    }

    /// 由一组操作匹配表中的空间群（顺序无关，平移约化后比较）
    pub fn from_operators(ops: &[SymOp]) -> Result<Self> {
        let wanted: HashSet<SymOp> = ops.iter().map(|o| o.normalized()).collect();
        for e in SPACE_GROUP_TABLE {
            let sg = Self::build(e)?;
            if sg.ops.len() == wanted.len() && sg.ops.iter().all(|o| wanted.contains(o)) {
                return Ok(sg);
            }
        }
        Err(TwinMapError::UnknownSpaceGroup(format!(
            "no tabulated group matches {} operators",
            ops.len()
        )))
    }

    fn build(e: &SpaceGroupEntry) -> Result<Self> {
        let mut seeds = Vec::with_capacity(e.generators.len() + 3);
        for g in e.generators {
            seeds.push(SymOp::parse(g)?);
        }
        for t in centering_translations(e.centering) {
            seeds.push(SymOp::translation(t));
        }
        Ok(SpaceGroup {
            number: e.number,
            symbol: e.symbol,
            point_group: e.point_group,
            centering: e.centering,
            ops: close_group(&seeds),
        })
    }

    /// 国际表编号
    pub fn number(&self) -> u16 {
        self.number
    }

    /// Hermann–Mauguin 符号
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    /// 点群符号（MTZ 写法，如 PG222）
    pub fn point_group_symbol(&self) -> &'static str {
        self.point_group
    }

    /// 格子类型
    pub fn centering(&self) -> char {
        self.centering
    }

    /// 全部操作（含心化平移）
    pub fn operators(&self) -> &[SymOp] {
        &self.ops
    }

    /// 操作数
    pub fn order(&self) -> usize {
        self.ops.len()
    }

    /// 原始格子操作数
    pub fn order_primitive(&self) -> usize {
        self.ops.len() / (centering_translations(self.centering).len() + 1)
    }

    /// 晶系
    pub fn crystal_system(&self) -> CrystalSystem {
        let pg = self.point_group.trim_start_matches("PG");
        if pg == "23" || pg == "432" || pg.starts_with("m-3") {
            CrystalSystem::Cubic
        } else if pg.starts_with('6') {
            CrystalSystem::Hexagonal
        } else if pg.starts_with('3') {
            CrystalSystem::Trigonal
        } else if pg.starts_with('4') {
            CrystalSystem::Tetragonal
        } else if pg == "222" || pg == "mmm" {
            CrystalSystem::Orthorhombic
        } else if pg.starts_with('2') {
            CrystalSystem::Monoclinic
        } else {
            CrystalSystem::Triclinic
        }
    }

    /// 互不相同的旋转部分（点群）
    pub fn rotations(&self) -> Vec<IntMatrix> {
        let mut seen: Vec<IntMatrix> = Vec::new();
        for op in &self.ops {
            if !seen.contains(&op.rot) {
                seen.push(op.rot);
            }
        }
        seen
    }

    /// 点群中的纯旋转（det = +1）
    pub fn proper_rotations(&self) -> Vec<IntMatrix> {
        self.rotations()
            .into_iter()
            .filter(|r| ops::determinant(r) == 1)
            .collect()
    }

    /// Laue 群：点群并上反演
    pub fn laue_rotations(&self) -> Vec<IntMatrix> {
        let mut out = self.rotations();
        for r in self.rotations() {
            let neg = ops::negate(&r);
            if !out.contains(&neg) {
                out.push(neg);
            }
        }
        out
    }

    /// 系统消光
    pub fn is_sys_absent(&self, h: &MillerIndex) -> bool {
        self.ops
            .iter()
            .any(|op| op.rotate_hkl(h) == *h && op.h_dot_t(h).rem_euclid(TDEN) != 0)
    }

    /// 中心对称反射（存在 h·R = -h）
    pub fn is_centric(&self, h: &MillerIndex) -> bool {
        let neg = [-h[0], -h[1], -h[2]];
        self.ops.iter().any(|op| op.rotate_hkl(h) == neg)
    }

    /// ε 因子：使 h 不变的点群旋转数
    pub fn epsilon(&self, h: &MillerIndex) -> usize {
        self.rotations()
            .iter()
            .filter(|r| ops::hkl_times(h, r) == *h)
            .count()
            .max(1)
    }
}

impl fmt::Display for SpaceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (No. {})", self.symbol, self.number)
    }
}

/// 在给定旋转集合下取字典序最大的等效指数
pub fn asu_index_with(rotations: &[IntMatrix], h: &MillerIndex) -> MillerIndex {
    rotations
        .iter()
        .map(|r| ops::hkl_times(h, r))
        .max()
        .unwrap_or(*h)
}

/// 生成元闭包（平移模 1）
fn close_group(seeds: &[SymOp]) -> Vec<SymOp> {
    let mut ops = vec![SymOp::identity()];
    let mut seen: HashSet<SymOp> = ops.iter().copied().collect();
    for s in seeds {
        let s = s.normalized();
        if seen.insert(s) {
            ops.push(s);
        }
    }

    loop {
        let n = ops.len();
        for i in 0..n {
            for j in 0..n {
                let p = ops[i].multiply(&ops[j]).normalized();
                if seen.insert(p) {
                    ops.push(p);
                }
            }
        }
        // 安全上限：最大空间群阶数为 192
        if ops.len() == n || ops.len() > 192 {
            break;
        }
    }
    ops
}

fn normalize_symbol(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '"')
        .collect::<String>()
        .to_uppercase()
}

/// 去掉单斜完整符号中多余的 1（P1211 -> P21）
fn short_symbol(compact: &str) -> String {
    if compact.len() > 2 && compact[1..].starts_with('1') && compact.ends_with('1') {
        let inner = &compact[2..compact.len() - 1];
        if !inner.is_empty() {
            return format!("{}{}", &compact[..1], inner);
        }
    }
    compact.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_orders() {
        let cases = [
            ("P 21 21 21", 4),
            ("C2", 4),
            ("P6122", 12),
            ("I 41 2 2", 16),
            ("F432", 96),
            ("R3", 9),
            ("H 3 2", 18),
            ("P 43 21 2", 8),
            ("P 1 21/c 1", 4),
            ("I 1 2 1", 4),
        ];
        for (symbol, order) in cases {
            let sg = SpaceGroup::from_symbol(symbol).unwrap();
            assert_eq!(sg.order(), order, "{}", symbol);
        }
    }

    #[test]
    fn test_lookup_variants() {
        assert_eq!(SpaceGroup::from_symbol("p212121").unwrap().number(), 19);
        assert_eq!(SpaceGroup::from_symbol("P 1 21 1").unwrap().number(), 4);
        assert_eq!(SpaceGroup::from_symbol("P21").unwrap().number(), 4);
        assert_eq!(SpaceGroup::from_symbol("C 1 2 1").unwrap().number(), 5);
        let i2 = SpaceGroup::from_symbol("I 1 2 1").unwrap();
        assert_eq!((i2.number(), i2.centering()), (5, 'I'));
        assert_eq!(i2.crystal_system(), CrystalSystem::Monoclinic);
        assert_eq!(SpaceGroup::from_number(5).unwrap().symbol(), "C 1 2 1");
        assert_eq!(SpaceGroup::from_symbol("96").unwrap().symbol(), "P 43 21 2");
        assert!(SpaceGroup::from_symbol("X 99").is_err());
    }

    #[test]
    fn test_systematic_absences_p212121() {
        let sg = SpaceGroup::from_symbol("P212121").unwrap();
        assert!(sg.is_sys_absent(&[1, 0, 0]));
        assert!(!sg.is_sys_absent(&[2, 0, 0]));
        assert!(sg.is_sys_absent(&[0, 0, 3]));
        assert!(!sg.is_sys_absent(&[1, 1, 1]));
    }

    #[test]
    fn test_centering_absences() {
        let sg = SpaceGroup::from_symbol("C2").unwrap();
        assert!(sg.is_sys_absent(&[1, 0, 0]));
        assert!(!sg.is_sys_absent(&[1, 1, 0]));
    }

    #[test]
    fn test_centric_and_epsilon() {
        let sg = SpaceGroup::from_symbol("P212121").unwrap();
        assert!(sg.is_centric(&[1, 2, 0]));
        assert!(!sg.is_centric(&[1, 2, 3]));
        assert_eq!(sg.epsilon(&[0, 0, 4]), 2);
        assert_eq!(sg.epsilon(&[1, 2, 3]), 1);
    }

    #[test]
    fn test_asu_index_merges_equivalents() {
        let sg = SpaceGroup::from_symbol("P4").unwrap();
        let laue = sg.laue_rotations();
        let a = asu_index_with(&laue, &[1, 2, 3]);
        for h in [[-2, 1, 3], [-1, -2, 3], [2, -1, 3], [-1, -2, -3]] {
            assert_eq!(asu_index_with(&laue, &h), a);
        }
    }

    #[test]
    fn test_from_operators() {
        let sg = SpaceGroup::from_symbol("P 41 21 2").unwrap();
        let found = SpaceGroup::from_operators(sg.operators()).unwrap();
        assert_eq!(found.number(), 92);
    }

    #[test]
    fn test_crystal_system() {
        assert_eq!(
            SpaceGroup::from_symbol("P3221").unwrap().crystal_system(),
            CrystalSystem::Trigonal
        );
        assert_eq!(
            SpaceGroup::from_symbol("P23").unwrap().crystal_system(),
            CrystalSystem::Cubic
        );
        assert_eq!(
            SpaceGroup::from_symbol("C2").unwrap().crystal_system(),
            CrystalSystem::Monoclinic
        );
    }
}
