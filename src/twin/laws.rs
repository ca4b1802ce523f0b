//! # 孪晶律枚举
//!
//! 通过格子对称性搜索给出与空间群兼容的孪晶律。
//!
//! ## 算法
//! 1. 将惯用晶胞换到约化原胞（心化格子的格子对称操作在惯用基下可能带分数系数）
//! 2. 候选二重轴：原胞基下元素取 {-1, 0, 1}、det = +1、R² = I 的整数矩阵
//! 3. Le Page δ：正空间轴 u（R+I 的非零列）与倒空间轴 h（R+I 的非零行）
//!    之间的夹角，保留 δ ≤ max_delta 的二重轴
//! 4. 将保留的二重轴与晶体点群的纯旋转闭包为格子旋转群
//! 5. 格子群对晶体点群作陪集分解，每个非平凡陪集给出一条孪晶律，
//!    再换回惯用基（有理系数的 Miller 指数算符）
//!
//! ## 依赖关系
//! - 被 `commands/maps.rs`、`commands/laws.rs` 使用
//! - 使用 `symmetry/`、`models/cell.rs`
//! - 使用 `tabled` 打印孪晶律表

use crate::error::{Result, TwinMapError};
use crate::models::{MillerIndex, UnitCell};
use crate::symmetry::ops::{self, HklOperator, IntMatrix, IDENTITY};
use crate::symmetry::{CrystalSystem, SpaceGroup};

use nalgebra::{Matrix3, Vector3};
use std::fmt;
use tabled::{Table, Tabled};

/// 格子旋转群元素上限
const LATTICE_GROUP_CAP: usize = 48;

/// 基约化的最大轮数
const MAX_REDUCTION_ROUNDS: usize = 64;

/// 孪晶类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinType {
    /// 格子对称性由晶系决定
    Merohedral,
    /// 格子对称性偶然高于晶系
    PseudoMerohedral,
    /// 用户指定
    UserDefined,
}

impl fmt::Display for TwinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TwinType::Merohedral => "M",
            TwinType::PseudoMerohedral => "PM",
            TwinType::UserDefined => "user",
        };
        write!(f, "{}", s)
    }
}

/// 孪晶律：作用于 Miller 指数 h' = h·M
#[derive(Debug, Clone, PartialEq)]
pub struct TwinLaw {
    /// 倒空间算符 M（惯用基）
    pub operator: HklOperator,
    /// Le Page δ（度）
    pub delta: f64,
    pub kind: TwinType,
}

impl TwinLaw {
    /// 孪晶相关指数；不满足心化条件的指数没有整数像
    pub fn apply(&self, h: &MillerIndex) -> Option<MillerIndex> {
        self.operator.apply(h)
    }

    /// "h,-k,-l" 形式
    pub fn as_hkl(&self) -> String {
        self.operator.as_hkl()
    }

    /// 二重轴方向（正空间），非二重操作返回 None
    pub fn axis(&self) -> Option<[i32; 3]> {
        twofold_axes(&self.operator.num, self.operator.den).map(|(u, _)| u)
    }

    /// 解析用户给定的孪晶律（"h,-k,-l"、"1/2*h+3/2*k,..." 或 "x,-y,-z" 形式）
    pub fn parse(text: &str) -> Result<Self> {
        let err = |reason: String| TwinMapError::InvalidTwinLaw {
            law: text.to_string(),
            reason,
        };
        let lower = text.trim().to_lowercase();
        let hkl_form = lower.chars().any(|c| matches!(c, 'h' | 'k' | 'l'));
        let xyz_form = lower.chars().any(|c| matches!(c, 'x' | 'y' | 'z'));
        let (rows, trans) = match (hkl_form, xyz_form) {
            (true, false) => ops::parse_scaled_triplet(&lower, ['h', 'k', 'l']).map_err(err)?,
            (false, true) => ops::parse_scaled_triplet(&lower, ['x', 'y', 'z']).map_err(err)?,
            _ => return Err(err("use either h,k,l or x,y,z notation".to_string())),
        };
        if trans != [0; 3] {
            return Err(err("twin laws must not contain translations".to_string()));
        }
        // h,k,l 形式每行是一个输出分量，对应 M 的一列
        let scaled = if hkl_form { ops::transpose(&rows) } else { rows };
        let operator = HklOperator::new(scaled, ops::TDEN);
        if !operator.is_unimodular() {
            let det = ops::determinant(&operator.num) as f64 / (operator.den as f64).powi(3);
            return Err(err(format!("determinant is {}, expected ±1", det)));
        }
        Ok(TwinLaw {
            operator,
            delta: 0.0,
            kind: TwinType::UserDefined,
        })
    }
}

impl fmt::Display for TwinLaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hkl())
    }
}

/// 格子对称性分析结果
#[derive(Debug, Clone)]
pub struct TwinLawSearch {
    /// 格子旋转群（含晶体点群纯旋转，惯用基）
    pub lattice_group: Vec<HklOperator>,
    /// 孪晶律
    pub laws: Vec<TwinLaw>,
    pub max_delta: f64,
}

impl TwinLawSearch {
    /// 执行格子对称性搜索
    pub fn run(cell: &UnitCell, sg: &SpaceGroup, max_delta: f64) -> Self {
        let conventional_metric = cell.metric_tensor();
        let basis = PrimitiveBasis::for_centering(sg.centering()).reduced(&conventional_metric);
        let metric = basis.metric(&conventional_metric);
        let point_group: Vec<IntMatrix> = sg
            .proper_rotations()
            .iter()
            .filter_map(|r| basis.to_primitive(r))
            .collect();

        let twofolds: Vec<(IntMatrix, f64)> = candidate_twofolds()
            .into_iter()
            .filter_map(|r| le_page_delta(&metric, &r).map(|d| (r, d)))
            .filter(|(_, d)| *d <= max_delta)
            .collect();

        let mut seeds = point_group.clone();
        seeds.extend(twofolds.iter().map(|(r, _)| *r));
        let lattice = close_rotations(&seeds, LATTICE_GROUP_CAP);

        let ideal = ideal_metric(sg.crystal_system());
        let largest_delta = twofolds.iter().map(|(_, d)| *d).fold(0.0, f64::max);

        let mut assigned: Vec<IntMatrix> = point_group.clone();
        let mut laws = Vec::new();
        for g in &lattice {
            if assigned.contains(g) {
                continue;
            }
            let coset: Vec<IntMatrix> = point_group.iter().map(|p| ops::mat_mul(g, p)).collect();
            assigned.extend(coset.iter().copied());

            let (operator, delta) = pick_representative(&basis, &metric, &coset);
            let kind = if preserves_metric(&operator, &ideal) {
                TwinType::Merohedral
            } else {
                TwinType::PseudoMerohedral
            };
            laws.push(TwinLaw {
                operator,
                delta: delta.unwrap_or(largest_delta),
                kind,
            });
        }

        laws.sort_by(|a, b| {
            a.delta
                .total_cmp(&b.delta)
                .then_with(|| a.as_hkl().cmp(&b.as_hkl()))
        });

        TwinLawSearch {
            lattice_group: lattice.iter().map(|r| basis.to_conventional(r)).collect(),
            laws,
            max_delta,
        }
    }

    /// 孪晶律表
    pub fn table(&self) -> String {
        #[derive(Tabled)]
        struct LawRow {
            #[tabled(rename = "#")]
            index: usize,
            #[tabled(rename = "Operator")]
            operator: String,
            #[tabled(rename = "Type")]
            kind: String,
            #[tabled(rename = "Axis")]
            axis: String,
            #[tabled(rename = "Le Page δ (°)")]
            delta: String,
        }

        let rows: Vec<LawRow> = self
            .laws
            .iter()
            .enumerate()
            .map(|(i, law)| LawRow {
                index: i + 1,
                operator: law.as_hkl(),
                kind: law.kind.to_string(),
                axis: law
                    .axis()
                    .map(|u| format!("[{} {} {}]", u[0], u[1], u[2]))
                    .unwrap_or_else(|| "-".to_string()),
                delta: format!("{:.3}", law.delta),
            })
            .collect();
        Table::new(&rows).to_string()
    }

    /// 打印分析报告
    pub fn show(&self) {
        use crate::utils::output;

        output::print_line(&format!(
            "Lattice symmetry search with max delta {:.2}°: {} rotation(s) in lattice group",
            self.max_delta,
            self.lattice_group.len()
        ));
        if self.laws.is_empty() {
            output::print_line("No (pseudo)merohedral twin laws were found.");
        } else {
            output::print_line(&format!("{} twin law(s) found:", self.laws.len()));
            output::print_block(self.table());
            output::print_line("M: merohedral twin law, PM: pseudo-merohedral twin law");
        }
    }
}

/// 约化原胞基：列向量为以惯用晶胞分数坐标表示的原胞基矢，num / den
#[derive(Debug, Clone)]
struct PrimitiveBasis {
    num: IntMatrix,
    den: i32,
}

impl PrimitiveBasis {
    fn for_centering(centering: char) -> Self {
        let num = match centering {
            'A' => [[6, 0, 0], [0, 3, -3], [0, 3, 3]],
            'B' => [[3, 0, -3], [0, 6, 0], [3, 0, 3]],
            'C' => [[3, -3, 0], [3, 3, 0], [0, 0, 6]],
            'I' => [[-3, 3, 3], [3, -3, 3], [3, 3, -3]],
            'F' => [[0, 3, 3], [3, 0, 3], [3, 3, 0]],
            // 六方设定下的正向（obverse）菱面体心化
            'R' => [[4, -2, -2], [2, 2, -4], [2, 2, 2]],
            _ => return PrimitiveBasis { num: IDENTITY, den: 1 },
        };
        PrimitiveBasis { num, den: 6 }
    }

    fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|i, j| self.num[i][j] as f64 / self.den as f64)
    }

    /// 原胞基下的度规张量 Bᵀ·G·B
    fn metric(&self, conventional: &Matrix3<f64>) -> Matrix3<f64> {
        let b = self.matrix();
        b.transpose() * conventional * b
    }

    /// 反复以 b_i ± b_j 替换更长的基矢，直到没有更短的组合
    fn reduced(self, conventional: &Matrix3<f64>) -> Self {
        let g = self.metric(conventional);
        let norm2 = |v: [i32; 3]| {
            let v = Vector3::new(v[0] as f64, v[1] as f64, v[2] as f64);
            v.dot(&(g * v))
        };
        let column = |t: &IntMatrix, j: usize| [t[0][j], t[1][j], t[2][j]];

        let mut t = IDENTITY;
        for _ in 0..MAX_REDUCTION_ROUNDS {
            let mut changed = false;
            for i in 0..3 {
                for j in (0..3).filter(|&j| j != i) {
                    for sign in [1, -1] {
                        let (ci, cj) = (column(&t, i), column(&t, j));
                        let candidate = [ci[0] + sign * cj[0], ci[1] + sign * cj[1], ci[2] + sign * cj[2]];
                        if norm2(candidate) < norm2(ci) * (1.0 - 1e-9) {
                            for (row, v) in t.iter_mut().zip(candidate) {
                                row[i] = v;
                            }
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
        PrimitiveBasis {
            num: ops::mat_mul(&self.num, &t),
            den: self.den,
        }
    }

    /// 惯用基整数旋转 → 原胞基 B⁻¹·R·B；不是格子操作时返回 None
    fn to_primitive(&self, r: &IntMatrix) -> Option<IntMatrix> {
        let det = ops::determinant(&self.num);
        let p = ops::mat_mul(&ops::mat_mul(&ops::adjugate(&self.num), r), &self.num);
        if det == 0 || p.iter().flatten().any(|v| v % det != 0) {
            return None;
        }
        Some(p.map(|row| row.map(|v| v / det)))
    }

    /// 原胞基旋转 → 惯用基 B·R·B⁻¹（可能带分数系数）
    fn to_conventional(&self, r: &IntMatrix) -> HklOperator {
        let p = ops::mat_mul(&ops::mat_mul(&self.num, r), &ops::adjugate(&self.num));
        HklOperator::new(p, ops::determinant(&self.num))
    }
}

/// 所有候选二重轴
fn candidate_twofolds() -> Vec<IntMatrix> {
    let mut out = Vec::new();
    for code in 0..19683u32 {
        let mut m = [[0i32; 3]; 3];
        let mut c = code;
        for row in m.iter_mut() {
            for v in row.iter_mut() {
                *v = (c % 3) as i32 - 1;
                c /= 3;
            }
        }
        if m != IDENTITY && ops::determinant(&m) == 1 && ops::mat_mul(&m, &m) == IDENTITY {
            out.push(m);
        }
    }
    out
}

/// 二重轴 num / den 的 (正空间轴, 倒空间轴)
fn twofold_axes(num: &IntMatrix, den: i32) -> Option<([i32; 3], [i32; 3])> {
    let scaled_identity = IDENTITY.map(|row| row.map(|v| v * den));
    let squared_identity = IDENTITY.map(|row| row.map(|v| v * den * den));
    if *num == scaled_identity
        || ops::mat_mul(num, num) != squared_identity
        || ops::determinant(num) != den.pow(3)
    {
        return None;
    }
    let mut sum = *num;
    for (i, row) in sum.iter_mut().enumerate() {
        row[i] += den;
    }
    let u = (0..3)
        .map(|j| [sum[0][j], sum[1][j], sum[2][j]])
        .find(|c| *c != [0; 3])?;
    let h = sum.iter().copied().find(|row| *row != [0; 3])?;
    Some((reduce(u), reduce(h)))
}

fn reduce(v: [i32; 3]) -> [i32; 3] {
    fn gcd(a: i32, b: i32) -> i32 {
        if b == 0 {
            a.abs()
        } else {
            gcd(b, a % b)
        }
    }
    let g = gcd(gcd(v[0], v[1]), v[2]).max(1);
    v.map(|x| x / g)
}

/// 度规张量 g 下整数二重轴的 Le Page δ（度），非二重轴返回 None
pub fn le_page_delta(g: &Matrix3<f64>, r: &IntMatrix) -> Option<f64> {
    let (u, h) = twofold_axes(r, 1)?;
    let u = Vector3::new(u[0] as f64, u[1] as f64, u[2] as f64);
    let h = Vector3::new(h[0] as f64, h[1] as f64, h[2] as f64);
    let g_inv = g.try_inverse()?;
    let norm = (u.dot(&(g * u)) * h.dot(&(g_inv * h))).sqrt();
    if norm <= 0.0 {
        return None;
    }
    let cos = (h.dot(&u) / norm).abs().min(1.0);
    Some(cos.acos().to_degrees())
}

/// 纯旋转矩阵闭包
pub fn close_rotations(seeds: &[IntMatrix], cap: usize) -> Vec<IntMatrix> {
    let mut group = vec![IDENTITY];
    for s in seeds {
        if !group.contains(s) {
            group.push(*s);
        }
    }
    let mut i = 0;
    while i < group.len() && group.len() < cap {
        let a = group[i];
        let mut j = 0;
        while j < group.len() && group.len() < cap {
            let p = ops::mat_mul(&a, &group[j]);
            if !group.contains(&p) {
                group.push(p);
            }
            j += 1;
        }
        i += 1;
    }
    group
}

/// 陪集代表：二重轴优先，其次 δ 小、惯用基下整数系数、非零元少、+1 多，最后按字典序
fn pick_representative(
    basis: &PrimitiveBasis,
    metric: &Matrix3<f64>,
    coset: &[IntMatrix],
) -> (HklOperator, Option<f64>) {
    let candidates: Vec<(HklOperator, Option<f64>)> = coset
        .iter()
        .map(|r| (basis.to_conventional(r), le_page_delta(metric, r)))
        .collect();
    let key = |(op, delta): &(HklOperator, Option<f64>)| {
        let nonzero = op.num.iter().flatten().filter(|v| **v != 0).count();
        let plus = op.num.iter().flatten().filter(|v| **v == op.den).count();
        (
            delta.is_none(),
            delta.unwrap_or(f64::INFINITY),
            op.den,
            nonzero,
            std::cmp::Reverse(plus),
            std::cmp::Reverse(op.num),
        )
    };
    let mut best = candidates[0];
    let mut best_key = key(&best);
    for candidate in &candidates[1..] {
        let k = key(candidate);
        let ordering = k
            .0
            .cmp(&best_key.0)
            .then(k.1.total_cmp(&best_key.1))
            .then(k.2.cmp(&best_key.2))
            .then(k.3.cmp(&best_key.3))
            .then(k.4.cmp(&best_key.4))
            .then(k.5.cmp(&best_key.5));
        if ordering.is_lt() {
            best = *candidate;
            best_key = k;
        }
    }
    best
}

/// 晶系的一般度规（用于判断孪晶律是否由晶系决定）
fn ideal_metric(system: CrystalSystem) -> Matrix3<f64> {
    let params = match system {
        CrystalSystem::Triclinic => [1.0, 1.3, 1.7, 83.0, 97.0, 101.0],
        CrystalSystem::Monoclinic => [1.0, 1.3, 1.7, 90.0, 103.0, 90.0],
        CrystalSystem::Orthorhombic => [1.0, 1.3, 1.7, 90.0, 90.0, 90.0],
        CrystalSystem::Tetragonal => [1.0, 1.0, 1.7, 90.0, 90.0, 90.0],
        CrystalSystem::Trigonal | CrystalSystem::Hexagonal => [1.0, 1.0, 1.7, 90.0, 90.0, 120.0],
        CrystalSystem::Cubic => [1.0, 1.0, 1.0, 90.0, 90.0, 90.0],
    };
    UnitCell::new(params)
        .map(|c| c.metric_tensor())
        .unwrap_or_else(|_| Matrix3::identity())
}

fn preserves_metric(op: &HklOperator, g: &Matrix3<f64>) -> bool {
    let m = Matrix3::from_fn(|i, j| op.value(i, j));
    let transformed = m.transpose() * g * m;
    (transformed - g).abs().max() < 1e-9
}

/// 用于生成 Free-R 标记的格子旋转群
pub fn lattice_rotations(cell: &UnitCell, sg: &SpaceGroup, max_delta: f64) -> Vec<HklOperator> {
    TwinLawSearch::run(cell, sg, max_delta).lattice_group
}
