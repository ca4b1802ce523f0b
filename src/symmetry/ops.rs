//! # 对称操作
//!
//! 整数旋转矩阵 + 以 1/12 为单位的平移向量表示的晶体学对称操作。
//!
//! ## 约定
//! - 分数坐标: x' = R·x + t
//! - Miller 指数: h' = h·R（行向量乘矩阵）
//! - 相位: F(h·R) = exp(-2πi h·t) F(h)
//!
//! ## 依赖关系
//! - 被 `symmetry/space_group.rs`、`twin/`、`xray/` 使用
//! - 使用 `regex` 解析 "x,y+1/2,-z" 形式的操作字符串

use crate::error::{Result, TwinMapError};
use crate::models::MillerIndex;

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// 平移分母
pub const TDEN: i32 = 12;

/// 3x3 整数矩阵
pub type IntMatrix = [[i32; 3]; 3];

/// 单位矩阵
pub const IDENTITY: IntMatrix = [[1, 0, 0], [0, 1, 0], [0, 0, 1]];

static TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?)(\d+(?:\.\d*)?(?:/\d+)?)?\*?([a-z])?$").expect("static regex")
});

/// 晶体学对称操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymOp {
    /// 旋转部分（作用于分数坐标的行）
    pub rot: IntMatrix,
    /// 平移部分（单位 1/TDEN）
    pub trans: [i32; 3],
}

impl SymOp {
    /// 恒等操作
    pub fn identity() -> Self {
        SymOp {
            rot: IDENTITY,
            trans: [0; 3],
        }
    }

    /// 纯平移操作（用于格子心化向量）
    pub fn translation(trans: [i32; 3]) -> Self {
        SymOp {
            rot: IDENTITY,
            trans,
        }
    }

    /// 解析 "x,y,z" 形式的操作
    pub fn parse(text: &str) -> Result<Self> {
        let (rot, trans) = parse_linear_triplet(text, ['x', 'y', 'z']).map_err(|reason| {
            TwinMapError::InvalidSymOp {
                op: text.to_string(),
                reason,
            }
        })?;
        Ok(SymOp { rot, trans }.normalized())
    }

    /// 复合操作 self ∘ other：先作用 other 再作用 self
    pub fn multiply(&self, other: &SymOp) -> SymOp {
        let rot = mat_mul(&self.rot, &other.rot);
        let rt = mat_vec(&self.rot, &other.trans);
        SymOp {
            rot,
            trans: [
                rt[0] + self.trans[0],
                rt[1] + self.trans[1],
                rt[2] + self.trans[2],
            ],
        }
    }

    /// 平移约化到 [0, 1)
    pub fn normalized(&self) -> SymOp {
        SymOp {
            rot: self.rot,
            trans: self.trans.map(|t| t.rem_euclid(TDEN)),
        }
    }

    /// 作用于分数坐标
    pub fn apply_frac(&self, x: &[f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (i, row) in self.rot.iter().enumerate() {
            out[i] = row[0] as f64 * x[0]
                + row[1] as f64 * x[1]
                + row[2] as f64 * x[2]
                + self.trans[i] as f64 / TDEN as f64;
        }
        out
    }

    /// Miller 指数变换 h' = h·R
    pub fn rotate_hkl(&self, h: &MillerIndex) -> MillerIndex {
        hkl_times(h, &self.rot)
    }

    /// h·t（单位 1/TDEN）
    pub fn h_dot_t(&self, h: &MillerIndex) -> i32 {
        h[0] * self.trans[0] + h[1] * self.trans[1] + h[2] * self.trans[2]
    }

    /// 格式化为 "x,y,z" 字符串
    pub fn as_xyz(&self) -> String {
        format_triplet(&self.rot, &self.trans, ['x', 'y', 'z'], false)
    }
}

impl fmt::Display for SymOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_xyz())
    }
}

/// 解析三分量线性表达式，例如 "-x+1/2,y,z" 或 "k,h,-l"
///
/// 返回 (按行存放的系数矩阵, 平移 * TDEN)。
pub fn parse_linear_triplet(
    text: &str,
    letters: [char; 3],
) -> std::result::Result<(IntMatrix, [i32; 3]), String> {
    let (scaled, trans) = parse_scaled_triplet(text, letters)?;
    if let Some(row) = scaled
        .iter()
        .position(|row| row.iter().any(|v| v % TDEN != 0))
    {
        return Err(format!("non-integer coefficient in component {}", row + 1));
    }
    Ok((scaled.map(|row| row.map(|v| v / TDEN)), trans))
}

/// 同 [`parse_linear_triplet`]，但系数也以 1/TDEN 为单位（允许 "1/2*h" 之类的分数系数）
pub fn parse_scaled_triplet(
    text: &str,
    letters: [char; 3],
) -> std::result::Result<(IntMatrix, [i32; 3]), String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let parts: Vec<&str> = cleaned.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected 3 components, found {}", parts.len()));
    }

    let mut rot = [[0; 3]; 3];
    let mut trans = [0; 3];

    for (row, part) in parts.iter().enumerate() {
        if part.is_empty() {
            return Err(format!("component {} is empty", row + 1));
        }
        for term in split_terms(part) {
            let caps = TERM_RE
                .captures(&term)
                .ok_or_else(|| format!("cannot parse term '{}'", term))?;
            let negative = caps.get(1).map(|m| m.as_str() == "-").unwrap_or(false);
            let number = caps.get(2).map(|m| m.as_str());
            let variable = caps.get(3).map(|m| m.as_str());

            let value = match number {
                Some(n) => parse_number(n)?,
                None => 1.0,
            };
            let value = if negative { -value } else { value };

            match variable {
                Some(v) => {
                    let ch = v.chars().next().unwrap_or(' ');
                    let col = letters
                        .iter()
                        .position(|&l| l == ch)
                        .ok_or_else(|| format!("unexpected symbol '{}'", v))?;
                    let scaled = value * TDEN as f64;
                    if (scaled - scaled.round()).abs() > 1e-6 {
                        return Err(format!(
                            "coefficient '{}' is not a multiple of 1/{}",
                            term, TDEN
                        ));
                    }
                    rot[row][col] += scaled.round() as i32;
                }
                None => {
                    if number.is_none() {
                        return Err(format!("dangling sign in '{}'", part));
                    }
                    let scaled = value * TDEN as f64;
                    if (scaled - scaled.round()).abs() > 1e-6 {
                        return Err(format!(
                            "translation '{}' is not a multiple of 1/{}",
                            term, TDEN
                        ));
                    }
                    trans[row] += scaled.round() as i32;
                }
            }
        }
    }

    Ok((rot, trans))
}

/// 按 +/- 切分项，保留符号
fn split_terms(part: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    for ch in part.chars() {
        if (ch == '+' || ch == '-') && !current.is_empty() {
            terms.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}

fn parse_number(text: &str) -> std::result::Result<f64, String> {
    if let Some((num, den)) = text.split_once('/') {
        let num: f64 = num
            .parse()
            .map_err(|_| format!("invalid number '{}'", text))?;
        let den: f64 = den
            .parse()
            .map_err(|_| format!("invalid number '{}'", text))?;
        if den == 0.0 {
            return Err(format!("zero denominator in '{}'", text));
        }
        Ok(num / den)
    } else {
        text.parse().map_err(|_| format!("invalid number '{}'", text))
    }
}

/// 格式化三分量表达式
///
/// `by_column` 为 true 时第 j 个分量由矩阵第 j 列给出（Miller 指数算符的写法）。
pub fn format_triplet(m: &IntMatrix, trans: &[i32; 3], letters: [char; 3], by_column: bool) -> String {
    let mut parts = Vec::with_capacity(3);
    for j in 0..3 {
        let mut s = String::new();
        for i in 0..3 {
            let c = if by_column { m[i][j] } else { m[j][i] };
            if c == 0 {
                continue;
            }
            if c < 0 {
                s.push('-');
            } else if !s.is_empty() {
                s.push('+');
            }
            if c.abs() != 1 {
                s.push_str(&format!("{}*", c.abs()));
            }
            s.push(letters[i]);
        }
        let t = trans[j];
        if t != 0 {
            let g = gcd(t.abs(), TDEN);
            let (num, den) = (t / g, TDEN / g);
            if num > 0 && !s.is_empty() {
                s.push('+');
            }
            if den == 1 {
                s.push_str(&num.to_string());
            } else {
                s.push_str(&format!("{}/{}", num, den));
            }
        }
        if s.is_empty() {
            s.push('0');
        }
        parts.push(s);
    }
    parts.join(",")
}

fn gcd(a: i32, b: i32) -> i32 {
    if b == 0 {
        a.max(1)
    } else {
        gcd(b, a % b)
    }
}

/// 矩阵乘法
pub fn mat_mul(a: &IntMatrix, b: &IntMatrix) -> IntMatrix {
    let mut out = [[0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// 矩阵乘向量
pub fn mat_vec(a: &IntMatrix, v: &[i32; 3]) -> [i32; 3] {
    [
        a[0][0] * v[0] + a[0][1] * v[1] + a[0][2] * v[2],
        a[1][0] * v[0] + a[1][1] * v[1] + a[1][2] * v[2],
        a[2][0] * v[0] + a[2][1] * v[1] + a[2][2] * v[2],
    ]
}

/// 行向量乘矩阵 h·M
pub fn hkl_times(h: &MillerIndex, m: &IntMatrix) -> MillerIndex {
    [
        h[0] * m[0][0] + h[1] * m[1][0] + h[2] * m[2][0],
        h[0] * m[0][1] + h[1] * m[1][1] + h[2] * m[2][1],
        h[0] * m[0][2] + h[1] * m[1][2] + h[2] * m[2][2],
    ]
}

/// 行列式
pub fn determinant(m: &IntMatrix) -> i32 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// 取负矩阵
pub fn negate(m: &IntMatrix) -> IntMatrix {
    m.map(|row| row.map(|v| -v))
}

/// 转置
pub fn transpose(m: &IntMatrix) -> IntMatrix {
    let mut out = [[0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = m[j][i];
        }
    }
    out
}

/// 伴随矩阵，满足 m·adj(m) = det(m)·I
pub fn adjugate(m: &IntMatrix) -> IntMatrix {
    let mut out = [[0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            let (r0, r1) = ((j + 1) % 3, (j + 2) % 3);
            let (c0, c1) = ((i + 1) % 3, (i + 2) % 3);
            out[i][j] = m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
        }
    }
    out
}

/// 有理系数的 Miller 指数算符 h' = h·num / den
///
/// 心化格子的格子对称操作在惯用晶胞中可能带分数系数（如 1/2*h+3/2*k），
/// 但对满足心化条件的反射结果仍为整数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HklOperator {
    pub num: IntMatrix,
    pub den: i32,
}

impl HklOperator {
    /// 约去公因子后的算符，den 取正
    pub fn new(num: IntMatrix, den: i32) -> Self {
        let g = num
            .iter()
            .flatten()
            .fold(den.abs(), |g, &v| gcd(g, v.abs()));
        let sign = if den < 0 { -1 } else { 1 };
        HklOperator {
            num: num.map(|row| row.map(|v| sign * v / g)),
            den: den.abs() / g,
        }
    }

    pub fn integer(m: IntMatrix) -> Self {
        HklOperator { num: m, den: 1 }
    }

    pub fn is_integer(&self) -> bool {
        self.den == 1
    }

    /// h·M；结果不是整数指数时返回 None
    pub fn apply(&self, h: &MillerIndex) -> Option<MillerIndex> {
        let p = hkl_times(h, &self.num);
        if p.iter().all(|v| v % self.den == 0) {
            Some(p.map(|v| v / self.den))
        } else {
            None
        }
    }

    /// 先作用 self 再作用 other：h·(A·B)
    pub fn then(&self, other: &HklOperator) -> HklOperator {
        HklOperator::new(mat_mul(&self.num, &other.num), self.den * other.den)
    }

    /// 逆算符，奇异时返回 None
    pub fn inverse(&self) -> Option<HklOperator> {
        let det = determinant(&self.num);
        if det == 0 {
            return None;
        }
        let adj = adjugate(&self.num).map(|row| row.map(|v| v * self.den));
        Some(HklOperator::new(adj, det))
    }

    /// 行列式是否为 ±1
    pub fn is_unimodular(&self) -> bool {
        determinant(&self.num).abs() == self.den.pow(3)
    }

    /// 浮点矩阵元素
    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.num[i][j] as f64 / self.den as f64
    }

    /// "h,-k,-l" 形式（第 j 个分量由第 j 列给出）
    pub fn as_hkl(&self) -> String {
        let letters = ['h', 'k', 'l'];
        let mut parts = Vec::with_capacity(3);
        for j in 0..3 {
            let mut s = String::new();
            for (i, letter) in letters.iter().enumerate() {
                let c = self.num[i][j];
                if c == 0 {
                    continue;
                }
                if c < 0 {
                    s.push('-');
                } else if !s.is_empty() {
                    s.push('+');
                }
                let g = gcd(c.abs(), self.den);
                let (n, d) = (c.abs() / g, self.den / g);
                match (n, d) {
                    (1, 1) => {}
                    (n, 1) => s.push_str(&format!("{}*", n)),
                    (n, d) => s.push_str(&format!("{}/{}*", n, d)),
                }
                s.push(*letter);
            }
            if s.is_empty() {
                s.push('0');
            }
            parts.push(s);
        }
        parts.join(",")
    }
}
