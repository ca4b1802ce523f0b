//! # 晶胞
//!
//! 晶胞参数及其导出量：度规张量、体积、正交化/分数化矩阵、倒易度规与 d 间距。
//!
//! ## 约定
//! 正交化采用 PDB 约定：a 沿 x 轴，b 位于 xy 平面。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`twin/`、`xray/`、`fmodel/` 使用
//! - 使用 `nalgebra` 进行矩阵运算

use crate::error::{Result, TwinMapError};
use crate::models::MillerIndex;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 晶胞参数 (a, b, c, α, β, γ)，长度 Å，角度 度
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    params: [f64; 6],
}

impl UnitCell {
    /// 创建并校验晶胞
    pub fn new(params: [f64; 6]) -> Result<Self> {
        let [a, b, c, alpha, beta, gamma] = params;
        if a <= 0.0 || b <= 0.0 || c <= 0.0 {
            return Err(TwinMapError::InvalidParameter {
                key: "unit_cell".to_string(),
                reason: format!("cell edges must be positive: {:?}", params),
            });
        }
        for angle in [alpha, beta, gamma] {
            if angle <= 0.0 || angle >= 180.0 {
                return Err(TwinMapError::InvalidParameter {
                    key: "unit_cell".to_string(),
                    reason: format!("cell angles must lie in (0, 180): {:?}", params),
                });
            }
        }
        let cell = UnitCell { params };
        if !(cell.volume() > 1e-6) {
            return Err(TwinMapError::InvalidParameter {
                key: "unit_cell".to_string(),
                reason: format!("cell has no volume: {:?}", params),
            });
        }
        Ok(cell)
    }

    /// 解析 "a b c alpha beta gamma"（空格或逗号分隔，括号可选）
    pub fn parse(text: &str) -> Result<Self> {
        let values: Vec<f64> = text
            .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| TwinMapError::InvalidParameter {
                key: "unit_cell".to_string(),
                reason: format!("cannot parse '{}'", text),
            })?;
        if values.len() != 6 {
            return Err(TwinMapError::InvalidParameter {
                key: "unit_cell".to_string(),
                reason: format!("expected 6 numbers, found {}", values.len()),
            });
        }
        Self::new([
            values[0], values[1], values[2], values[3], values[4], values[5],
        ])
    }

    /// 晶胞参数
    pub fn parameters(&self) -> [f64; 6] {
        self.params
    }

    /// 正交化矩阵：列向量为 a, b, c 的笛卡尔坐标
    pub fn orthogonalization(&self) -> Matrix3<f64> {
        let [a, b, c, alpha, beta, gamma] = self.params;
        let (cos_alpha, cos_beta) = (alpha.to_radians().cos(), beta.to_radians().cos());
        let (cos_gamma, sin_gamma) = (gamma.to_radians().cos(), gamma.to_radians().sin());

        let c1 = c * cos_beta;
        let c2 = c * (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
        let c3 = (c * c - c1 * c1 - c2 * c2).max(0.0).sqrt();

        Matrix3::new(
            a, b * cos_gamma, c1, //
            0.0, b * sin_gamma, c2, //
            0.0, 0.0, c3,
        )
    }

    /// 分数化矩阵（正交化矩阵的逆）
    pub fn fractionalization(&self) -> Matrix3<f64> {
        self.orthogonalization()
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros)
    }

    /// 体积
    pub fn volume(&self) -> f64 {
        self.orthogonalization().determinant().abs()
    }

    /// 度规张量 G = Oᵀ O
    pub fn metric_tensor(&self) -> Matrix3<f64> {
        let o = self.orthogonalization();
        o.transpose() * o
    }

    /// 倒易度规张量 G*
    pub fn reciprocal_metric(&self) -> Matrix3<f64> {
        self.metric_tensor()
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros)
    }

    /// 1/d²
    pub fn d_star_sq(&self, h: &MillerIndex) -> f64 {
        let v = Vector3::new(h[0] as f64, h[1] as f64, h[2] as f64);
        (v.transpose() * self.reciprocal_metric() * v)[(0, 0)]
    }

    /// d 间距（Å）
    pub fn d_spacing(&self, h: &MillerIndex) -> f64 {
        let dss = self.d_star_sq(h);
        if dss > 0.0 {
            1.0 / dss.sqrt()
        } else {
            f64::INFINITY
        }
    }

    /// 笛卡尔坐标转分数坐标
    pub fn fractionalize(&self, cart: &[f64; 3]) -> [f64; 3] {
        let v = self.fractionalization() * Vector3::new(cart[0], cart[1], cart[2]);
        [v[0], v[1], v[2]]
    }
}

impl fmt::Display for UnitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.params;
        write!(
            f,
            "({:.3}, {:.3}, {:.3}, {:.2}, {:.2}, {:.2})",
            p[0], p[1], p[2], p[3], p[4], p[5]
        )
    }
}
