//! # 统一错误处理模块
//!
//! 定义 twinmap 的所有错误类型，使用 `thiserror` 派生。
//! 面向用户的致命错误（缺少晶胞、空间群、数据文件等）保持与命令行提示一致的措辞。
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// twinmap 统一错误类型
#[derive(Error, Debug)]
pub enum TwinMapError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid MTZ file: {0}")]
    MtzFormat(String),

    #[error("Column '{label}' not found in {path}")]
    MissingColumn { label: String, path: String },

    // ─────────────────────────────────────────────────────────────
    // 参数错误
    // ─────────────────────────────────────────────────────────────
    #[error("Unknown file or keyword: {0}")]
    UnknownKeyword(String),

    #[error("Ambiguous keyword '{key}', candidates: {candidates}")]
    AmbiguousKeyword { key: String, candidates: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidParameter { key: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 缺少必需输入
    // ─────────────────────────────────────────────────────────────
    #[error("unit cell not specified")]
    UnitCellNotSpecified,

    #[error("space group not specified")]
    SpaceGroupNotSpecified,

    #[error("Xray data not specified")]
    XrayDataNotSpecified,

    #[error("pdb file with  model not specified")]
    ModelNotSpecified,

    #[error("No data available")]
    NoDataAvailable,

    // ─────────────────────────────────────────────────────────────
    // 对称性错误
    // ─────────────────────────────────────────────────────────────
    #[error("Unknown space group: {0}")]
    UnknownSpaceGroup(String),

    #[error("Invalid symmetry operator '{op}': {reason}")]
    InvalidSymOp { op: String, reason: String },

    #[error("Invalid twin law '{law}': {reason}")]
    InvalidTwinLaw { law: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 数值错误
    // ─────────────────────────────────────────────────────────────
    #[error("Numerical failure: {0}")]
    Numerical(String),

    // ─────────────────────────────────────────────────────────────
    // CSV 错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("No matching files found with pattern: {pattern}")]
    NoFilesFound { pattern: String },

    #[error("{0}")]
    Other(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TwinMapError>;
