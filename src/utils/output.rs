//! # 美化输出工具
//!
//! 提供统一的终端输出样式，并把每一行（去除颜色）同步写入内存日志，
//! 运行结束时整体写入日志文件。`--quiet` 时只保留日志，不输出到终端。
//!
//! ## 依赖关系
//! - 被所有 `commands/` 模块以及计算模块的报告函数使用
//! - 使用 `colored` crate

use crate::error::{Result, TwinMapError};

use colored::Colorize;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::sync::{LazyLock, Mutex};

/// 终端 + 内存日志的双路输出
struct LogTee {
    /// 是否关闭终端输出
    quiet: bool,
    /// 无颜色的日志内容
    buffer: String,
}

static LOG: LazyLock<Mutex<LogTee>> = LazyLock::new(|| {
    Mutex::new(LogTee {
        quiet: false,
        buffer: String::new(),
    })
});

fn with_log<F: FnOnce(&mut LogTee)>(f: F) {
    let mut guard = LOG.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard);
}

/// 写出一行：终端使用带颜色版本，日志使用纯文本版本
fn emit(styled: String, plain: String, to_stderr: bool) {
    with_log(|log| {
        log.buffer.push_str(&plain);
        log.buffer.push('\n');
        if to_stderr {
            eprintln!("{}", styled);
        } else if !log.quiet {
            println!("{}", styled);
        }
    });
}

/// 设置安静模式（仅写日志）
pub fn set_quiet(quiet: bool) {
    with_log(|log| log.quiet = quiet);
}

/// 将当前日志写入文件
pub fn save_log(path: &Path) -> Result<()> {
    let mut content = String::new();
    with_log(|log| content = log.buffer.clone());
    fs::write(path, content).map_err(|e| TwinMapError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

/// 打印成功消息
pub fn print_success(msg: &str) {
    emit(
        format!("{} {}", "[OK]".green().bold(), msg),
        format!("[OK] {}", msg),
        false,
    );
}

/// 打印错误消息（安静模式下也输出到 stderr）
pub fn print_error(msg: &str) {
    emit(
        format!("{} {}", "[ERR]".red().bold(), msg),
        format!("[ERR] {}", msg),
        true,
    );
}

/// 打印警告消息
pub fn print_warning(msg: &str) {
    emit(
        format!("{} {}", "[WARN]".yellow().bold(), msg),
        format!("[WARN] {}", msg),
        false,
    );
}

/// 打印信息消息
pub fn print_info(msg: &str) {
    emit(
        format!("{} {}", "[*]".blue().bold(), msg),
        format!("[*] {}", msg),
        false,
    );
}

/// 打印写出文件消息
pub fn print_written(what: &str, path: &Path) {
    emit(
        format!(
            "{} {} {} {}",
            "[OK]".green().bold(),
            what.dimmed(),
            "->".cyan(),
            path.display()
        ),
        format!("[OK] {} -> {}", what, path.display()),
        false,
    );
}

/// 打印完成消息
pub fn print_done(msg: &str) {
    emit(
        format!("{} {}", "[DONE]".green().bold(), msg),
        format!("[DONE] {}", msg),
        false,
    );
}

/// 打印普通报告行（无前缀）
pub fn print_line(msg: &str) {
    emit(msg.to_string(), msg.to_string(), false);
}

/// 打印多行文本块（如表格、参数树）
pub fn print_block(block: impl Display) {
    for line in block.to_string().lines() {
        print_line(line);
    }
}

/// 打印空行
pub fn print_blank() {
    emit(String::new(), String::new(), false);
}

/// 打印标题栏
pub fn print_header(title: &str) {
    let line = "─".repeat(60);
    print_blank();
    emit(line.dimmed().to_string(), line.clone(), false);
    emit(format!("  {}", title.bold()), format!("  {}", title), false);
    emit(line.dimmed().to_string(), line, false);
    print_blank();
}

/// 打印分隔线
pub fn print_separator() {
    let line = "─".repeat(60);
    emit(line.dimmed().to_string(), line, false);
}
