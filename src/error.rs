//! エラーハンドリングシステム
//!
//! stred のI/Oコア全体で使用される統一されたエラー型を定義
//! 設計方針：この層のエラーは呼び出し側で握りつぶさず、最終的に
//! `CheckedIo::abort` へ集約して後始末と終了を行う

use thiserror::Error;

/// 致命的エラー時の固定終了コード
///
/// スクリプト実行側の終了コードとは独立した値
pub const FATAL_EXIT_CODE: i32 = 4;

/// I/Oコア全体のエラー型
#[derive(Error, Debug, Clone)]
pub enum StredError {
    /// ファイル操作エラー
    #[error("{0}")]
    File(#[from] FileError),

    /// シンボリックリンク解決エラー
    #[error("{0}")]
    Resolve(#[from] ResolveError),
}

/// ファイル操作固有のエラー
///
/// すべてのバリアントが対象パス（または台帳上の名前）とOSのエラー文字列を持つ
#[derive(Error, Debug, Clone)]
pub enum FileError {
    #[error("couldn't open file {path}: {message}")]
    Open { path: String, message: String },

    #[error("couldn't open temporary file {path}: {message}")]
    Stage { path: String, message: String },

    #[error("read error on {name}: {message}")]
    Read { name: String, message: String },

    #[error("couldn't write to {name}: {message}")]
    Write { name: String, message: String },

    #[error("couldn't flush {name}: {message}")]
    Flush { name: String, message: String },

    #[error("couldn't close {name}: {message}")]
    Close { name: String, message: String },

    #[error("cannot rename {from} to {to}: {message}")]
    Rename {
        from: String,
        to: String,
        message: String,
    },

    #[error("cannot remove {path}: {message}")]
    Remove { path: String, message: String },

    #[error("cannot copy {from} to {to}: {message}")]
    Copy {
        from: String,
        to: String,
        message: String,
    },
}

/// シンボリックリンク解決固有のエラー
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("cannot stat {path}: {message}")]
    Stat { path: String, message: String },

    #[error("couldn't follow symlink {path}: {message}")]
    ReadLink { path: String, message: String },
}

/// プロジェクト標準のResult型
pub type Result<T> = std::result::Result<T, StredError>;
