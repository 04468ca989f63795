//! stred - ストリーム編集ツールのI/Oコア
//!
//! チェック付きファイルI/O、原子的置き換え、資源ライフサイクル管理の実装

// エラー基盤
pub mod error;

// データ層
pub mod buffer;

// ファイルI/O層
pub mod file;

// 公開API
pub use buffer::AppendBuffer;
pub use error::{FileError, ResolveError, Result, StredError, FATAL_EXIT_CODE};
pub use file::{CheckedIo, Handle, OpenFileTable, OpenMode, ReplaceTransaction, SymlinkResolver};
