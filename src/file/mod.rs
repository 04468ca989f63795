//! ファイルI/O層
//!
//! 設計方針：
//! - すべてのファイル操作はチェック付きラッパーを経由し、失敗は即検出
//! - 開いたストリームは台帳で追跡し、エラーメッセージで実ファイル名を名指し
//! - 書き換えは一時ファイル＋rename の原子的置き換えのみ
//! - どこで失敗しても未コミットの一時ファイルは残さない
//! - シンボリックリンクは開く前に実体まで解決（フィーチャで無効化可能）

pub mod checked;
pub mod registry;
pub mod replace;
pub mod symlink;

// 公開API
pub use checked::{CheckedIo, Handle, OpenMode};
pub use registry::{OpenFileEntry, OpenFileTable, Stream};
pub use replace::ReplaceTransaction;
pub use symlink::SymlinkResolver;
