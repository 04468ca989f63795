//! シンボリックリンク解決
//!
//! リンクの連鎖を反復的にたどり、最終的な実体のパスを求める。
//! 相対リンクは作業ディレクトリではなく、リンク元のディレクトリ
//! 部分へ継ぎ足して解決する

use crate::error::Result;
use std::path::{Path, PathBuf};

/// リンク連鎖の追跡上限
///
/// 循環したリンクで無限ループに陥らないための打ち切り
#[cfg(feature = "follow-symlinks")]
const MAX_CHASE_DEPTH: usize = 40;

/// シンボリックリンク解決器
///
/// 作業用のパスバッファを自身で所有し、呼び出しをまたいで再利用する。
/// `resolve` の返り値はこのバッファへのビューであり、次の呼び出しで
/// 上書きされる
#[derive(Debug, Default)]
pub struct SymlinkResolver {
    scratch: PathBuf,
}

impl SymlinkResolver {
    /// 新しい解決器を作成
    pub fn new() -> Self {
        Self {
            scratch: PathBuf::new(),
        }
    }

    /// パスのリンク連鎖をたどり、実体のパスを返す
    ///
    /// リンクでないパスに到達したら成功。stat の失敗は最後に調べた
    /// パスを名指ししたエラーになる。`follow-symlinks` フィーチャが
    /// 無効の場合は入力をそのまま返す
    pub fn resolve(&mut self, path: &Path) -> Result<&Path> {
        self.scratch.clear();
        self.scratch.push(path);

        #[cfg(feature = "follow-symlinks")]
        self.chase_links()?;

        Ok(&self.scratch)
    }

    #[cfg(feature = "follow-symlinks")]
    fn chase_links(&mut self) -> Result<()> {
        use crate::error::ResolveError;
        use std::fs;

        for _ in 0..MAX_CHASE_DEPTH {
            let metadata = fs::symlink_metadata(&self.scratch).map_err(|error| {
                ResolveError::Stat {
                    path: self.scratch.display().to_string(),
                    message: error.to_string(),
                }
            })?;

            if !metadata.file_type().is_symlink() {
                return Ok(());
            }

            let target = fs::read_link(&self.scratch).map_err(|error| ResolveError::ReadLink {
                path: self.scratch.display().to_string(),
                message: error.to_string(),
            })?;

            if target.is_absolute() {
                self.scratch = target;
            } else {
                // 相対リンクはリンク元のディレクトリ部分へ継ぎ足す。
                // ディレクトリ部分がなければ接頭辞は空（作業ディレクトリ相対）
                self.scratch.pop();
                self.scratch.push(target);
            }
        }

        Err(ResolveError::Stat {
            path: self.scratch.display().to_string(),
            message: "too many levels of symbolic links".to_string(),
        }
        .into())
    }
}
