//! ファイルの原子的置き換え
//!
//! 一時ファイルに新内容を書き込み、rename で対象の上に載せ替える。
//! ステージングは対象と同じディレクトリに作成し、最終 rename が
//! 同一ファイルシステム内で完結するようにする。失敗時は常に
//! ステージング側を削除し、既存の対象には決して触れない

use crate::error::{FileError, Result};
use crate::file::checked::{CheckedIo, Handle};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 置き換えトランザクション
///
/// 状態遷移：Staged →（Committed | Abandoned）。コミットも放棄も
/// されないままスコープを抜けた場合はステージングファイルを
/// ベストエフォートで削除する
#[derive(Debug)]
pub struct ReplaceTransaction {
    target: PathBuf,
    staging: PathBuf,
    handle: Option<Handle>,
    committed: bool,
}

impl ReplaceTransaction {
    /// 対象パスの置き換えを開始
    ///
    /// 対象のディレクトリにステージングファイルを作成し、
    /// チェック付き書き込み用のハンドルを公開する
    pub fn begin(io: &mut CheckedIo, target: &Path) -> Result<Self> {
        let base = match target.file_name() {
            Some(name) => format!("{}.", name.to_string_lossy()),
            None => "stred.".to_string(),
        };
        let dir_hint = target.parent().filter(|dir| !dir.as_os_str().is_empty());

        let (handle, staging) = io.stage(&base, dir_hint)?;

        Ok(Self {
            target: target.to_path_buf(),
            staging,
            handle: Some(handle),
            committed: false,
        })
    }

    /// ステージングファイルへの書き込みハンドルを取得
    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    /// 置き換え対象のパスを取得
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// ステージングファイルのパスを取得
    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// ステージング内容を対象の新しい内容として確定
    ///
    /// rename が失敗した場合はステージングファイルを削除してから
    /// エラーを返す。その削除自体の失敗はステージングファイルを
    /// 名指しして報告する（一時ファイルの取り残しの方が rename
    /// 失敗より報告の優先度が高い）
    pub fn commit(mut self, io: &mut CheckedIo) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            io.close(Some(handle))?;
        }

        clear_destination_for_rename(&self.target)?;

        match fs::rename(&self.staging, &self.target) {
            Ok(()) => {
                self.committed = true;
                Ok(())
            }
            Err(error) if is_cross_device(&error) => {
                // 別ファイルシステムへの置き換えはコピーで代替する
                let result = self.copy_and_unlink(io);
                self.committed = true;
                result
            }
            Err(error) => {
                self.committed = true;
                match fs::remove_file(&self.staging) {
                    Err(remove_error) => Err(FileError::Remove {
                        path: self.staging.display().to_string(),
                        message: remove_error.to_string(),
                    }
                    .into()),
                    Ok(()) => Err(FileError::Rename {
                        from: self.staging.display().to_string(),
                        to: self.target.display().to_string(),
                        message: error.to_string(),
                    }
                    .into()),
                }
            }
        }
    }

    /// 置き換えを取りやめ、ステージングファイルを削除
    ///
    /// 対象は開始前の内容のまま残る
    pub fn abandon(mut self, io: &mut CheckedIo) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            io.close(Some(handle))?;
        }

        self.committed = true;
        io.unlink(&self.staging)
    }

    /// コピーによる確定（rename 不能なファイルシステム境界用）
    fn copy_and_unlink(&self, io: &CheckedIo) -> Result<()> {
        if let Err(error) = fs::copy(&self.staging, &self.target) {
            return match fs::remove_file(&self.staging) {
                Err(remove_error) => Err(FileError::Remove {
                    path: self.staging.display().to_string(),
                    message: remove_error.to_string(),
                }
                .into()),
                Ok(()) => Err(FileError::Copy {
                    from: self.staging.display().to_string(),
                    to: self.target.display().to_string(),
                    message: error.to_string(),
                }
                .into()),
            };
        }

        io.unlink(&self.staging)
    }
}

impl Drop for ReplaceTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        // 中断経路では台帳の掃除も同じファイルを対象にするため、
        // ここでの削除失敗は致命的ではない
        if let Err(error) = fs::remove_file(&self.staging) {
            if error.kind() != io::ErrorKind::NotFound {
                log::warn!(
                    "uncommitted staging file {} was not removed: {}",
                    self.staging.display(),
                    error
                );
            }
        }
    }
}

/// rename が既存・書き込み禁止の宛先を拒否するプラットフォームでは
/// 事前に宛先の保護を外して削除する
#[cfg(windows)]
fn clear_destination_for_rename(target: &Path) -> Result<()> {
    let metadata = match fs::metadata(target) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(()),
    };

    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(target, permissions).map_err(|error| FileError::Remove {
            path: target.display().to_string(),
            message: error.to_string(),
        })?;
    }

    fs::remove_file(target).map_err(|error| {
        FileError::Remove {
            path: target.display().to_string(),
            message: error.to_string(),
        }
        .into()
    })
}

#[cfg(not(windows))]
fn clear_destination_for_rename(_target: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(windows)]
fn is_cross_device(error: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    error.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_error: &io::Error) -> bool {
    false
}
