//! チェック付きファイルI/O
//!
//! open/read/write/flush/close の各操作を台帳と連動させ、失敗を
//! 失敗箇所のパス付きで一様に報告する。致命的エラーの最終処理
//! （診断出力→一時ファイル掃除→固定コードでの終了）もここに集約する

use crate::buffer::AppendBuffer;
use crate::error::{FileError, Result, StredError, FATAL_EXIT_CODE};
use crate::file::registry::{OpenFileEntry, OpenFileTable, Stream};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

pub use crate::file::registry::Handle;

/// ステージングファイル名の一意サフィックス長
const STAGE_SUFFIX_LEN: usize = 6;
/// 一意名生成の試行上限
const STAGE_MAX_ATTEMPTS: u64 = 64;
/// 一時ディレクトリの環境変数（優先順）
const TEMP_DIR_VARS: [&str; 3] = ["STRED_TMPDIR", "TMPDIR", "TMP"];

/// ファイルのオープンモード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// 読み取り専用
    Read,
    /// 新規作成または切り詰めて書き込み
    Write,
    /// 末尾への追記（なければ作成）
    Append,
}

/// チェック付きI/Oの実行主体
///
/// 開いたファイルの台帳と、診断メッセージに前置する起動名を所有する
#[derive(Debug)]
pub struct CheckedIo {
    program: String,
    table: OpenFileTable,
}

impl CheckedIo {
    /// 起動名を指定して作成
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            table: OpenFileTable::new(),
        }
    }

    /// 診断メッセージに使う起動名を取得
    pub fn program(&self) -> &str {
        &self.program
    }

    /// 台帳に登録中のストリーム数を取得
    pub fn open_count(&self) -> usize {
        self.table.len()
    }

    /// ハンドルをエラーメッセージ用の名前に解決
    pub fn name_of(&self, handle: Handle) -> &str {
        self.table.name_of(handle)
    }

    /// ファイルを開いて台帳に登録
    ///
    /// `fail_is_fatal` が偽の場合、失敗は `Ok(None)` として静かに返す
    /// （存在確認だけしたい呼び出し側のため）
    pub fn open(&mut self, path: &Path, mode: OpenMode, fail_is_fatal: bool) -> Result<Option<Handle>> {
        let opened = match mode {
            OpenMode::Read => File::open(path).map(|file| Stream::Reader(BufReader::new(file))),
            OpenMode::Write => File::create(path).map(|file| Stream::Writer(BufWriter::new(file))),
            OpenMode::Append => OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map(|file| Stream::Writer(BufWriter::new(file))),
        };

        match opened {
            Ok(stream) => {
                let handle = self.table.register(stream, &path.to_string_lossy(), false);
                Ok(Some(handle))
            }
            Err(error) if fail_is_fatal => Err(FileError::Open {
                path: path.display().to_string(),
                message: error.to_string(),
            }
            .into()),
            Err(_) => Ok(None),
        }
    }

    /// ステージングファイルを作成して台帳に登録
    ///
    /// 置き先ディレクトリの優先順位：明示ヒント → STRED_TMPDIR →
    /// TMPDIR → TMP → カレントディレクトリ。ファイル名は `base` に
    /// 6文字の一意サフィックスを付けたもの
    pub fn stage(&mut self, base: &str, dir_hint: Option<&Path>) -> Result<(Handle, PathBuf)> {
        let dir = resolve_temp_dir(dir_hint);

        for attempt in 0..STAGE_MAX_ATTEMPTS {
            let candidate = dir.join(format!("{}{}", base, unique_suffix(attempt)));
            match create_stage_file(&candidate) {
                Ok(file) => {
                    let name = candidate.to_string_lossy().into_owned();
                    let handle = self
                        .table
                        .register(Stream::Writer(BufWriter::new(file)), &name, true);
                    return Ok((handle, candidate));
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => continue,
                Err(error) => {
                    return Err(FileError::Stage {
                        path: candidate.display().to_string(),
                        message: error.to_string(),
                    }
                    .into())
                }
            }
        }

        Err(FileError::Stage {
            path: dir.join(format!("{}XXXXXX", base)).display().to_string(),
            message: "exhausted unique name attempts".to_string(),
        }
        .into())
    }

    /// チェック付き読み取り
    ///
    /// 入力終端による短い読み取りはエラーではない。実際のエラー指示
    /// のみを致命的として報告する
    pub fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        let name = self.table.name_of(handle).to_string();
        let entry = match self.table.get_mut(handle) {
            Some(entry) => entry,
            None => return Err(unregistered(name, "read")),
        };

        match &mut entry.stream {
            Stream::Reader(reader) => loop {
                match reader.read(buf) {
                    Ok(count) => return Ok(count),
                    Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                    Err(error) => {
                        return Err(FileError::Read {
                            name,
                            message: error.to_string(),
                        }
                        .into())
                    }
                }
            },
            Stream::Writer(_) => Err(FileError::Read {
                name,
                message: "stream is not open for reading".to_string(),
            }
            .into()),
        }
    }

    /// 1行をチェック付きで読み取り、呼び出し側のバッファへ追記
    ///
    /// 改行を含めて追記し、読み取ったバイト数を返す。入力終端では
    /// `None` を返す
    pub fn getline(&mut self, handle: Handle, out: &mut AppendBuffer) -> Result<Option<usize>> {
        let name = self.table.name_of(handle).to_string();
        let entry = match self.table.get_mut(handle) {
            Some(entry) => entry,
            None => return Err(unregistered(name, "read")),
        };

        match &mut entry.stream {
            Stream::Reader(reader) => {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => Ok(None),
                    Ok(count) => {
                        out.append(&line);
                        Ok(Some(count))
                    }
                    Err(error) => Err(FileError::Read {
                        name,
                        message: error.to_string(),
                    }
                    .into()),
                }
            }
            Stream::Writer(_) => Err(FileError::Read {
                name,
                message: "stream is not open for reading".to_string(),
            }
            .into()),
        }
    }

    /// チェック付き書き込み
    ///
    /// 全バイトの書き込み完了か、さもなくばエラー。長さ0の書き込みは
    /// 常に成功の空振り
    pub fn write(&mut self, handle: Handle, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let name = self.table.name_of(handle).to_string();
        let entry = match self.table.get_mut(handle) {
            Some(entry) => entry,
            None => return Err(unregistered(name, "write")),
        };

        match &mut entry.stream {
            Stream::Writer(writer) => writer.write_all(data).map_err(|error| {
                FileError::Write {
                    name,
                    message: error.to_string(),
                }
                .into()
            }),
            Stream::Reader(_) => Err(FileError::Write {
                name,
                message: "stream is not open for writing".to_string(),
            }
            .into()),
        }
    }

    /// チェック付きフラッシュ
    ///
    /// システム側の後始末で先に閉じられたストリーム（EBADF）は許容する
    pub fn flush(&mut self, handle: Handle) -> Result<()> {
        let name = self.table.name_of(handle).to_string();
        let entry = match self.table.get_mut(handle) {
            Some(entry) => entry,
            None => return Err(unregistered(name, "flush")),
        };

        match &mut entry.stream {
            Stream::Writer(writer) => match writer.flush() {
                Ok(()) => Ok(()),
                Err(error) if is_ebadf(&error) => Ok(()),
                Err(error) => Err(FileError::Flush {
                    name,
                    message: error.to_string(),
                }
                .into()),
            },
            Stream::Reader(_) => Ok(()),
        }
    }

    /// チェック付きクローズ
    ///
    /// `Some(handle)` はそのストリームをフラッシュして閉じ、台帳から
    /// 外す。`None` は全件クローズ：台帳の各エントリをちょうど一度ずつ
    /// 閉じたあと、標準出力と標準エラーもフラッシュする。リダイレクト
    /// 先が書けなくなっている場合もここで検出できる
    pub fn close(&mut self, handle: Option<Handle>) -> Result<()> {
        match handle {
            Some(handle) => {
                let name = self.table.name_of(handle).to_string();
                match self.table.remove(handle) {
                    Some(entry) => close_entry(entry),
                    None => Err(unregistered(name, "close")),
                }
            }
            None => {
                // 途中で失敗した場合、残りは後始末の掃除に委ねる
                while let Some(entry) = self.table.pop_any() {
                    close_entry(entry)?;
                }

                flush_standard_stream("stdout", io::stdout().flush())?;
                flush_standard_stream("stderr", io::stderr().flush())?;
                Ok(())
            }
        }
    }

    /// チェック付き削除
    pub fn unlink(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|error| {
            FileError::Remove {
                path: path.display().to_string(),
                message: error.to_string(),
            }
            .into()
        })
    }

    /// 未コミットの一時ファイルをすべて閉じて削除
    ///
    /// 削除に失敗しても報告するだけで中断はしない。各エントリは
    /// ちょうど一度ずつ処理される
    pub fn sweep_temporaries(&mut self) {
        for entry in self.table.drain_temporaries() {
            let OpenFileEntry { stream, name, .. } = entry;
            drop(stream);
            if let Err(error) = fs::remove_file(&name) {
                eprintln!("{}: cannot remove {}: {}", self.program, name, error);
            }
        }
    }

    /// 致命的エラーの最終処理
    ///
    /// 診断メッセージを1行出力し、一時ファイルを掃除してから固定の
    /// 終了コードでプロセスを終了する。復帰しない
    pub fn abort(&mut self, error: &StredError) -> ! {
        eprintln!("{}: {}", self.program, error);
        self.sweep_temporaries();
        process::exit(FATAL_EXIT_CODE);
    }
}

/// 単一エントリを閉じる
///
/// 書き込みストリームはフラッシュを終えてから破棄する。クローズ
/// 自体の失敗はフラッシュ時点で現れる
fn close_entry(entry: OpenFileEntry) -> Result<()> {
    let OpenFileEntry { stream, name, .. } = entry;
    match stream {
        Stream::Writer(mut writer) => match writer.flush() {
            Ok(()) => Ok(()),
            Err(error) if is_ebadf(&error) => Ok(()),
            Err(error) => Err(FileError::Close {
                name,
                message: error.to_string(),
            }
            .into()),
        },
        Stream::Reader(_) => Ok(()),
    }
}

fn flush_standard_stream(name: &str, result: io::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(error) if is_ebadf(&error) => Ok(()),
        Err(error) => Err(FileError::Flush {
            name: name.to_string(),
            message: error.to_string(),
        }
        .into()),
    }
}

fn unregistered(name: String, operation: &str) -> StredError {
    let message = format!("stream is not registered for {}", operation);
    match operation {
        "write" => FileError::Write { name, message }.into(),
        "flush" => FileError::Flush { name, message }.into(),
        "close" => FileError::Close { name, message }.into(),
        _ => FileError::Read { name, message }.into(),
    }
}

/// ステージング先ディレクトリを決定
fn resolve_temp_dir(dir_hint: Option<&Path>) -> PathBuf {
    if let Some(hint) = dir_hint {
        if !hint.as_os_str().is_empty() {
            return hint.to_path_buf();
        }
    }

    for var in TEMP_DIR_VARS {
        if let Some(dir) = env::var_os(var) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
    }

    PathBuf::from(".")
}

/// ステージングファイルを排他的に作成
fn create_stage_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        // 所有者が変わる可能性があるので、作成時点では権限を絞る
        options.mode(0o600);
    }

    options.open(path)
}

/// プロセスIDと時刻を種にした固定長の一意サフィックスを生成
fn unique_suffix(attempt: u64) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0);
    let mut seed = nanos
        ^ ((process::id() as u64) << 32)
        ^ attempt.wrapping_mul(0x9e37_79b9_7f4a_7c15);

    let mut suffix = String::with_capacity(STAGE_SUFFIX_LEN);
    for _ in 0..STAGE_SUFFIX_LEN {
        suffix.push(ALPHABET[(seed % ALPHABET.len() as u64) as usize] as char);
        seed /= ALPHABET.len() as u64;
    }
    suffix
}

#[cfg(unix)]
fn is_ebadf(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EBADF)
}

#[cfg(not(unix))]
fn is_ebadf(_error: &io::Error) -> bool {
    false
}
