//! 開いたファイルの台帳
//!
//! ツールが開いたすべてのストリームを、エラーメッセージ用の名前と
//! 一時ファイルフラグとともに追跡する。致命的エラー時の後始末は
//! この台帳を起点に行われる

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};

/// 台帳未登録のストリームに対するフォールバック名
const UNKNOWN_NAME: &str = "<unknown>";

/// 開いたストリームへの不透明ハンドル
///
/// 台帳が採番する識別子。OSのファイル記述子とは独立しており、
/// 再利用されない
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

/// 登録されるストリーム本体
///
/// オープンモードに応じて読み取り用・書き込み用のどちらかを保持する
#[derive(Debug)]
pub enum Stream {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
}

/// 台帳エントリ
///
/// ストリームの所有権はエントリが独占する。`temp` が真のエントリは
/// コミット前にプロセスが中断した場合に削除の対象となる
#[derive(Debug)]
pub struct OpenFileEntry {
    pub stream: Stream,
    pub name: String,
    pub temp: bool,
}

/// 開いたファイルの台帳
///
/// プロセス全体で一つをCheckedIoが所有する。挿入順は保持しないが、
/// 全件破棄の際に各エントリをちょうど一度ずつ処理する
#[derive(Debug, Default)]
pub struct OpenFileTable {
    entries: HashMap<u64, OpenFileEntry>,
    next_id: u64,
}

impl OpenFileTable {
    /// 空の台帳を作成
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    /// ストリームを登録しハンドルを採番
    pub fn register(&mut self, stream: Stream, name: &str, temp: bool) -> Handle {
        let id = self.next_id;
        self.next_id += 1;

        self.entries.insert(
            id,
            OpenFileEntry {
                stream,
                name: name.to_string(),
                temp,
            },
        );

        Handle(id)
    }

    /// ハンドルからエントリを取得
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut OpenFileEntry> {
        self.entries.get_mut(&handle.0)
    }

    /// ハンドルをエラーメッセージ用の名前に解決
    pub fn name_of(&self, handle: Handle) -> &str {
        self.entries
            .get(&handle.0)
            .map(|entry| entry.name.as_str())
            .unwrap_or(UNKNOWN_NAME)
    }

    /// エントリを台帳から取り外す
    pub fn remove(&mut self, handle: Handle) -> Option<OpenFileEntry> {
        self.entries.remove(&handle.0)
    }

    /// 任意のエントリを一件取り外す（全件クローズ用）
    pub fn pop_any(&mut self) -> Option<OpenFileEntry> {
        let id = self.entries.keys().next().copied()?;
        self.entries.remove(&id)
    }

    /// 一時ファイルのエントリだけをすべて取り外す（後始末用）
    pub fn drain_temporaries(&mut self) -> Vec<OpenFileEntry> {
        let temp_ids: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.temp)
            .map(|(id, _)| *id)
            .collect();

        temp_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    /// 登録中のエントリ数を取得
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 台帳が空かどうかを判定
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn writer_stream(dir: &TempDir, name: &str) -> Stream {
        let file = File::create(dir.path().join(name)).unwrap();
        Stream::Writer(BufWriter::new(file))
    }

    #[test]
    fn test_register_and_resolve_name() {
        let dir = TempDir::new().unwrap();
        let mut table = OpenFileTable::new();

        let handle = table.register(writer_stream(&dir, "a.txt"), "a.txt", false);
        assert_eq!(table.name_of(handle), "a.txt");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unknown_handle_name_fallback() {
        let dir = TempDir::new().unwrap();
        let mut table = OpenFileTable::new();

        let handle = table.register(writer_stream(&dir, "a.txt"), "a.txt", false);
        table.remove(handle);
        assert_eq!(table.name_of(handle), "<unknown>");
    }

    #[test]
    fn test_handles_are_not_reused() {
        let dir = TempDir::new().unwrap();
        let mut table = OpenFileTable::new();

        let first = table.register(writer_stream(&dir, "a.txt"), "a.txt", false);
        table.remove(first);
        let second = table.register(writer_stream(&dir, "b.txt"), "b.txt", false);

        assert_ne!(first, second);
        assert_eq!(table.name_of(second), "b.txt");
    }

    #[test]
    fn test_drain_temporaries_leaves_regular_entries() {
        let dir = TempDir::new().unwrap();
        let mut table = OpenFileTable::new();

        table.register(writer_stream(&dir, "keep.txt"), "keep.txt", false);
        table.register(writer_stream(&dir, "tmp1"), "tmp1", true);
        table.register(writer_stream(&dir, "tmp2"), "tmp2", true);

        let drained = table.drain_temporaries();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|entry| entry.temp));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_pop_any_drains_exactly_once() {
        let dir = TempDir::new().unwrap();
        let mut table = OpenFileTable::new();

        table.register(writer_stream(&dir, "a.txt"), "a.txt", false);
        table.register(writer_stream(&dir, "b.txt"), "b.txt", true);

        let mut seen = Vec::new();
        while let Some(mut entry) = table.pop_any() {
            if let Stream::Writer(writer) = &mut entry.stream {
                writer.flush().unwrap();
            }
            seen.push(entry.name);
        }

        seen.sort();
        assert_eq!(seen, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert!(table.is_empty());
    }
}
