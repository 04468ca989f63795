use std::fs;
use stred::{AppendBuffer, CheckedIo, OpenMode, ReplaceTransaction, SymlinkResolver};
use tempfile::TempDir;

/// 行単位の変換→原子的置き換えという、ツール本体と同じ使い方の通し確認
#[test]
fn test_line_transform_pipeline() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("input.txt");
    fs::write(&source, b"alpha\nbeta\ngamma\n").unwrap();

    let mut io = CheckedIo::new("stred");
    let input = io.open(&source, OpenMode::Read, true).unwrap().unwrap();
    let txn = ReplaceTransaction::begin(&mut io, &source).unwrap();
    let output = txn.handle().unwrap();

    let mut line = AppendBuffer::new();
    while io.getline(input, &mut line).unwrap().is_some() {
        let upper: Vec<u8> = line.contents().iter().map(|b| b.to_ascii_uppercase()).collect();
        io.write(output, &upper).unwrap();
        line.clear();
    }

    io.close(Some(input)).unwrap();
    txn.commit(&mut io).unwrap();

    assert_eq!(fs::read(&source).unwrap(), b"ALPHA\nBETA\nGAMMA\n");
    assert_eq!(io.open_count(), 0);
}

#[test]
fn test_probe_open_then_fatal_open() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.txt");
    let mut io = CheckedIo::new("stred");

    // 存在確認はエラーにならない
    assert!(io.open(&missing, OpenMode::Read, false).unwrap().is_none());

    // 同じパスでも fail_is_fatal ならエラーとしてパスを名指しする
    let error = io.open(&missing, OpenMode::Read, true).unwrap_err();
    assert!(error.to_string().contains("missing.txt"));
}

#[test]
fn test_append_mode_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.txt");
    fs::write(&path, b"first\n").unwrap();

    let mut io = CheckedIo::new("stred");
    let handle = io.open(&path, OpenMode::Append, true).unwrap().unwrap();
    io.write(handle, b"second\n").unwrap();
    io.close(Some(handle)).unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"first\nsecond\n");
}

#[test]
fn test_flush_makes_writes_visible() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let mut io = CheckedIo::new("stred");

    let handle = io.open(&path, OpenMode::Write, true).unwrap().unwrap();
    io.write(handle, b"buffered\n").unwrap();
    io.flush(handle).unwrap();

    // クローズ前でもフラッシュ済みの内容は読める
    assert_eq!(fs::read(&path).unwrap(), b"buffered\n");
    io.close(Some(handle)).unwrap();
}

#[test]
fn test_close_all_closes_each_entry_exactly_once() {
    let dir = TempDir::new().unwrap();
    let mut io = CheckedIo::new("stred");

    let a = io
        .open(&dir.path().join("a.txt"), OpenMode::Write, true)
        .unwrap()
        .unwrap();
    let b = io
        .open(&dir.path().join("b.txt"), OpenMode::Write, true)
        .unwrap()
        .unwrap();
    io.write(a, b"a\n").unwrap();
    io.write(b, b"b\n").unwrap();

    io.close(None).unwrap();
    assert_eq!(io.open_count(), 0);
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"a\n");
    assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"b\n");

    // 2度目の全件クローズは標準ストリームのフラッシュ以外は何もしない
    io.close(None).unwrap();
}

#[test]
fn test_stage_prefers_tool_specific_env_dir() {
    let dir = TempDir::new().unwrap();
    let temp_home = dir.path().join("staging-area");
    fs::create_dir(&temp_home).unwrap();

    std::env::set_var("STRED_TMPDIR", &temp_home);
    let mut io = CheckedIo::new("stred");
    let (handle, path) = io.stage("probe.", None).unwrap();
    std::env::remove_var("STRED_TMPDIR");

    assert_eq!(path.parent().unwrap(), temp_home.as_path());
    io.close(Some(handle)).unwrap();
    io.unlink(&path).unwrap();
}

#[test]
fn test_sweep_after_multiple_stages() {
    let dir = TempDir::new().unwrap();
    let mut io = CheckedIo::new("stred");

    let mut staged = Vec::new();
    for index in 0..3 {
        let base = format!("t{}.", index);
        let (_, path) = io.stage(&base, Some(dir.path())).unwrap();
        staged.push(path);
    }
    assert!(staged.iter().all(|path| path.exists()));

    io.sweep_temporaries();
    assert!(staged.iter().all(|path| !path.exists()));
    assert_eq!(io.open_count(), 0);
}

#[cfg(all(unix, feature = "follow-symlinks"))]
#[test]
fn test_resolve_then_open_edits_link_target() {
    use std::os::unix::fs::symlink;

    let dir = TempDir::new().unwrap();
    let real = dir.path().join("real.txt");
    let link = dir.path().join("link.txt");
    fs::write(&real, b"old\n").unwrap();
    symlink(&real, &link).unwrap();

    let mut io = CheckedIo::new("stred");
    let mut resolver = SymlinkResolver::new();
    let resolved: std::path::PathBuf = resolver.resolve(&link).unwrap().to_path_buf();
    assert_eq!(resolved, real);

    // リンクではなく実体の側が置き換わる
    let txn = ReplaceTransaction::begin(&mut io, &resolved).unwrap();
    io.write(txn.handle().unwrap(), b"new\n").unwrap();
    txn.commit(&mut io).unwrap();

    assert_eq!(fs::read(&real).unwrap(), b"new\n");
    assert!(link.exists());
}

#[test]
fn test_error_messages_name_registered_stream() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("named.txt");
    fs::write(&path, b"x").unwrap();

    let mut io = CheckedIo::new("stred");
    let handle = io.open(&path, OpenMode::Read, true).unwrap().unwrap();
    assert!(io.name_of(handle).ends_with("named.txt"));

    io.close(Some(handle)).unwrap();
    assert_eq!(io.name_of(handle), "<unknown>");
}
