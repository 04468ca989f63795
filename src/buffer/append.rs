//! 追記専用バイトバッファ実装
//!
//! 行の組み立てやステージング内容の蓄積に使う可変長バッファ。
//! 成長方針：容量の2倍を試し、それでも足りない場合は要求サイズ
//! ちょうどまで拡張する（巨大な単発追記で倍々の無駄を出さない）

/// 生成直後の最小容量
const MIN_CAPACITY: usize = 50;
const GROWTH_FACTOR: usize = 2;

/// 追記専用バイトバッファ
///
/// 末尾への追記のみを許し、途中の挿入・削除は提供しない。
/// 容量は明示的に解放されるまで縮小しない。
#[derive(Debug, Clone)]
pub struct AppendBuffer {
    data: Vec<u8>,
}

impl AppendBuffer {
    /// 最小容量で新しいバッファを作成
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(MIN_CAPACITY),
        }
    }

    /// 指定容量で新しいバッファを作成
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.max(MIN_CAPACITY)),
        }
    }

    /// バイト列を末尾に追記し、追記された領域を返す
    pub fn append(&mut self, bytes: &[u8]) -> &[u8] {
        self.reserve_for(bytes.len());
        let start = self.data.len();
        self.data.extend_from_slice(bytes);
        &self.data[start..]
    }

    /// 1バイトだけ追記する高速パス
    ///
    /// 1バイトの追記はツール全体で最頻の操作なので、
    /// 汎用コピーを経由しない
    pub fn append_byte(&mut self, byte: u8) -> &u8 {
        if self.data.len() == self.data.capacity() {
            self.reserve_for(1);
        }
        self.data.push(byte);
        &self.data[self.data.len() - 1]
    }

    /// 有効なバイト列を取得（コピーなし）
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// 有効なバイト数を取得
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 空かどうかを判定
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 現在の確保済み容量を取得
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// 長さを0に戻す（容量は保持）
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// 容量を拡張
    ///
    /// `capacity * 2` を試し、要求量に届かない場合は要求量ちょうど
    fn reserve_for(&mut self, additional: usize) {
        let required = self.data.len() + additional;
        if required <= self.data.capacity() {
            return;
        }

        let mut new_capacity = self.data.capacity().saturating_mul(GROWTH_FACTOR);
        if new_capacity < required {
            new_capacity = required;
        }

        self.data.reserve_exact(new_capacity - self.data.len());
    }
}

impl Default for AppendBuffer {
    fn default() -> Self {
        Self::new()
    }
}
