use std::{
    backtrace::Backtrace,
    num::{NonZeroU16, NonZeroU32},
    panic::Location,
};

use crate::BoxType;

/// このライブラリ用の Result 型
pub type Result<T> = core::result::Result<T, Error>;

/// エンコード/デコード操作のエラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 入力データの形式または構造が無効である
    InvalidInput,

    /// データコンテンツが無効または破損している
    InvalidData,

    /// 提供されたバッファがエンコード/デコード結果を保持するのに小さすぎる
    InsufficientBuffer,

    /// 操作またはデータ形式がサポートされていない
    Unsupported,

    /// その他の予期しないエラー
    Other,
}

/// エラー型
pub struct Error {
    /// 発生したエラーの種類
    pub kind: ErrorKind,

    /// エラーが発生した理由
    pub reason: String,

    /// エラーが作成されたソースコードの場所
    pub location: &'static Location<'static>,

    /// エラーが発生した MP4 ボックスの種類
    pub box_type: Option<BoxType>,

    /// エラー発生箇所を示すバックトレース
    ///
    /// バックトレースは `RUST_BACKTRACE` 環境変数が設定されていない場合には取得されない
    pub backtrace: Backtrace,
}

impl Error {
    /// [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self::with_reason(kind, String::new())
    }

    /// エラー理由つきで [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn with_reason<T: Into<String>>(kind: ErrorKind, reason: T) -> Self {
        Self {
            kind,
            reason: reason.into(),
            location: std::panic::Location::caller(),
            box_type: None,
            backtrace: Backtrace::capture(),
        }
    }

    #[track_caller]
    pub(crate) fn unsupported<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::Unsupported, reason)
    }

    #[track_caller]
    pub(crate) fn invalid_input<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvalidInput, reason)
    }

    #[track_caller]
    pub(crate) fn invalid_data<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvalidData, reason)
    }

    #[track_caller]
    pub(crate) fn insufficient_buffer() -> Self {
        Self::new(ErrorKind::InsufficientBuffer)
    }

    /// エラーが発生したボックスの種別を設定する
    ///
    /// 既に設定済みの場合には、より内側のボックスの情報を優先してそのまま保持する
    pub fn with_box_type(mut self, box_type: BoxType) -> Self {
        if self.box_type.is_none() {
            self.box_type = Some(box_type);
        }
        self
    }

    #[track_caller]
    pub(crate) fn check_buffer_size(required_size: usize, buf: &[u8]) -> Result<()> {
        if buf.len() < required_size {
            Err(Self::insufficient_buffer())
        } else {
            Ok(())
        }
    }
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(ty) = self.box_type {
            write!(f, "[{ty}] ")?;
        }

        write!(f, "{:?}: {}", self.kind, self.reason)?;

        write!(f, " (at {}:{})", self.location.file(), self.location.line())?;
        if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            write!(f, "\n\nBacktrace:\n{}", self.backtrace)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

/// バイト列に変換可能な型を表現するためのトレイト
pub trait Encode {
    /// `self` をバイト列に変換して `buf` に書きこむ
    ///
    /// 返り値は、変換後のバイト列のサイズで、
    /// もし `buf` のサイズが不足している場合には [`ErrorKind::InsufficientBuffer`] エラーが返される
    fn encode(&self, buf: &mut [u8]) -> Result<usize>;

    /// `self` をバイト列に変換して、変換後のバイト列を返す
    fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0; 64];
        loop {
            match self.encode(&mut buf) {
                Ok(size) => {
                    buf.truncate(size);
                    return Ok(buf);
                }
                Err(e) if e.kind == ErrorKind::InsufficientBuffer => {
                    buf.resize(buf.len() * 2, 0);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Encode for u8 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(1, buf)?;
        buf[0] = *self;
        Ok(1)
    }
}

impl Encode for u16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(2, buf)?;
        buf[..2].copy_from_slice(&self.to_be_bytes());
        Ok(2)
    }
}

impl Encode for u32 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(4, buf)?;
        buf[..4].copy_from_slice(&self.to_be_bytes());
        Ok(4)
    }
}

impl Encode for u64 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(8, buf)?;
        buf[..8].copy_from_slice(&self.to_be_bytes());
        Ok(8)
    }
}

impl Encode for i8 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(1, buf)?;
        buf[0] = *self as u8;
        Ok(1)
    }
}

impl Encode for i16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(2, buf)?;
        buf[..2].copy_from_slice(&self.to_be_bytes());
        Ok(2)
    }
}

impl Encode for i32 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(4, buf)?;
        buf[..4].copy_from_slice(&self.to_be_bytes());
        Ok(4)
    }
}

impl Encode for i64 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(8, buf)?;
        buf[..8].copy_from_slice(&self.to_be_bytes());
        Ok(8)
    }
}

impl Encode for NonZeroU16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl Encode for NonZeroU32 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        for item in self {
            offset += item.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl Encode for [u8] {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(self.len(), buf)?;
        buf[..self.len()].copy_from_slice(self);
        Ok(self.len())
    }
}

/// バイト列から `Self` に変換するためのトレイト
pub trait Decode: Sized {
    /// バイト列からこの型の値をデコードする
    ///
    /// 成功時には、デコードされた値とデコードに消費されたバイト数のタプルが、
    /// 失敗時には [`Error`] が返される
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// オフセット位置からバイト列をデコードし、オフセットを自動で進める
    fn decode_at(buf: &[u8], offset: &mut usize) -> Result<Self> {
        let (decoded, size) = Self::decode(&buf[*offset..])?;
        *offset += size;
        Ok(decoded)
    }
}

impl Decode for u8 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(1, buf)?;
        Ok((buf[0], 1))
    }
}

impl Decode for u16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(2, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1]]), 2))
    }
}

impl Decode for u32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(4, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]), 4))
    }
}

impl Decode for u64 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(8, buf)?;
        let bytes = [
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ];
        Ok((Self::from_be_bytes(bytes), 8))
    }
}

impl Decode for i8 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(1, buf)?;
        Ok((buf[0] as i8, 1))
    }
}

impl Decode for i16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(2, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1]]), 2))
    }
}

impl Decode for i32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(4, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]), 4))
    }
}

impl Decode for i64 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(8, buf)?;
        let bytes = [
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ];
        Ok((Self::from_be_bytes(bytes), 8))
    }
}

impl Decode for NonZeroU16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u16::decode(buf)?;
        NonZeroU16::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::invalid_input("Expected a non-zero integer, but got 0"))
    }
}

impl Decode for NonZeroU32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u32::decode(buf)?;
        NonZeroU32::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::invalid_input("Expected a non-zero integer, but got 0"))
    }
}

impl<T: Decode + Default + Copy, const N: usize> Decode for [T; N] {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut items = [T::default(); N];
        let mut offset = 0;

        for item in &mut items {
            *item = T::decode_at(buf, &mut offset)?;
        }

        Ok((items, offset))
    }
}

/// 可変幅（1 ～ 8 バイト）のビッグエンディアン符号なし整数をエンコードする
///
/// `field_size` が範囲外の場合や、値が指定の幅に収まらない場合にはエラーが返される
#[track_caller]
pub fn encode_variable_uint(value: u64, field_size: usize, buf: &mut [u8]) -> Result<usize> {
    if !(1..=8).contains(&field_size) {
        return Err(Error::invalid_input(format!(
            "Invalid variable integer field size: {field_size}"
        )));
    }
    if field_size < 8 && value >= 1 << (field_size as u32 * 8) {
        return Err(Error::invalid_input(format!(
            "Value {value} does not fit into {field_size} bytes"
        )));
    }
    Error::check_buffer_size(field_size, buf)?;
    buf[..field_size].copy_from_slice(&value.to_be_bytes()[8 - field_size..]);
    Ok(field_size)
}

/// 可変幅（1 ～ 8 バイト）のビッグエンディアン符号なし整数をデコードする
#[track_caller]
pub fn decode_variable_uint(buf: &[u8], offset: &mut usize, field_size: usize) -> Result<u64> {
    if !(1..=8).contains(&field_size) {
        return Err(Error::invalid_input(format!(
            "Invalid variable integer field size: {field_size}"
        )));
    }
    Error::check_buffer_size(*offset + field_size, buf)?;

    let mut value = 0u64;
    for &b in &buf[*offset..][..field_size] {
        value = (value << 8) | b as u64;
    }
    *offset += field_size;
    Ok(value)
}

/// バイト列の上をビット単位で読み進めるためのカーソル
///
/// [`crate::descriptors::AudioSpecificConfig`] のような、
/// バイト境界に揃っていないビットレベルの文法を扱うために使用される
#[derive(Debug)]
pub struct BitReader<'a> {
    buf: &'a [u8],
    bit_offset: usize,
}

impl<'a> BitReader<'a> {
    /// バイト列の先頭を指す [`BitReader`] インスタンスを生成する
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, bit_offset: 0 }
    }

    /// 残りの読み込み可能なビット数を取得する
    pub fn remaining_bits(&self) -> usize {
        self.buf.len() * 8 - self.bit_offset
    }

    /// `n` ビット（最大 32）を読み込み、符号なし整数として返す
    #[track_caller]
    pub fn read_bits(&mut self, mut n: usize) -> Result<u32> {
        if n > 32 {
            return Err(Error::invalid_input(format!(
                "Cannot read more than 32 bits at once: {n}"
            )));
        }
        if self.remaining_bits() < n {
            return Err(Error::insufficient_buffer());
        }

        let mut value = 0u32;
        while n > 0 {
            let byte = self.buf[self.bit_offset / 8];
            let available = 8 - self.bit_offset % 8;
            let take = available.min(n);
            let bits = (byte >> (available - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | bits as u32;
            self.bit_offset += take;
            n -= take;
        }
        Ok(value)
    }

    /// 1 ビットを読み込み、真偽値として返す
    #[track_caller]
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }
}

/// バイト列にビット単位で書き込むためのカーソル
///
/// 書き込みはビッグエンディアン（上位ビットから）で行われ、
/// 最後のバイトの余りビットはゼロで埋められる
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_offset: usize,
}

impl BitWriter {
    /// 空の [`BitWriter`] インスタンスを生成する
    pub fn new() -> Self {
        Self::default()
    }

    /// `value` の下位 `n` ビット（最大 32）を書き込む
    ///
    /// `value` が `n` ビットに収まらない場合にはエラーが返される
    #[track_caller]
    pub fn write_bits(&mut self, value: u32, mut n: usize) -> Result<()> {
        if n > 32 {
            return Err(Error::invalid_input(format!(
                "Cannot write more than 32 bits at once: {n}"
            )));
        }
        if n < 32 && value >= 1 << n {
            return Err(Error::invalid_input(format!(
                "Value {value} does not fit into {n} bits"
            )));
        }

        while n > 0 {
            if self.bit_offset % 8 == 0 {
                self.buf.push(0);
            }
            let available = 8 - self.bit_offset % 8;
            let take = available.min(n);
            let bits = ((value >> (n - take)) & ((1u64 << take) - 1) as u32) as u8;
            let last = self.buf.len() - 1;
            self.buf[last] |= bits << (available - take);
            self.bit_offset += take;
            n -= take;
        }
        Ok(())
    }

    /// 書き込まれたビット列をバイト列として取り出す
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_uint_rejects_out_of_range_sizes() {
        let mut buf = [0; 16];
        assert!(encode_variable_uint(1, 0, &mut buf).is_err());
        assert!(encode_variable_uint(1, 9, &mut buf).is_err());
        assert!(decode_variable_uint(&buf, &mut 0, 0).is_err());
        assert!(decode_variable_uint(&buf, &mut 0, 9).is_err());
    }

    #[test]
    fn variable_uint_roundtrip() -> Result<()> {
        let mut buf = [0; 8];
        for field_size in 1..=8usize {
            let value = 0x0102_0304_0506_0708u64 & ((1u128 << (field_size * 8)) - 1) as u64;
            let written = encode_variable_uint(value, field_size, &mut buf)?;
            assert_eq!(written, field_size);
            let mut offset = 0;
            let decoded = decode_variable_uint(&buf, &mut offset, field_size)?;
            assert_eq!(decoded, value);
            assert_eq!(offset, field_size);
        }
        Ok(())
    }

    #[test]
    fn variable_uint_rejects_overflow() {
        let mut buf = [0; 8];
        assert!(encode_variable_uint(256, 1, &mut buf).is_err());
        assert!(encode_variable_uint(255, 1, &mut buf).is_ok());
    }

    #[test]
    fn bit_reader_crosses_byte_boundaries() -> Result<()> {
        let mut reader = BitReader::new(&[0b1011_0011, 0b0100_0001]);
        assert_eq!(reader.read_bits(3)?, 0b101);
        assert_eq!(reader.read_bits(7)?, 0b1_0011_01);
        assert_eq!(reader.remaining_bits(), 6);
        assert_eq!(reader.read_bits(6)?, 0b00_0001);
        assert!(reader.read_bits(1).is_err());
        Ok(())
    }

    #[test]
    fn bit_writer_matches_reader() -> Result<()> {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3)?;
        writer.write_bits(0b1_0011_01, 7)?;
        writer.write_bits(0b00_0001, 6)?;
        assert_eq!(writer.finish(), vec![0b1011_0011, 0b0100_0001]);
        Ok(())
    }

    #[test]
    fn bit_writer_rejects_too_large_values() {
        let mut writer = BitWriter::new();
        assert!(writer.write_bits(8, 3).is_err());
        assert!(writer.write_bits(7, 3).is_ok());
    }
}
