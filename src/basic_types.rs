use core::{
    ops::{BitAnd, Shl, Shr, Sub},
    time::Duration,
};

use crate::{
    Decode, Encode, Error, Result,
    boxes::{FtypBox, RootBox},
};

/// 全てのボックスが実装するトレイト
///
/// 本来なら `Box` という名前が適切だが、それだと標準ライブラリの [`std::boxed::Box`] と名前が
/// 衝突してしまうので、それを避けるために `BaseBox` としている
pub trait BaseBox {
    /// ボックスの種別
    fn box_type(&self) -> BoxType;

    /// 未知のボックスかどうか
    ///
    /// 基本的には `false` を返すデフォルト実装のままで問題ないが、
    /// [`UnknownBox`](crate::boxes::UnknownBox) を含む `enum` を定義する場合には、
    /// 独自の実装が必要となる
    fn is_unknown_box(&self) -> bool {
        false
    }

    /// 子ボックスを走査するイテレーターを返す
    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>>;
}

pub(crate) fn as_box_object<T: BaseBox>(t: &T) -> &dyn BaseBox {
    t
}

/// フルボックスを表すトレイト
pub trait FullBox: BaseBox {
    /// フルボックスのバージョンを返す
    fn full_box_version(&self) -> u8;

    /// フルボックスのフラグを返す
    fn full_box_flags(&self) -> FullBoxFlags;
}

/// MP4 ファイルを表す構造体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4File<B = RootBox> {
    /// MP4 ファイルの先頭に位置する `ftyp` ボックス
    pub ftyp_box: FtypBox,

    /// `ftyp` に続くボックス群
    pub boxes: Vec<B>,
}

impl<B: BaseBox> Mp4File<B> {
    /// ファイル内のトップレベルのボックス群を走査するイテレーターを返す
    pub fn iter(&self) -> impl Iterator<Item = &dyn BaseBox> {
        core::iter::empty()
            .chain(core::iter::once(&self.ftyp_box).map(as_box_object))
            .chain(self.boxes.iter().map(as_box_object))
    }
}

impl<B: BaseBox + Encode> Encode for Mp4File<B> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.ftyp_box.encode(buf)?;
        for b in &self.boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl<B: BaseBox + Decode> Decode for Mp4File<B> {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let ftyp_box = FtypBox::decode_at(buf, &mut offset)?;

        let mut boxes = Vec::new();
        while offset < buf.len() {
            boxes.push(B::decode_at(buf, &mut offset)?);
        }
        Ok((Self { ftyp_box, boxes }, offset))
    }
}

/// [`BaseBox`] に共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxHeader {
    /// ボックスの種別
    pub box_type: BoxType,

    /// ボックスのサイズ
    pub box_size: BoxSize,
}

impl BoxHeader {
    /// ヘッダーのエンコードに必要となる最小バイト数
    pub const MIN_SIZE: usize = 4 + 4;

    /// ヘッダーをエンコードする際に必要となる最大バイト数
    pub const MAX_SIZE: usize = (4 + 8) + (4 + 16);

    /// 種別とサイズを受け取って [`BoxHeader`] インスタンスを作成する
    pub const fn new(box_type: BoxType, box_size: BoxSize) -> Self {
        Self { box_type, box_size }
    }

    /// サイズが未確定のヘッダーを作成する
    ///
    /// エンコード時には、まずこのヘッダーを書き込み、ペイロードを書き込んだ後に
    /// [`BoxHeader::finalize_box_size()`] で実際のサイズを反映する
    pub fn new_variable_size(box_type: BoxType) -> Self {
        Self {
            box_type,
            box_size: BoxSize::VARIABLE_SIZE,
        }
    }

    /// エンコード済みのボックス全体のバイト列を受け取って、先頭のサイズフィールドを実際の値で上書きする
    pub fn finalize_box_size(self, box_bytes: &mut [u8]) -> Result<()> {
        if self.box_size != BoxSize::VARIABLE_SIZE {
            return Err(Error::invalid_input(
                "box_size must be VARIABLE_SIZE before finalization",
            ));
        }

        let Ok(box_size) = u32::try_from(box_bytes.len()) else {
            // ヘッダーのサイズに変更があると box_bytes 全体のレイアウトが変わってしまうのでエラーにする
            return Err(Error::invalid_input(
                "box payload too large: header size would require U64, making layout inconsistent",
            ));
        };
        box_bytes[..4].copy_from_slice(&box_size.to_be_bytes());
        Ok(())
    }

    /// ヘッダーをエンコードした際のバイト数を返す
    pub fn external_size(self) -> usize {
        self.box_type.external_size() + self.box_size.external_size()
    }

    /// ヘッダーとペイロードのバイト列を分離する
    ///
    /// ボックスのサイズが 0 の場合には、バッファーの残り全体がペイロードとして扱われる
    pub fn decode_header_and_payload(buf: &[u8]) -> Result<(Self, &[u8])> {
        let (header, header_size) = Self::decode(buf)?;
        if header.box_size.get() == 0 {
            return Ok((header, &buf[header_size..]));
        }

        let box_size = header.box_size.get() as usize;
        Error::check_buffer_size(box_size, buf).map_err(|e| e.with_box_type(header.box_type))?;
        Ok((header, &buf[header_size..box_size]))
    }
}

impl Encode for BoxHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;

        let large_size = match self.box_size {
            BoxSize::U32(size) => {
                offset += size.encode(&mut buf[offset..])?;
                None
            }
            BoxSize::U64(size) => {
                offset += 1u32.encode(&mut buf[offset..])?;
                Some(size)
            }
        };

        match self.box_type {
            BoxType::Normal(ty) => {
                offset += ty.encode(&mut buf[offset..])?;
            }
            BoxType::Uuid(ty) => {
                offset += b"uuid".encode(&mut buf[offset..])?;
                offset += ty.encode(&mut buf[offset..])?;
            }
        }

        if let Some(large_size) = large_size {
            offset += large_size.encode(&mut buf[offset..])?;
        }

        Ok(offset)
    }
}

impl Decode for BoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let box_size = u32::decode_at(buf, &mut offset)?;
        let box_type = <[u8; 4]>::decode_at(buf, &mut offset)?;

        let box_type = if box_type == *b"uuid" {
            BoxType::Uuid(<[u8; 16]>::decode_at(buf, &mut offset)?)
        } else {
            BoxType::Normal(box_type)
        };

        let box_size = if box_size == 1 {
            BoxSize::U64(u64::decode_at(buf, &mut offset)?)
        } else {
            BoxSize::U32(box_size)
        };
        if box_size.get() != 0
            && box_size.get() < (box_size.external_size() + box_type.external_size()) as u64
        {
            return Err(Error::invalid_data(format!(
                "Too small box size: actual={}, expected={} or more",
                box_size.get(),
                box_size.external_size() + box_type.external_size()
            ))
            .with_box_type(box_type));
        };

        Ok((Self { box_type, box_size }, offset))
    }
}

/// [`FullBox`] に共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxHeader {
    /// バージョン
    pub version: u8,

    /// フラグ
    pub flags: FullBoxFlags,
}

impl FullBoxHeader {
    /// フルボックスへの参照を受け取って、対応するヘッダーを作成する
    pub fn from_box<B: FullBox>(b: &B) -> Self {
        Self {
            version: b.full_box_version(),
            flags: b.full_box_flags(),
        }
    }
}

impl Encode for FullBoxHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += self.version.encode(&mut buf[offset..])?;
        offset += self.flags.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for FullBoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let version = u8::decode_at(buf, &mut offset)?;
        let flags = FullBoxFlags::decode_at(buf, &mut offset)?;
        Ok((Self { version, flags }, offset))
    }
}

/// [`FullBox`] のヘッダー部分に含まれるビットフラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxFlags(u32);

impl FullBoxFlags {
    /// 空のビットフラグを作成する
    pub const fn empty() -> Self {
        Self(0)
    }

    /// [`u32`] を受け取って、対応するビットフラグを作成する
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// `(ビット位置、フラグがセットされているかどうか)` のイテレーターを受け取って、対応するビットフラグを作成する
    pub fn from_flags<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (usize, bool)>,
    {
        let flags = iter.into_iter().filter(|x| x.1).map(|x| 1 << x.0).sum();
        Self(flags)
    }

    /// このビットフラグに対応する [`u32`] 値を返す
    pub const fn get(self) -> u32 {
        self.0
    }

    /// 指定されたビット位置のフラグがセットされているかどうかを判定する
    pub const fn is_set(self, i: usize) -> bool {
        (self.0 & (1 << i)) != 0
    }
}

impl Encode for FullBoxFlags {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.to_be_bytes()[1..].encode(buf)
    }
}

impl Decode for FullBoxFlags {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let bytes = <[u8; 3]>::decode_at(buf, &mut offset)?;
        let flags = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
        Ok((Self(flags), offset))
    }
}

/// [`BaseBox`] のサイズ
///
/// ボックスのサイズは原則として、ヘッダー部分とペイロード部分のサイズを足した値となる。
/// ただし、MP4 ファイルの末尾にあるボックスについてはサイズを 0 とすることで、ペイロードが可変長（追記可能）なボックスとして扱うことが可能となっている。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum BoxSize {
    U32(u32),
    U64(u64),
}

impl BoxSize {
    /// ファイル末尾に位置する可変長のボックスを表すための特別な値
    pub const VARIABLE_SIZE: Self = Self::U32(0);

    /// ボックス種別とペイロードサイズを受け取って、対応する [`BoxSize`] インスタンスを作成する
    pub fn with_payload_size(box_type: BoxType, payload_size: u64) -> Self {
        let mut size = 4 + box_type.external_size() as u64 + payload_size;
        if let Ok(size) = u32::try_from(size) {
            Self::U32(size)
        } else {
            size += 8;
            Self::U64(size)
        }
    }

    /// ボックスのサイズの値を取得する
    pub const fn get(self) -> u64 {
        match self {
            BoxSize::U32(v) => v as u64,
            BoxSize::U64(v) => v,
        }
    }

    /// [`BoxHeader`] 内のサイズフィールドをエンコードする際に必要となるバイト数を返す
    pub const fn external_size(self) -> usize {
        match self {
            BoxSize::U32(_) => 4,
            BoxSize::U64(_) => 4 + 8,
        }
    }
}

/// [`BaseBox`] の種別
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoxType {
    /// 四文字で表現される通常のボックス種別
    Normal([u8; 4]),

    /// UUID 形式のボックス種別
    Uuid([u8; 16]),
}

impl BoxType {
    /// 種別を表すバイト列を返す
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BoxType::Normal(ty) => &ty[..],
            BoxType::Uuid(ty) => &ty[..],
        }
    }

    /// [`BoxHeader`] 内のボックス種別フィールドをエンコードする際に必要となるバイト数を返す
    pub const fn external_size(self) -> usize {
        if matches!(self, Self::Normal(_)) {
            4
        } else {
            4 + 16
        }
    }

    /// 自分が `expected` と同じ種別であるかをチェックする
    pub fn expect(self, expected: Self) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::invalid_data(format!(
                "Expected box type `{expected}`, but got `{self}`"
            )))
        }
    }
}

impl core::fmt::Debug for BoxType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BoxType::Normal(ty) => {
                if let Ok(ty) = core::str::from_utf8(ty) {
                    f.debug_tuple("BoxType").field(&ty).finish()
                } else {
                    f.debug_tuple("BoxType").field(ty).finish()
                }
            }
            BoxType::Uuid(ty) => f.debug_tuple("BoxType").field(ty).finish(),
        }
    }
}

impl core::fmt::Display for BoxType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let BoxType::Normal(ty) = self
            && let Ok(ty) = core::str::from_utf8(&ty[..])
        {
            return write!(f, "{ty}");
        }
        write!(f, "{:?}", self.as_bytes())
    }
}

/// MP4 ファイル内で使われる時刻形式（1904/1/1 からの経過秒数）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mp4FileTime(u64);

impl Mp4FileTime {
    /// 1904/1/1 からの経過秒数を引数にとって [`Mp4FileTime`] インスタンスを作成する
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// 1904/1/1 からの経過秒数を返す
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// UNIX EPOCH (1970-01-01 00:00:00 UTC) を起点とした経過時間を受け取って、対応する [`Mp4FileTime`] インスタンスを作成する
    pub const fn from_unix_time(unix_time: Duration) -> Self {
        let delta = 2082844800; // 1904/1/1 から 1970/1/1 までの経過秒数
        let unix_time_secs = unix_time.as_secs();
        Self::from_secs(unix_time_secs + delta)
    }
}

/// 固定小数点数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedPointNumber<I, F = I> {
    /// 整数部
    pub integer: I,

    /// 小数部
    pub fraction: F,
}

impl<I, F> FixedPointNumber<I, F> {
    /// 整数部と小数部を受け取って固定小数点数を返す
    pub const fn new(integer: I, fraction: F) -> Self {
        Self { integer, fraction }
    }
}

impl<I: Encode, F: Encode> Encode for FixedPointNumber<I, F> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += self.integer.encode(&mut buf[offset..])?;
        offset += self.fraction.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl<I: Decode, F: Decode> Decode for FixedPointNumber<I, F> {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let integer = I::decode_at(buf, &mut offset)?;
        let fraction = F::decode_at(buf, &mut offset)?;
        Ok((Self { integer, fraction }, offset))
    }
}

/// null 終端の UTF-8 文字列
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Utf8String(String);

impl Utf8String {
    /// 空文字列
    pub const EMPTY: Self = Utf8String(String::new());

    /// 終端の null を含まない文字列を受け取って [`Utf8String`] インスタンスを作成する
    ///
    /// 引数の文字列内に null 文字が含まれている場合には [`None`] が返される
    pub fn new(s: &str) -> Option<Self> {
        if s.as_bytes().contains(&0) {
            return None;
        }
        Some(Self(s.to_owned()))
    }

    /// このインスタンスが保持する、null 終端部分を含まない文字列を返す
    pub fn get(&self) -> &str {
        &self.0
    }

    /// このインスタンスを、null 終端部分を含むバイト列へと変換する
    pub fn into_null_terminated_bytes(self) -> Vec<u8> {
        let mut v = self.0.into_bytes();
        v.push(0);
        v
    }
}

impl Encode for Utf8String {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += self.0.as_bytes().encode(&mut buf[offset..])?;
        offset += 0u8.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for Utf8String {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let mut bytes = Vec::new();
        loop {
            let b = u8::decode_at(buf, &mut offset)?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        let s = String::from_utf8(bytes).map_err(|e| {
            Error::invalid_data(format!("Invalid UTF-8 string: {:?}", e.as_bytes()))
        })?;
        Ok((Self(s), offset))
    }
}

/// `A` か `B` のどちらかの値を保持する列挙型
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Either<A, B> {
    A(A),
    B(B),
}

impl<A: BaseBox, B: BaseBox> Either<A, B> {
    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            Self::A(x) => x,
            Self::B(x) => x,
        }
    }
}

impl<A: BaseBox, B: BaseBox> BaseBox for Either<A, B> {
    fn box_type(&self) -> BoxType {
        self.inner_box().box_type()
    }

    fn is_unknown_box(&self) -> bool {
        self.inner_box().is_unknown_box()
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        self.inner_box().children()
    }
}

impl<A: Encode, B: Encode> Encode for Either<A, B> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::A(x) => x.encode(buf),
            Self::B(x) => x.encode(buf),
        }
    }
}

/// 任意のビット数の非負の整数を表現するための型
///
/// - `T`: 数値の内部的な型。 最低限 `BITS` 分の数値を表現可能な型である必要がある。
/// - `BITS`: 数値のビット数
/// - `OFFSET`: 一つの `T` に複数の [`Uint`] 値がパックされる場合の、この数値のオフセット位置（ビット数）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uint<T, const BITS: u32, const OFFSET: u32 = 0>(T);

impl<T, const BITS: u32, const OFFSET: u32> Uint<T, BITS, OFFSET>
where
    T: Shr<u32, Output = T>
        + Shl<u32, Output = T>
        + BitAnd<Output = T>
        + Sub<Output = T>
        + From<u8>,
{
    /// 指定された数値を受け取ってインスタンスを作成する
    pub const fn new(v: T) -> Self {
        Self(v)
    }

    /// このインスタンスが表現する整数値を返す
    pub fn get(self) -> T {
        self.0
    }

    /// `T` が保持するビット列の `OFFSET` 位置から `BITS` 分のビット列に対応する整数値を返す
    pub fn from_bits(v: T) -> Self {
        Self((v >> OFFSET) & ((T::from(1) << BITS) - T::from(1)))
    }

    /// このインスタンスに対応する `T` 内のビット列を返す
    ///
    /// なお `OFFSET` が `0` の場合には、このメソッドは [`Uint::get()`] と等価である
    pub fn to_bits(self) -> T {
        self.0 << OFFSET
    }
}

impl<const BITS: u32, const OFFSET: u32> Uint<u8, BITS, OFFSET> {
    /// このフラグ（1 ビットの整数値）が立っているかどうかを返す
    pub fn as_bool(self) -> bool {
        self.0 != 0
    }
}
