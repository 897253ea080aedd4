//! MP4 のボックス群をまとめたモジュール

use crate::{BaseBox, BoxHeader, BoxSize, BoxType, Decode, Encode, Error, Result, Uint};

pub use crate::boxes_fmp4::{
    MfhdBox, MfraBox, MfroBox, MoofBox, SaioBox, TfdtBox, TfhdBox, TfraBox, TfraEntry, TrafBox,
    TrunBox, TrunSample,
};
pub use crate::boxes_moov_tree::{
    Co64Box, CttsBox, CttsEntry, DinfBox, DrefBox, EdtsBox, ElstBox, ElstEntry, EsdsBox, HdlrBox,
    MdhdBox, MdiaBox, MehdBox, MetaBox, MinfBox, MoovBox, MvexBox, MvhdBox, NmhdBox, SdtpBox,
    SdtpSampleDependency, SmhdBox, StblBox, StcoBox, StscBox, StscEntry, StsdBox, StssBox,
    StszBox, SttsBox, SttsEntry, TkhdBox, TrakBox, TrexBox, UdtaBox, UrlBox, VmhdBox,
};
pub use crate::boxes_sample_entry::{
    Avc1Box, AvccBox, AudioSampleEntryFields, DdtsBox, Dec3Box, Dec3IndependentSubstream, DtscBox,
    DtseBox, DtshBox, Ec3Box, EncaBox, EncvBox, FrmaBox, FtabBox, FtabFontEntry, Mp4aBox,
    SampleEntry, SchiBox, SinfBox, Tx3gBox, Tx3gStyleRecord, VisualSampleEntryFields,
};

/// エラーに `box_type` の情報を付与するためのヘルパー関数
pub(crate) fn with_box_type<T, F>(box_type: BoxType, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    f().map_err(|e| e.with_box_type(box_type))
}

/// コンテナーボックスの子ボックス群をデコードするループの継続判定を行うヘルパー関数
///
/// ボックスヘッダーにも満たない端数バイトがコンテナーの末尾に残っている場合には、
/// 警告ログを出した上でその部分を無視してパース済みの子ボックス群を返せるようにする
pub(crate) fn container_has_next_child(box_type: BoxType, payload: &[u8], offset: usize) -> bool {
    let remaining = payload.len() - offset;
    if remaining == 0 {
        false
    } else if remaining < BoxHeader::MIN_SIZE {
        tracing::warn!("ignoring {remaining} trailing bytes in '{box_type}' box that are too short to hold a box header");
        false
    } else {
        true
    }
}

/// 必須の子ボックスが存在することをチェックするためのヘルパー関数
pub(crate) fn check_mandatory_box<T>(
    b: Option<T>,
    child_box_name: &str,
    parent_box_name: &str,
) -> Result<T> {
    b.ok_or_else(|| {
        Error::invalid_data(format!(
            "Missing mandatory '{child_box_name}' box in '{parent_box_name}' box"
        ))
    })
}

/// [ISO/IEC 14496-12] ブランドを表す四文字の識別子
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Brand([u8; 4]);

impl Brand {
    /// `isom` ブランド
    pub const ISOM: Self = Self::new(*b"isom");

    /// `iso2` ブランド
    pub const ISO2: Self = Self::new(*b"iso2");

    /// `mp41` ブランド
    pub const MP41: Self = Self::new(*b"mp41");

    /// `avc1` ブランド
    pub const AVC1: Self = Self::new(*b"avc1");

    /// バイト列を受け取って [`Brand`] インスタンスを作成する
    pub const fn new(brand: [u8; 4]) -> Self {
        Self(brand)
    }

    /// このブランドを表すバイト列を返す
    pub const fn get(self) -> [u8; 4] {
        self.0
    }
}

impl core::fmt::Debug for Brand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Ok(s) = core::str::from_utf8(&self.0) {
            f.debug_tuple("Brand").field(&s).finish()
        } else {
            f.debug_tuple("Brand").field(&self.0).finish()
        }
    }
}

impl Encode for Brand {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Decode for Brand {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (bytes, size) = <[u8; 4]>::decode(buf)?;
        Ok((Self(bytes), size))
    }
}

/// [ISO/IEC 14496-12] FileTypeBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl FtypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ftyp");
}

impl Encode for FtypBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.major_brand.encode(&mut buf[offset..])?;
        offset += self.minor_version.encode(&mut buf[offset..])?;
        for brand in &self.compatible_brands {
            offset += brand.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for FtypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let major_brand = Brand::decode_at(payload, &mut offset)?;
            let minor_version = u32::decode_at(payload, &mut offset)?;
            let mut compatible_brands = Vec::new();
            while offset < payload.len() {
                compatible_brands.push(Brand::decode_at(payload, &mut offset)?);
            }

            Ok((
                Self {
                    major_brand,
                    minor_version,
                    compatible_brands,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for FtypBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// MP4 ファイルのトップレベルに位置するボックス
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum RootBox {
    Free(FreeBox),
    Mdat(MdatBox),
    Moov(MoovBox),
    Moof(MoofBox),
    Mfra(MfraBox),
    Unknown(UnknownBox),
}

impl RootBox {
    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            RootBox::Free(b) => b,
            RootBox::Mdat(b) => b,
            RootBox::Moov(b) => b,
            RootBox::Moof(b) => b,
            RootBox::Mfra(b) => b,
            RootBox::Unknown(b) => b,
        }
    }
}

impl Encode for RootBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            RootBox::Free(b) => b.encode(buf),
            RootBox::Mdat(b) => b.encode(buf),
            RootBox::Moov(b) => b.encode(buf),
            RootBox::Moof(b) => b.encode(buf),
            RootBox::Mfra(b) => b.encode(buf),
            RootBox::Unknown(b) => b.encode(buf),
        }
    }
}

impl Decode for RootBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        match header.box_type {
            FreeBox::TYPE => Decode::decode(buf).map(|(b, size)| (RootBox::Free(b), size)),
            MdatBox::TYPE => Decode::decode(buf).map(|(b, size)| (RootBox::Mdat(b), size)),
            MoovBox::TYPE => Decode::decode(buf).map(|(b, size)| (RootBox::Moov(b), size)),
            MoofBox::TYPE => Decode::decode(buf).map(|(b, size)| (RootBox::Moof(b), size)),
            MfraBox::TYPE => Decode::decode(buf).map(|(b, size)| (RootBox::Mfra(b), size)),
            _ => Decode::decode(buf).map(|(b, size)| (RootBox::Unknown(b), size)),
        }
    }
}

impl BaseBox for RootBox {
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

/// 未知のボックスをデコードされないまま保持するための構造体
///
/// エンコード時にはデコード時のバイト列がそのまま書き出される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct UnknownBox {
    pub box_type: BoxType,
    pub box_size: BoxSize,
    pub payload: Vec<u8>,
}

impl Encode for UnknownBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new(self.box_type, self.box_size);
        let mut offset = header.encode(buf)?;
        offset += self.payload.as_slice().encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for UnknownBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        Ok((
            Self {
                box_type: header.box_type,
                box_size: header.box_size,
                payload: payload.to_vec(),
            },
            header.external_size() + payload.len(),
        ))
    }
}

impl BaseBox for UnknownBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn is_unknown_box(&self) -> bool {
        true
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-12] FreeSpaceBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FreeBox {
    pub payload: Vec<u8>,
}

impl FreeBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"free");
}

impl Encode for FreeBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.payload.as_slice().encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for FreeBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;
            Ok((
                Self {
                    payload: payload.to_vec(),
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for FreeBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-12] MediaDataBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MdatBox {
    /// ペイロードが可変長（ファイル末尾まで続く）かどうか
    pub is_variable_size: bool,

    /// ペイロード（メディアデータ）
    pub payload: Vec<u8>,
}

impl MdatBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdat");
}

impl Encode for MdatBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let box_size = if self.is_variable_size {
            BoxSize::VARIABLE_SIZE
        } else {
            BoxSize::with_payload_size(Self::TYPE, self.payload.len() as u64)
        };
        let header = BoxHeader::new(Self::TYPE, box_size);
        let mut offset = header.encode(buf)?;
        offset += self.payload.as_slice().encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for MdatBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;
            Ok((
                Self {
                    is_variable_size: header.box_size.get() == 0,
                    payload: payload.to_vec(),
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for MdatBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-12] フラグメント内のサンプルの属性を表すビットフィールド
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleFlags(u32);

impl SampleFlags {
    /// 全てのビットが 0 の [`SampleFlags`] インスタンスを作成する
    pub const fn empty() -> Self {
        Self(0)
    }

    /// [`u32`] を受け取って、対応する [`SampleFlags`] インスタンスを作成する
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// 各フィールドの値を受け取って、対応する [`SampleFlags`] インスタンスを作成する
    pub fn from_fields(
        reserved: u8,
        sample_depends_on: u8,
        sample_is_depended_on: u8,
        sample_has_redundancy: u8,
        sample_padding_value: u8,
        sample_is_difference_sample: bool,
        sample_degradation_priority: u16,
    ) -> Self {
        let flags = (Uint::<u32, 6, 26>::new(reserved as u32).to_bits())
            | (Uint::<u32, 2, 24>::new(sample_depends_on as u32).to_bits())
            | (Uint::<u32, 2, 22>::new(sample_is_depended_on as u32).to_bits())
            | (Uint::<u32, 2, 20>::new(sample_has_redundancy as u32).to_bits())
            | (Uint::<u32, 3, 17>::new(sample_padding_value as u32).to_bits())
            | (Uint::<u32, 1, 16>::new(sample_is_difference_sample as u32).to_bits())
            | sample_degradation_priority as u32;
        Self(flags)
    }

    /// このビットフィールドに対応する [`u32`] 値を返す
    pub const fn get(self) -> u32 {
        self.0
    }

    /// `reserved` フィールドの値を返す
    pub fn reserved(self) -> u8 {
        Uint::<u32, 6, 26>::from_bits(self.0).get() as u8
    }

    /// `sample_depends_on` フィールドの値を返す
    pub fn sample_depends_on(self) -> u8 {
        Uint::<u32, 2, 24>::from_bits(self.0).get() as u8
    }

    /// `sample_is_depended_on` フィールドの値を返す
    pub fn sample_is_depended_on(self) -> u8 {
        Uint::<u32, 2, 22>::from_bits(self.0).get() as u8
    }

    /// `sample_has_redundancy` フィールドの値を返す
    pub fn sample_has_redundancy(self) -> u8 {
        Uint::<u32, 2, 20>::from_bits(self.0).get() as u8
    }

    /// `sample_padding_value` フィールドの値を返す
    pub fn sample_padding_value(self) -> u8 {
        Uint::<u32, 3, 17>::from_bits(self.0).get() as u8
    }

    /// `sample_is_difference_sample` フィールドの値を返す
    ///
    /// このフラグが立っていないサンプルは同期サンプルとして扱われる
    pub fn sample_is_difference_sample(self) -> bool {
        Uint::<u32, 1, 16>::from_bits(self.0).get() == 1
    }

    /// `sample_degradation_priority` フィールドの値を返す
    pub fn sample_degradation_priority(self) -> u16 {
        self.0 as u16
    }
}

impl Encode for SampleFlags {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Decode for SampleFlags {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (flags, size) = u32::decode(buf)?;
        Ok((Self(flags), size))
    }
}
