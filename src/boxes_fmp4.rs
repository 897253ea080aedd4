//! Fragmented MP4 (fMP4) 関連のボックス定義
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use crate::{
    BaseBox, BoxHeader, BoxType, Decode, Encode, FullBox, FullBoxFlags, FullBoxHeader, Result,
    basic_types::as_box_object,
    boxes::{SampleFlags, UnknownBox, check_mandatory_box, container_has_next_child, with_box_type},
    codec::{decode_variable_uint, encode_variable_uint},
};

/// [ISO/IEC 14496-12] MovieFragmentBox class
///
/// ムービーフラグメントのコンテナボックス。
/// fMP4 のメディアセグメントはこのボックスと mdat ボックスで構成される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MoofBox {
    pub mfhd_box: MfhdBox,
    pub traf_boxes: Vec<TrafBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MoofBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"moof");
}

impl Encode for MoofBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.mfhd_box.encode(&mut buf[offset..])?;
        for b in &self.traf_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for MoofBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut mfhd_box = None;
            let mut traf_boxes = Vec::new();
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    MfhdBox::TYPE if mfhd_box.is_none() => {
                        mfhd_box = Some(MfhdBox::decode_at(payload, &mut offset)?);
                    }
                    TrafBox::TYPE => {
                        traf_boxes.push(TrafBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    mfhd_box: check_mandatory_box(mfhd_box, "mfhd", "moof")?,
                    traf_boxes,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for MoofBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.mfhd_box).map(as_box_object))
                .chain(self.traf_boxes.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] MovieFragmentHeaderBox class (親: [`MoofBox`])
///
/// フラグメントのシーケンス番号を格納する。
/// シーケンス番号は 1 から始まり、フラグメントごとに 1 ずつ増加する。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MfhdBox {
    pub sequence_number: u32,
}

impl MfhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mfhd");
}

impl Encode for MfhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;
        offset += self.sequence_number.encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for MfhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;

            let sequence_number = u32::decode_at(payload, &mut offset)?;

            Ok((
                Self { sequence_number },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for MfhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for MfhdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackFragmentBox class (親: [`MoofBox`])
///
/// トラックフラグメントのコンテナボックス。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrafBox {
    pub tfhd_box: TfhdBox,
    pub tfdt_box: Option<TfdtBox>,
    pub trun_boxes: Vec<TrunBox>,
    pub saio_box: Option<SaioBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl TrafBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"traf");
}

impl Encode for TrafBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.tfhd_box.encode(&mut buf[offset..])?;
        if let Some(b) = &self.tfdt_box {
            offset += b.encode(&mut buf[offset..])?;
        }
        for b in &self.trun_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        if let Some(b) = &self.saio_box {
            offset += b.encode(&mut buf[offset..])?;
        }
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TrafBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut tfhd_box = None;
            let mut tfdt_box = None;
            let mut trun_boxes = Vec::new();
            let mut saio_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    TfhdBox::TYPE if tfhd_box.is_none() => {
                        tfhd_box = Some(TfhdBox::decode_at(payload, &mut offset)?);
                    }
                    TfdtBox::TYPE if tfdt_box.is_none() => {
                        tfdt_box = Some(TfdtBox::decode_at(payload, &mut offset)?);
                    }
                    TrunBox::TYPE => {
                        trun_boxes.push(TrunBox::decode_at(payload, &mut offset)?);
                    }
                    SaioBox::TYPE if saio_box.is_none() => {
                        saio_box = Some(SaioBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    tfhd_box: check_mandatory_box(tfhd_box, "tfhd", "traf")?,
                    tfdt_box,
                    trun_boxes,
                    saio_box,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TrafBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.tfhd_box).map(as_box_object))
                .chain(self.tfdt_box.iter().map(as_box_object))
                .chain(self.trun_boxes.iter().map(as_box_object))
                .chain(self.saio_box.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] TrackFragmentHeaderBox class (親: [`TrafBox`])
///
/// トラックフラグメントのヘッダー情報を格納する。
/// フラグによって存在するフィールドが異なる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TfhdBox {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<SampleFlags>,
    pub duration_is_empty: bool,
    pub default_base_is_moof: bool,
}

impl TfhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tfhd");

    /// base_data_offset が存在することを示すフラグ
    pub const FLAG_BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;

    /// sample_description_index が存在することを示すフラグ
    pub const FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;

    /// default_sample_duration が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;

    /// default_sample_size が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x000010;

    /// default_sample_flags が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;

    /// 継続時間が空であることを示すフラグ
    pub const FLAG_DURATION_IS_EMPTY: u32 = 0x010000;

    /// デフォルトの base_data_offset が moof の先頭であることを示すフラグ
    pub const FLAG_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;
}

impl Encode for TfhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;
        offset += self.track_id.encode(&mut buf[offset..])?;

        if let Some(v) = self.base_data_offset {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.sample_description_index {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.default_sample_duration {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.default_sample_size {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.default_sample_flags {
            offset += v.encode(&mut buf[offset..])?;
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TfhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let flags = full_header.flags.get();

            let track_id = u32::decode_at(payload, &mut offset)?;

            let base_data_offset = if flags & Self::FLAG_BASE_DATA_OFFSET_PRESENT != 0 {
                Some(u64::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let sample_description_index =
                if flags & Self::FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
                    Some(u32::decode_at(payload, &mut offset)?)
                } else {
                    None
                };

            let default_sample_duration = if flags & Self::FLAG_DEFAULT_SAMPLE_DURATION_PRESENT != 0
            {
                Some(u32::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let default_sample_size = if flags & Self::FLAG_DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
                Some(u32::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let default_sample_flags = if flags & Self::FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
                Some(SampleFlags::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let duration_is_empty = flags & Self::FLAG_DURATION_IS_EMPTY != 0;
            let default_base_is_moof = flags & Self::FLAG_DEFAULT_BASE_IS_MOOF != 0;

            Ok((
                Self {
                    track_id,
                    base_data_offset,
                    sample_description_index,
                    default_sample_duration,
                    default_sample_size,
                    default_sample_flags,
                    duration_is_empty,
                    default_base_is_moof,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TfhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for TfhdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        let mut flags = 0u32;
        if self.base_data_offset.is_some() {
            flags |= Self::FLAG_BASE_DATA_OFFSET_PRESENT;
        }
        if self.sample_description_index.is_some() {
            flags |= Self::FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT;
        }
        if self.default_sample_duration.is_some() {
            flags |= Self::FLAG_DEFAULT_SAMPLE_DURATION_PRESENT;
        }
        if self.default_sample_size.is_some() {
            flags |= Self::FLAG_DEFAULT_SAMPLE_SIZE_PRESENT;
        }
        if self.default_sample_flags.is_some() {
            flags |= Self::FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT;
        }
        if self.duration_is_empty {
            flags |= Self::FLAG_DURATION_IS_EMPTY;
        }
        if self.default_base_is_moof {
            flags |= Self::FLAG_DEFAULT_BASE_IS_MOOF;
        }
        FullBoxFlags::new(flags)
    }
}

/// [ISO/IEC 14496-12] TrackFragmentBaseMediaDecodeTimeBox class (親: [`TrafBox`])
///
/// トラックフラグメントのベースデコード時間を格納する。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TfdtBox {
    /// FullBox バージョン (0 または 1)
    ///
    /// version=1 の場合は base_media_decode_time が 64-bit、
    /// version=0 の場合は 32-bit でエンコードされる。
    /// ラウンドトリップ時に元のバージョンを保持するために使用される。
    pub version: u8,
    pub base_media_decode_time: u64,
}

impl TfdtBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tfdt");
}

impl Encode for TfdtBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;
        if self.full_box_version() == 1 {
            offset += self.base_media_decode_time.encode(&mut buf[offset..])?;
        } else {
            offset += (self.base_media_decode_time as u32).encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TfdtBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;

            let base_media_decode_time = if full_header.version == 1 {
                u64::decode_at(payload, &mut offset)?
            } else {
                u32::decode_at(payload, &mut offset)? as u64
            };

            Ok((
                Self {
                    version: full_header.version,
                    base_media_decode_time,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TfdtBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for TfdtBox {
    fn full_box_version(&self) -> u8 {
        // 値が 32-bit に収まらない場合は version=1 が必須
        if self.base_media_decode_time > u32::MAX as u64 {
            1
        } else {
            // それ以外はデコード時に保存されたバージョンを使用
            self.version
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackRunBox class (親: [`TrafBox`])
///
/// サンプルのリストを格納する。フラグによって存在するフィールドが異なる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrunBox {
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<SampleFlags>,
    pub samples: Vec<TrunSample>,
}

impl TrunBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"trun");

    /// data_offset が存在することを示すフラグ
    pub const FLAG_DATA_OFFSET_PRESENT: u32 = 0x000001;

    /// first_sample_flags が存在することを示すフラグ
    pub const FLAG_FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;

    /// sample_duration が存在することを示すフラグ
    pub const FLAG_SAMPLE_DURATION_PRESENT: u32 = 0x000100;

    /// sample_size が存在することを示すフラグ
    pub const FLAG_SAMPLE_SIZE_PRESENT: u32 = 0x000200;

    /// sample_flags が存在することを示すフラグ
    pub const FLAG_SAMPLE_FLAGS_PRESENT: u32 = 0x000400;

    /// sample_composition_time_offset が存在することを示すフラグ
    pub const FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT: u32 = 0x000800;

    fn compute_flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.data_offset.is_some() {
            flags |= Self::FLAG_DATA_OFFSET_PRESENT;
        }
        if self.first_sample_flags.is_some() {
            flags |= Self::FLAG_FIRST_SAMPLE_FLAGS_PRESENT;
        }
        if let Some(sample) = self.samples.first() {
            if sample.duration.is_some() {
                flags |= Self::FLAG_SAMPLE_DURATION_PRESENT;
            }
            if sample.size.is_some() {
                flags |= Self::FLAG_SAMPLE_SIZE_PRESENT;
            }
            if sample.flags.is_some() {
                flags |= Self::FLAG_SAMPLE_FLAGS_PRESENT;
            }
            if sample.composition_time_offset.is_some() {
                flags |= Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT;
            }
        }
        flags
    }

    fn uses_version_1(&self) -> bool {
        self.samples.iter().any(|s| {
            if let Some(offset) = s.composition_time_offset {
                offset < 0
            } else {
                false
            }
        })
    }
}

impl Encode for TrunBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;

        let flags = self.compute_flags();

        // sample_count
        offset += (self.samples.len() as u32).encode(&mut buf[offset..])?;

        if let Some(v) = self.data_offset {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.first_sample_flags {
            offset += v.encode(&mut buf[offset..])?;
        }

        let version = self.full_box_version();

        for sample in &self.samples {
            if flags & Self::FLAG_SAMPLE_DURATION_PRESENT != 0 {
                offset += sample.duration.unwrap_or(0).encode(&mut buf[offset..])?;
            }
            if flags & Self::FLAG_SAMPLE_SIZE_PRESENT != 0 {
                offset += sample.size.unwrap_or(0).encode(&mut buf[offset..])?;
            }
            if flags & Self::FLAG_SAMPLE_FLAGS_PRESENT != 0 {
                offset += sample
                    .flags
                    .unwrap_or(SampleFlags::empty())
                    .encode(&mut buf[offset..])?;
            }
            if flags & Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT != 0 {
                if version == 1 {
                    offset += sample
                        .composition_time_offset
                        .unwrap_or(0)
                        .encode(&mut buf[offset..])?;
                } else {
                    offset += (sample.composition_time_offset.unwrap_or(0) as u32)
                        .encode(&mut buf[offset..])?;
                }
            }
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TrunBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let flags = full_header.flags.get();
            let version = full_header.version;

            let sample_count = u32::decode_at(payload, &mut offset)?;

            let data_offset = if flags & Self::FLAG_DATA_OFFSET_PRESENT != 0 {
                Some(i32::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let first_sample_flags = if flags & Self::FLAG_FIRST_SAMPLE_FLAGS_PRESENT != 0 {
                Some(SampleFlags::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let mut samples = Vec::new();
            for _ in 0..sample_count {
                let duration = if flags & Self::FLAG_SAMPLE_DURATION_PRESENT != 0 {
                    Some(u32::decode_at(payload, &mut offset)?)
                } else {
                    None
                };

                let size = if flags & Self::FLAG_SAMPLE_SIZE_PRESENT != 0 {
                    Some(u32::decode_at(payload, &mut offset)?)
                } else {
                    None
                };

                let sample_flags = if flags & Self::FLAG_SAMPLE_FLAGS_PRESENT != 0 {
                    Some(SampleFlags::decode_at(payload, &mut offset)?)
                } else {
                    None
                };

                let composition_time_offset =
                    if flags & Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT != 0 {
                        if version == 1 {
                            Some(i32::decode_at(payload, &mut offset)?)
                        } else {
                            Some(u32::decode_at(payload, &mut offset)? as i32)
                        }
                    } else {
                        None
                    };

                samples.push(TrunSample {
                    duration,
                    size,
                    flags: sample_flags,
                    composition_time_offset,
                });
            }

            Ok((
                Self {
                    data_offset,
                    first_sample_flags,
                    samples,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TrunBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for TrunBox {
    fn full_box_version(&self) -> u8 {
        if self.uses_version_1() { 1 } else { 0 }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(self.compute_flags())
    }
}

/// [`TrunBox`] のサンプル情報
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrunSample {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<SampleFlags>,
    pub composition_time_offset: Option<i32>,
}

/// [ISO/IEC 14496-12] SampleAuxiliaryInformationOffsetsBox class (親: [`TrafBox`])
///
/// 補助情報（暗号化メタデータなど）の格納位置を示すボックス。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SaioBox {
    /// FullBox バージョン (0 または 1)
    ///
    /// version=1 の場合は各オフセットが 64-bit、
    /// version=0 の場合は 32-bit でエンコードされる。
    pub version: u8,
    pub aux_info: Option<(u32, u32)>,
    pub offsets: Vec<u64>,
}

impl SaioBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"saio");

    /// aux_info_type / aux_info_type_parameter が存在することを示すフラグ
    pub const FLAG_AUX_INFO_TYPE_PRESENT: u32 = 0x000001;
}

impl Encode for SaioBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;

        if let Some((aux_info_type, aux_info_type_parameter)) = self.aux_info {
            offset += aux_info_type.encode(&mut buf[offset..])?;
            offset += aux_info_type_parameter.encode(&mut buf[offset..])?;
        }

        offset += (self.offsets.len() as u32).encode(&mut buf[offset..])?;
        let version = self.full_box_version();
        for v in &self.offsets {
            if version == 1 {
                offset += v.encode(&mut buf[offset..])?;
            } else {
                offset += (*v as u32).encode(&mut buf[offset..])?;
            }
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for SaioBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;

            let aux_info = if full_header.flags.get() & Self::FLAG_AUX_INFO_TYPE_PRESENT != 0 {
                let aux_info_type = u32::decode_at(payload, &mut offset)?;
                let aux_info_type_parameter = u32::decode_at(payload, &mut offset)?;
                Some((aux_info_type, aux_info_type_parameter))
            } else {
                None
            };

            let entry_count = u32::decode_at(payload, &mut offset)?;
            let mut offsets = Vec::new();
            for _ in 0..entry_count {
                let v = if full_header.version == 1 {
                    u64::decode_at(payload, &mut offset)?
                } else {
                    u32::decode_at(payload, &mut offset)? as u64
                };
                offsets.push(v);
            }

            Ok((
                Self {
                    version: full_header.version,
                    aux_info,
                    offsets,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for SaioBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for SaioBox {
    fn full_box_version(&self) -> u8 {
        if self.offsets.iter().any(|v| *v > u32::MAX as u64) {
            1
        } else {
            self.version
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        let mut flags = 0u32;
        if self.aux_info.is_some() {
            flags |= Self::FLAG_AUX_INFO_TYPE_PRESENT;
        }
        FullBoxFlags::new(flags)
    }
}

/// [ISO/IEC 14496-12] MovieFragmentRandomAccessBox class
///
/// ムービーフラグメントのランダムアクセス情報を格納するボックス。
/// ファイルの末尾に配置される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MfraBox {
    pub tfra_boxes: Vec<TfraBox>,
    pub mfro_box: MfroBox,
}

impl MfraBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mfra");
}

impl Encode for MfraBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        for b in &self.tfra_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        offset += self.mfro_box.encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for MfraBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut tfra_boxes = Vec::new();
            let mut mfro_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    TfraBox::TYPE => {
                        tfra_boxes.push(TfraBox::decode_at(payload, &mut offset)?);
                    }
                    MfroBox::TYPE if mfro_box.is_none() => {
                        mfro_box = Some(MfroBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    tfra_boxes,
                    mfro_box: check_mandatory_box(mfro_box, "mfro", "mfra")?,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for MfraBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            self.tfra_boxes
                .iter()
                .map(as_box_object)
                .chain(core::iter::once(as_box_object(&self.mfro_box))),
        )
    }
}

/// [ISO/IEC 14496-12] TrackFragmentRandomAccessBox class (親: [`MfraBox`])
///
/// トラックフラグメントのランダムアクセス情報を格納するボックス。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TfraBox {
    /// FullBox バージョン (0 または 1)
    ///
    /// version=1 の場合は time と moof_offset が 64-bit、
    /// version=0 の場合は 32-bit でエンコードされる。
    /// ラウンドトリップ時に元のバージョンを保持するために使用される。
    pub version: u8,
    pub track_id: u32,
    /// traf_number のバイト数 - 1 (0-3)
    pub length_size_of_traf_num: u8,
    /// trun_number のバイト数 - 1 (0-3)
    pub length_size_of_trun_num: u8,
    /// sample_number のバイト数 - 1 (0-3)
    pub length_size_of_sample_num: u8,
    pub entries: Vec<TfraEntry>,
}

impl TfraBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tfra");
}

impl Encode for TfraBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;

        offset += self.track_id.encode(&mut buf[offset..])?;

        // reserved (26 bits) + length_size_of_traf_num (2 bits)
        //   + length_size_of_trun_num (2 bits) + length_size_of_sample_num (2 bits)
        let lengths: u32 = ((self.length_size_of_traf_num as u32 & 0x3) << 4)
            | ((self.length_size_of_trun_num as u32 & 0x3) << 2)
            | (self.length_size_of_sample_num as u32 & 0x3);
        offset += lengths.encode(&mut buf[offset..])?;

        let number_of_entry = self.entries.len() as u32;
        offset += number_of_entry.encode(&mut buf[offset..])?;

        let version = self.full_box_version();
        for entry in &self.entries {
            if version == 1 {
                offset += entry.time.encode(&mut buf[offset..])?;
                offset += entry.moof_offset.encode(&mut buf[offset..])?;
            } else {
                offset += (entry.time as u32).encode(&mut buf[offset..])?;
                offset += (entry.moof_offset as u32).encode(&mut buf[offset..])?;
            }

            // traf_number, trun_number, sample_number は可変長
            offset += encode_variable_uint(
                entry.traf_number as u64,
                self.length_size_of_traf_num as usize + 1,
                &mut buf[offset..],
            )?;
            offset += encode_variable_uint(
                entry.trun_number as u64,
                self.length_size_of_trun_num as usize + 1,
                &mut buf[offset..],
            )?;
            offset += encode_variable_uint(
                entry.sample_number as u64,
                self.length_size_of_sample_num as usize + 1,
                &mut buf[offset..],
            )?;
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TfraBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_box_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let version = full_box_header.version;

            let track_id = u32::decode_at(payload, &mut offset)?;
            let lengths = u32::decode_at(payload, &mut offset)?;
            let length_size_of_traf_num = ((lengths >> 4) & 0x3) as u8;
            let length_size_of_trun_num = ((lengths >> 2) & 0x3) as u8;
            let length_size_of_sample_num = (lengths & 0x3) as u8;

            let number_of_entry = u32::decode_at(payload, &mut offset)?;

            let mut entries = Vec::new();
            for _ in 0..number_of_entry {
                let (time, moof_offset) = if version == 1 {
                    let time = u64::decode_at(payload, &mut offset)?;
                    let moof_offset = u64::decode_at(payload, &mut offset)?;
                    (time, moof_offset)
                } else {
                    let time = u32::decode_at(payload, &mut offset)? as u64;
                    let moof_offset = u32::decode_at(payload, &mut offset)? as u64;
                    (time, moof_offset)
                };

                let traf_number =
                    decode_variable_uint(payload, &mut offset, length_size_of_traf_num as usize + 1)?
                        as u32;
                let trun_number =
                    decode_variable_uint(payload, &mut offset, length_size_of_trun_num as usize + 1)?
                        as u32;
                let sample_number = decode_variable_uint(
                    payload,
                    &mut offset,
                    length_size_of_sample_num as usize + 1,
                )? as u32;

                entries.push(TfraEntry {
                    time,
                    moof_offset,
                    traf_number,
                    trun_number,
                    sample_number,
                });
            }

            Ok((
                Self {
                    version,
                    track_id,
                    length_size_of_traf_num,
                    length_size_of_trun_num,
                    length_size_of_sample_num,
                    entries,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TfraBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for TfraBox {
    fn full_box_version(&self) -> u8 {
        // 値が 32-bit に収まらない場合は version=1 が必須
        let needs_64bit = self
            .entries
            .iter()
            .any(|e| e.time > u32::MAX as u64 || e.moof_offset > u32::MAX as u64);
        if needs_64bit {
            1
        } else {
            // それ以外はデコード時に保存されたバージョンを使用
            self.version
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`TfraBox`] のエントリ
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TfraEntry {
    pub time: u64,
    pub moof_offset: u64,
    pub traf_number: u32,
    pub trun_number: u32,
    pub sample_number: u32,
}

/// [ISO/IEC 14496-12] MovieFragmentRandomAccessOffsetBox class (親: [`MfraBox`])
///
/// mfra ボックス全体のサイズを格納するボックス。
/// ファイル末尾から逆方向にシークするために使用される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MfroBox {
    /// mfra ボックスのサイズ
    pub parent_size: u32,
}

impl MfroBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mfro");
}

impl Encode for MfroBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;
        offset += self.parent_size.encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for MfroBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_box_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let parent_size = u32::decode_at(payload, &mut offset)?;

            Ok((Self { parent_size }, header.external_size() + payload.len()))
        })
    }
}

impl BaseBox for MfroBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for MfroBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}
