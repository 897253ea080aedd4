//! サンプルエントリー系のボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use std::num::NonZeroU16;

use crate::{
    BaseBox, BoxHeader, BoxType, Decode, Encode, Error, FixedPointNumber, Result, Uint,
    basic_types::as_box_object,
    boxes::{EsdsBox, UnknownBox, check_mandatory_box, container_has_next_child, with_box_type},
    codec::{BitReader, BitWriter},
};

/// [`StsdBox`](crate::boxes::StsdBox) に含まれるエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SampleEntry {
    Avc1(Avc1Box),
    Mp4a(Mp4aBox),
    Ec3(Ec3Box),
    Dtsc(DtscBox),
    Dtsh(DtshBox),
    Dtse(DtseBox),
    Tx3g(Tx3gBox),
    Enca(EncaBox),
    Encv(EncvBox),
    Unknown(UnknownBox),
}

impl SampleEntry {
    /// チャンネル数を取得する
    ///
    /// 音声の場合はチャンネル数、映像の場合は None を返す
    pub fn audio_channel_count(&self) -> Option<u8> {
        match self {
            Self::Mp4a(b) => Some(b.audio.channelcount as u8),
            Self::Ec3(b) => Some(b.audio.channelcount as u8),
            Self::Dtsc(b) => Some(b.audio.channelcount as u8),
            Self::Dtsh(b) => Some(b.audio.channelcount as u8),
            Self::Dtse(b) => Some(b.audio.channelcount as u8),
            Self::Enca(b) => Some(b.audio.channelcount as u8),
            _ => None,
        }
    }

    /// サンプリングレートを取得する
    ///
    /// 音声の場合はサンプリングレート、映像の場合は None を返す
    ///
    /// # NOTE
    ///
    /// このメソッドはサンプリングレートの整数部分のみを返し、小数部分は切り捨てられる。
    /// ただし通常は、MP4 ファイルでは音声のサンプリングレートは常に整数値（例: 44100 Hz, 48000 Hz）であり、
    /// 小数部分が 0 以外の値を持つことはないため、問題ないと想定している。
    pub fn audio_sample_rate(&self) -> Option<u16> {
        match self {
            Self::Mp4a(b) => Some(b.audio.samplerate.integer),
            Self::Ec3(b) => Some(b.audio.samplerate.integer),
            Self::Dtsc(b) => Some(b.audio.samplerate.integer),
            Self::Dtsh(b) => Some(b.audio.samplerate.integer),
            Self::Dtse(b) => Some(b.audio.samplerate.integer),
            Self::Enca(b) => Some(b.audio.samplerate.integer),
            _ => None,
        }
    }

    /// サンプルサイズ（ビット深度）を取得する
    ///
    /// 音声の場合はサンプルサイズ、映像の場合は None を返す
    pub fn audio_sample_size(&self) -> Option<u16> {
        match self {
            Self::Mp4a(b) => Some(b.audio.samplesize),
            Self::Ec3(b) => Some(b.audio.samplesize),
            Self::Dtsc(b) => Some(b.audio.samplesize),
            Self::Dtsh(b) => Some(b.audio.samplesize),
            Self::Dtse(b) => Some(b.audio.samplesize),
            Self::Enca(b) => Some(b.audio.samplesize),
            _ => None,
        }
    }

    /// 解像度を取得する
    ///
    /// 映像の場合は (幅, 高さ)、音声の場合は None を返す
    pub fn video_resolution(&self) -> Option<(u16, u16)> {
        match self {
            Self::Avc1(b) => Some((b.visual.width, b.visual.height)),
            Self::Encv(b) => Some((b.visual.width, b.visual.height)),
            _ => None,
        }
    }

    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            Self::Avc1(b) => b,
            Self::Mp4a(b) => b,
            Self::Ec3(b) => b,
            Self::Dtsc(b) => b,
            Self::Dtsh(b) => b,
            Self::Dtse(b) => b,
            Self::Tx3g(b) => b,
            Self::Enca(b) => b,
            Self::Encv(b) => b,
            Self::Unknown(b) => b,
        }
    }
}

impl Encode for SampleEntry {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Avc1(b) => b.encode(buf),
            Self::Mp4a(b) => b.encode(buf),
            Self::Ec3(b) => b.encode(buf),
            Self::Dtsc(b) => b.encode(buf),
            Self::Dtsh(b) => b.encode(buf),
            Self::Dtse(b) => b.encode(buf),
            Self::Tx3g(b) => b.encode(buf),
            Self::Enca(b) => b.encode(buf),
            Self::Encv(b) => b.encode(buf),
            Self::Unknown(b) => b.encode(buf),
        }
    }
}

impl Decode for SampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        match header.box_type {
            Avc1Box::TYPE => Avc1Box::decode(buf).map(|(b, n)| (Self::Avc1(b), n)),
            Mp4aBox::TYPE => Mp4aBox::decode(buf).map(|(b, n)| (Self::Mp4a(b), n)),
            Ec3Box::TYPE => Ec3Box::decode(buf).map(|(b, n)| (Self::Ec3(b), n)),
            DtscBox::TYPE => DtscBox::decode(buf).map(|(b, n)| (Self::Dtsc(b), n)),
            DtshBox::TYPE => DtshBox::decode(buf).map(|(b, n)| (Self::Dtsh(b), n)),
            DtseBox::TYPE => DtseBox::decode(buf).map(|(b, n)| (Self::Dtse(b), n)),
            Tx3gBox::TYPE => Tx3gBox::decode(buf).map(|(b, n)| (Self::Tx3g(b), n)),
            EncaBox::TYPE => EncaBox::decode(buf).map(|(b, n)| (Self::Enca(b), n)),
            EncvBox::TYPE => EncvBox::decode(buf).map(|(b, n)| (Self::Encv(b), n)),
            _ => UnknownBox::decode(buf).map(|(b, n)| (Self::Unknown(b), n)),
        }
    }
}

impl BaseBox for SampleEntry {
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

// ゼロ固定の予約領域に値が書き込まれていても致命的ではないので、警告だけ出して続行する
fn check_reserved_bits(box_name: &str, value: u32) {
    if value != 0 {
        tracing::warn!("reserved bits in '{box_name}' box are not zero: {value:#b}");
    }
}

fn check_reserved_bytes(name: &str, bytes: &[u8]) {
    if bytes.iter().any(|&b| b != 0) {
        tracing::warn!("reserved field in {name} is not zero: {bytes:?}");
    }
}

/// 映像系の [`SampleEntry`] に共通のフィールドをまとめた構造体
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VisualSampleEntryFields {
    pub data_reference_index: NonZeroU16,
    pub width: u16,
    pub height: u16,
    pub horizresolution: FixedPointNumber<u16, u16>,
    pub vertresolution: FixedPointNumber<u16, u16>,
    pub frame_count: u16,
    pub compressorname: [u8; 32],
    pub depth: u16,
}

impl VisualSampleEntryFields {
    /// [`VisualSampleEntryFields::data_reference_index`] のデフォルト値
    pub const DEFAULT_DATA_REFERENCE_INDEX: NonZeroU16 = NonZeroU16::MIN;

    /// [`VisualSampleEntryFields::horizresolution`] のデフォルト値 (72 dpi)
    pub const DEFAULT_HORIZRESOLUTION: FixedPointNumber<u16, u16> = FixedPointNumber::new(0x48, 0);

    /// [`VisualSampleEntryFields::vertresolution`] のデフォルト値 (72 dpi)
    pub const DEFAULT_VERTRESOLUTION: FixedPointNumber<u16, u16> = FixedPointNumber::new(0x48, 0);

    /// [`VisualSampleEntryFields::frame_count`] のデフォルト値 (1)
    pub const DEFAULT_FRAME_COUNT: u16 = 1;

    /// [`VisualSampleEntryFields::depth`] のデフォルト値 (images are in colour with no alpha)
    pub const DEFAULT_DEPTH: u16 = 0x0018;

    /// 名前なしを表す [`VisualSampleEntryFields::compressorname`] の値
    pub const NULL_COMPRESSORNAME: [u8; 32] = [0; 32];
}

impl Encode for VisualSampleEntryFields {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += [0u8; 6].encode(&mut buf[offset..])?;
        offset += self.data_reference_index.encode(&mut buf[offset..])?;
        offset += [0u8; 2 + 2 + 4 * 3].encode(&mut buf[offset..])?;
        offset += self.width.encode(&mut buf[offset..])?;
        offset += self.height.encode(&mut buf[offset..])?;
        offset += self.horizresolution.encode(&mut buf[offset..])?;
        offset += self.vertresolution.encode(&mut buf[offset..])?;
        offset += [0u8; 4].encode(&mut buf[offset..])?;
        offset += self.frame_count.encode(&mut buf[offset..])?;
        offset += self.compressorname.encode(&mut buf[offset..])?;
        offset += self.depth.encode(&mut buf[offset..])?;
        offset += (-1i16).encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for VisualSampleEntryFields {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        check_reserved_bytes(
            "VisualSampleEntry",
            &<[u8; 6]>::decode_at(buf, &mut offset)?,
        );
        let data_reference_index = NonZeroU16::decode_at(buf, &mut offset)?;
        check_reserved_bytes(
            "VisualSampleEntry",
            &<[u8; 2 + 2 + 4 * 3]>::decode_at(buf, &mut offset)?,
        );
        let width = u16::decode_at(buf, &mut offset)?;
        let height = u16::decode_at(buf, &mut offset)?;
        let horizresolution = FixedPointNumber::decode_at(buf, &mut offset)?;
        let vertresolution = FixedPointNumber::decode_at(buf, &mut offset)?;
        check_reserved_bytes(
            "VisualSampleEntry",
            &<[u8; 4]>::decode_at(buf, &mut offset)?,
        );
        let frame_count = u16::decode_at(buf, &mut offset)?;
        let compressorname = <[u8; 32]>::decode_at(buf, &mut offset)?;
        let depth = u16::decode_at(buf, &mut offset)?;
        // 末尾の pre_defined は -1 と規定されているので予約領域チェックの対象外
        let _ = <[u8; 2]>::decode_at(buf, &mut offset)?;
        Ok((
            Self {
                data_reference_index,
                width,
                height,
                horizresolution,
                vertresolution,
                frame_count,
                compressorname,
                depth,
            },
            offset,
        ))
    }
}

/// 音声系の [`SampleEntry`] に共通のフィールドをまとめた構造体
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AudioSampleEntryFields {
    pub data_reference_index: NonZeroU16,
    pub channelcount: u16,
    pub samplesize: u16,
    pub samplerate: FixedPointNumber<u16, u16>,
}

impl AudioSampleEntryFields {
    /// [`AudioSampleEntryFields::data_reference_index`] のデフォルト値
    pub const DEFAULT_DATA_REFERENCE_INDEX: NonZeroU16 = NonZeroU16::MIN;

    /// [`AudioSampleEntryFields::samplesize`] のデフォルト値
    pub const DEFAULT_SAMPLESIZE: u16 = 16;
}

impl Encode for AudioSampleEntryFields {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += [0u8; 6].encode(&mut buf[offset..])?;
        offset += self.data_reference_index.encode(&mut buf[offset..])?;
        offset += [0u8; 4 * 2].encode(&mut buf[offset..])?;
        offset += self.channelcount.encode(&mut buf[offset..])?;
        offset += self.samplesize.encode(&mut buf[offset..])?;
        offset += [0u8; 2].encode(&mut buf[offset..])?;
        offset += [0u8; 2].encode(&mut buf[offset..])?;
        offset += self.samplerate.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for AudioSampleEntryFields {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        check_reserved_bytes(
            "AudioSampleEntry",
            &<[u8; 6]>::decode_at(buf, &mut offset)?,
        );
        let data_reference_index = NonZeroU16::decode_at(buf, &mut offset)?;
        check_reserved_bytes(
            "AudioSampleEntry",
            &<[u8; 4 * 2]>::decode_at(buf, &mut offset)?,
        );
        let channelcount = u16::decode_at(buf, &mut offset)?;
        let samplesize = u16::decode_at(buf, &mut offset)?;
        let _ = <[u8; 2]>::decode_at(buf, &mut offset)?;
        check_reserved_bytes(
            "AudioSampleEntry",
            &<[u8; 2]>::decode_at(buf, &mut offset)?,
        );
        let samplerate = FixedPointNumber::decode_at(buf, &mut offset)?;
        Ok((
            Self {
                data_reference_index,
                channelcount,
                samplesize,
                samplerate,
            },
            offset,
        ))
    }
}

/// [ISO/IEC 14496-15] AVCSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Avc1Box {
    pub visual: VisualSampleEntryFields,
    pub avcc_box: AvccBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl Avc1Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"avc1");
}

impl Encode for Avc1Box {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.visual.encode(&mut buf[offset..])?;
        offset += self.avcc_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for Avc1Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let visual = VisualSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut avcc_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    AvccBox::TYPE if avcc_box.is_none() => {
                        avcc_box = Some(AvccBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    visual,
                    avcc_box: check_mandatory_box(avcc_box, "avcc", "avc1")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for Avc1Box {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.avcc_box).map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-15] AVCConfigurationBox class (親: [`Avc1Box`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AvccBox {
    pub avc_profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level_indication: u8,
    pub length_size_minus_one: Uint<u8, 2>,
    pub sps_list: Vec<Vec<u8>>,
    pub pps_list: Vec<Vec<u8>>,
    pub chroma_format: Option<Uint<u8, 2>>,
    pub bit_depth_luma_minus8: Option<Uint<u8, 3>>,
    pub bit_depth_chroma_minus8: Option<Uint<u8, 3>>,
    pub sps_ext_list: Vec<Vec<u8>>,
}

impl AvccBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"avcC");

    const CONFIGURATION_VERSION: u8 = 1;
}

impl Encode for AvccBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;

        offset += Self::CONFIGURATION_VERSION.encode(&mut buf[offset..])?;
        offset += self.avc_profile_indication.encode(&mut buf[offset..])?;
        offset += self.profile_compatibility.encode(&mut buf[offset..])?;
        offset += self.avc_level_indication.encode(&mut buf[offset..])?;
        offset += (0b1111_1100 | self.length_size_minus_one.get()).encode(&mut buf[offset..])?;

        let sps_count =
            u8::try_from(self.sps_list.len()).map_err(|_| Error::invalid_input("Too many SPSs"))?;
        offset += (0b1110_0000 | sps_count).encode(&mut buf[offset..])?;
        for sps in &self.sps_list {
            let size =
                u16::try_from(sps.len()).map_err(|_| Error::invalid_input("Too long SPS"))?;
            offset += size.encode(&mut buf[offset..])?;
            offset += sps.encode(&mut buf[offset..])?;
        }

        let pps_count =
            u8::try_from(self.pps_list.len()).map_err(|_| Error::invalid_input("Too many PPSs"))?;
        offset += pps_count.encode(&mut buf[offset..])?;
        for pps in &self.pps_list {
            let size =
                u16::try_from(pps.len()).map_err(|_| Error::invalid_input("Too long PPS"))?;
            offset += size.encode(&mut buf[offset..])?;
            offset += pps.encode(&mut buf[offset..])?;
        }

        if !matches!(self.avc_profile_indication, 66 | 77 | 88) {
            let chroma_format = self.chroma_format.ok_or_else(|| {
                Error::invalid_input("Missing 'chroma_format' field in 'avcC' box")
            })?;
            let bit_depth_luma_minus8 = self.bit_depth_luma_minus8.ok_or_else(|| {
                Error::invalid_input("Missing 'bit_depth_luma_minus8' field in 'avcC' box")
            })?;
            let bit_depth_chroma_minus8 = self.bit_depth_chroma_minus8.ok_or_else(|| {
                Error::invalid_input("Missing 'bit_depth_chroma_minus8' field in 'avcC' box")
            })?;
            offset += (0b1111_1100 | chroma_format.get()).encode(&mut buf[offset..])?;
            offset += (0b1111_1000 | bit_depth_luma_minus8.get()).encode(&mut buf[offset..])?;
            offset += (0b1111_1000 | bit_depth_chroma_minus8.get()).encode(&mut buf[offset..])?;

            let sps_ext_count = u8::try_from(self.sps_ext_list.len())
                .map_err(|_| Error::invalid_input("Too many SPS EXTs"))?;
            offset += sps_ext_count.encode(&mut buf[offset..])?;
            for sps_ext in &self.sps_ext_list {
                let size = u16::try_from(sps_ext.len())
                    .map_err(|_| Error::invalid_input("Too long SPS EXT"))?;
                offset += size.encode(&mut buf[offset..])?;
                offset += sps_ext.encode(&mut buf[offset..])?;
            }
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for AvccBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let configuration_version = u8::decode_at(payload, &mut offset)?;
            if configuration_version != Self::CONFIGURATION_VERSION {
                return Err(Error::invalid_data(format!(
                    "Unsupported avcC configuration version: {configuration_version}"
                )));
            }

            let avc_profile_indication = u8::decode_at(payload, &mut offset)?;
            let profile_compatibility = u8::decode_at(payload, &mut offset)?;
            let avc_level_indication = u8::decode_at(payload, &mut offset)?;
            let length_size_minus_one = Uint::from_bits(u8::decode_at(payload, &mut offset)?);

            let sps_count =
                Uint::<u8, 5>::from_bits(u8::decode_at(payload, &mut offset)?).get() as usize;
            let mut sps_list = Vec::new();
            for _ in 0..sps_count {
                let size = u16::decode_at(payload, &mut offset)? as usize;
                if offset + size > payload.len() {
                    return Err(Error::invalid_data("SPS data exceeds payload boundary"));
                }
                let sps = payload[offset..offset + size].to_vec();
                offset += size;
                sps_list.push(sps);
            }

            let pps_count = u8::decode_at(payload, &mut offset)? as usize;
            let mut pps_list = Vec::new();
            for _ in 0..pps_count {
                let size = u16::decode_at(payload, &mut offset)? as usize;
                if offset + size > payload.len() {
                    return Err(Error::invalid_data("PPS data exceeds payload boundary"));
                }
                let pps = payload[offset..offset + size].to_vec();
                offset += size;
                pps_list.push(pps);
            }

            let mut chroma_format = None;
            let mut bit_depth_luma_minus8 = None;
            let mut bit_depth_chroma_minus8 = None;
            let mut sps_ext_list = Vec::new();

            // [NOTE]
            // ISO/IEC 14496-15 の仕様としては、プロファイルが 66 | 77 | 88 以外の場合には、
            // 以降のフィールドが必須扱いとなっている。
            // ただし、現実的にはその仕様を守っていないファイルが存在するため、
            // 「残りのペイロードのサイズが空の場合には、以降の処理をスキップする」というチェックを追加している。
            if !matches!(avc_profile_indication, 66 | 77 | 88) && offset < payload.len() {
                chroma_format = Some(Uint::from_bits(u8::decode_at(payload, &mut offset)?));
                bit_depth_luma_minus8 = Some(Uint::from_bits(u8::decode_at(payload, &mut offset)?));
                bit_depth_chroma_minus8 =
                    Some(Uint::from_bits(u8::decode_at(payload, &mut offset)?));

                let sps_ext_count = u8::decode_at(payload, &mut offset)? as usize;
                for _ in 0..sps_ext_count {
                    let size = u16::decode_at(payload, &mut offset)? as usize;
                    if offset + size > payload.len() {
                        return Err(Error::invalid_data("SPS EXT data exceeds payload boundary"));
                    }
                    let sps_ext = payload[offset..offset + size].to_vec();
                    offset += size;
                    sps_ext_list.push(sps_ext);
                }
            }

            Ok((
                Self {
                    avc_profile_indication,
                    profile_compatibility,
                    avc_level_indication,
                    length_size_minus_one,
                    sps_list,
                    pps_list,
                    chroma_format,
                    bit_depth_luma_minus8,
                    bit_depth_chroma_minus8,
                    sps_ext_list,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for AvccBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-14] MP4AudioSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Mp4aBox {
    pub audio: AudioSampleEntryFields,
    pub esds_box: EsdsBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl Mp4aBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mp4a");
}

impl Encode for Mp4aBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.audio.encode(&mut buf[offset..])?;
        offset += self.esds_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for Mp4aBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let audio = AudioSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut esds_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    EsdsBox::TYPE if esds_box.is_none() => {
                        esds_box = Some(EsdsBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    audio,
                    esds_box: check_mandatory_box(esds_box, "esds", "mp4a")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for Mp4aBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.esds_box).map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ETSI TS 102 366] EC3SampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Ec3Box {
    pub audio: AudioSampleEntryFields,
    pub dec3_box: Dec3Box,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl Ec3Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ec-3");
}

impl Encode for Ec3Box {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.audio.encode(&mut buf[offset..])?;
        offset += self.dec3_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for Ec3Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let audio = AudioSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut dec3_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    Dec3Box::TYPE if dec3_box.is_none() => {
                        dec3_box = Some(Dec3Box::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    audio,
                    dec3_box: check_mandatory_box(dec3_box, "dec3", "ec-3")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for Ec3Box {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.dec3_box).map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [`Dec3Box`] に含まれる独立サブストリームの情報
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Dec3IndependentSubstream {
    pub fscod: Uint<u8, 2>,
    pub bsid: Uint<u8, 5>,
    pub bsmod: Uint<u8, 5>,
    pub acmod: Uint<u8, 3>,
    pub lfeon: Uint<u8, 1>,
    pub num_dep_sub: Uint<u8, 4>,

    /// 従属サブストリームのチャンネル位置（num_dep_sub > 0 の場合のみ意味を持つ）
    pub chan_loc: Uint<u16, 9>,
}

/// [ETSI TS 102 366] EC3SpecificBox class (親: [`Ec3Box`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Dec3Box {
    pub data_rate: Uint<u16, 13>,
    pub substreams: Vec<Dec3IndependentSubstream>,
}

impl Dec3Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dec3");
}

impl Encode for Dec3Box {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;

        if !(1..=8).contains(&self.substreams.len()) {
            return Err(Error::invalid_input(format!(
                "Invalid number of independent substreams in 'dec3' box: {}",
                self.substreams.len()
            )));
        }

        let mut writer = BitWriter::new();
        writer.write_bits(self.data_rate.get() as u32, 13)?;
        writer.write_bits(self.substreams.len() as u32 - 1, 3)?;
        for substream in &self.substreams {
            writer.write_bits(substream.fscod.get() as u32, 2)?;
            writer.write_bits(substream.bsid.get() as u32, 5)?;
            writer.write_bits(substream.bsmod.get() as u32, 5)?;
            writer.write_bits(substream.acmod.get() as u32, 3)?;
            writer.write_bits(substream.lfeon.get() as u32, 1)?;
            writer.write_bits(0, 3)?; // reserved
            writer.write_bits(substream.num_dep_sub.get() as u32, 4)?;
            if substream.num_dep_sub.get() > 0 {
                writer.write_bits(substream.chan_loc.get() as u32, 9)?;
            } else {
                writer.write_bits(0, 1)?; // reserved
            }
        }
        offset += writer.finish().as_slice().encode(&mut buf[offset..])?;

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for Dec3Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut reader = BitReader::new(payload);
            let data_rate = Uint::new(reader.read_bits(13)? as u16);
            let num_ind_sub = reader.read_bits(3)? + 1;

            let mut substreams = Vec::new();
            for _ in 0..num_ind_sub {
                let fscod = Uint::new(reader.read_bits(2)? as u8);
                let bsid = Uint::new(reader.read_bits(5)? as u8);
                let bsmod = Uint::new(reader.read_bits(5)? as u8);
                let acmod = Uint::new(reader.read_bits(3)? as u8);
                let lfeon = Uint::new(reader.read_bits(1)? as u8);
                check_reserved_bits("dec3", reader.read_bits(3)?);
                let num_dep_sub = Uint::new(reader.read_bits(4)? as u8);
                let chan_loc = if num_dep_sub.get() > 0 {
                    Uint::new(reader.read_bits(9)? as u16)
                } else {
                    check_reserved_bits("dec3", reader.read_bits(1)?);
                    Uint::new(0)
                };
                substreams.push(Dec3IndependentSubstream {
                    fscod,
                    bsid,
                    bsmod,
                    acmod,
                    lfeon,
                    num_dep_sub,
                    chan_loc,
                });
            }

            Ok((
                Self {
                    data_rate,
                    substreams,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for Dec3Box {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ETSI TS 102 114] DTSSpecificBox class (親: [`DtscBox`], [`DtshBox`], [`DtseBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DdtsBox {
    pub sampling_frequency: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    pub pcm_sample_depth: u8,
    pub frame_duration: Uint<u8, 2>,
    pub stream_construction: Uint<u8, 5>,
    pub core_lfe_present: Uint<u8, 1>,
    pub core_layout: Uint<u8, 6>,
    pub core_size: Uint<u16, 14>,
    pub stereo_downmix: Uint<u8, 1>,
    pub representation_type: Uint<u8, 3>,
    pub channel_layout: u16,
    pub multi_asset: Uint<u8, 1>,
    pub lbr_duration_mod: Uint<u8, 1>,
    pub reserved_box_present: Uint<u8, 1>,
}

impl DdtsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ddts");
}

impl Encode for DdtsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;

        offset += self.sampling_frequency.encode(&mut buf[offset..])?;
        offset += self.max_bitrate.encode(&mut buf[offset..])?;
        offset += self.avg_bitrate.encode(&mut buf[offset..])?;
        offset += self.pcm_sample_depth.encode(&mut buf[offset..])?;

        let mut writer = BitWriter::new();
        writer.write_bits(self.frame_duration.get() as u32, 2)?;
        writer.write_bits(self.stream_construction.get() as u32, 5)?;
        writer.write_bits(self.core_lfe_present.get() as u32, 1)?;
        writer.write_bits(self.core_layout.get() as u32, 6)?;
        writer.write_bits(self.core_size.get() as u32, 14)?;
        writer.write_bits(self.stereo_downmix.get() as u32, 1)?;
        writer.write_bits(self.representation_type.get() as u32, 3)?;
        writer.write_bits(self.channel_layout as u32, 16)?;
        writer.write_bits(self.multi_asset.get() as u32, 1)?;
        writer.write_bits(self.lbr_duration_mod.get() as u32, 1)?;
        writer.write_bits(self.reserved_box_present.get() as u32, 1)?;
        writer.write_bits(0, 5)?; // reserved
        offset += writer.finish().as_slice().encode(&mut buf[offset..])?;

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for DdtsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let sampling_frequency = u32::decode_at(payload, &mut offset)?;
            let max_bitrate = u32::decode_at(payload, &mut offset)?;
            let avg_bitrate = u32::decode_at(payload, &mut offset)?;
            let pcm_sample_depth = u8::decode_at(payload, &mut offset)?;

            let mut reader = BitReader::new(&payload[offset..]);
            let frame_duration = Uint::new(reader.read_bits(2)? as u8);
            let stream_construction = Uint::new(reader.read_bits(5)? as u8);
            let core_lfe_present = Uint::new(reader.read_bits(1)? as u8);
            let core_layout = Uint::new(reader.read_bits(6)? as u8);
            let core_size = Uint::new(reader.read_bits(14)? as u16);
            let stereo_downmix = Uint::new(reader.read_bits(1)? as u8);
            let representation_type = Uint::new(reader.read_bits(3)? as u8);
            let channel_layout = reader.read_bits(16)? as u16;
            let multi_asset = Uint::new(reader.read_bits(1)? as u8);
            let lbr_duration_mod = Uint::new(reader.read_bits(1)? as u8);
            let reserved_box_present = Uint::new(reader.read_bits(1)? as u8);
            check_reserved_bits("ddts", reader.read_bits(5)?);

            Ok((
                Self {
                    sampling_frequency,
                    max_bitrate,
                    avg_bitrate,
                    pcm_sample_depth,
                    frame_duration,
                    stream_construction,
                    core_lfe_present,
                    core_layout,
                    core_size,
                    stereo_downmix,
                    representation_type,
                    channel_layout,
                    multi_asset,
                    lbr_duration_mod,
                    reserved_box_present,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for DdtsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ETSI TS 102 114] DTSSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
///
/// DTS Coherent Acoustics (コア) 用のサンプルエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DtscBox {
    pub audio: AudioSampleEntryFields,
    pub ddts_box: DdtsBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl DtscBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dtsc");
}

impl Encode for DtscBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.audio.encode(&mut buf[offset..])?;
        offset += self.ddts_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for DtscBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let audio = AudioSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut ddts_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    DdtsBox::TYPE if ddts_box.is_none() => {
                        ddts_box = Some(DdtsBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    audio,
                    ddts_box: check_mandatory_box(ddts_box, "ddts", "dtsc")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for DtscBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.ddts_box).map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ETSI TS 102 114] DTSHDSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
///
/// DTS-HD (コア + 拡張) 用のサンプルエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DtshBox {
    pub audio: AudioSampleEntryFields,
    pub ddts_box: DdtsBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl DtshBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dtsh");
}

impl Encode for DtshBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.audio.encode(&mut buf[offset..])?;
        offset += self.ddts_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for DtshBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let audio = AudioSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut ddts_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    DdtsBox::TYPE if ddts_box.is_none() => {
                        ddts_box = Some(DdtsBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    audio,
                    ddts_box: check_mandatory_box(ddts_box, "ddts", "dtsh")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for DtshBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.ddts_box).map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ETSI TS 102 114] DTSESampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
///
/// DTS Express (LBR) 用のサンプルエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DtseBox {
    pub audio: AudioSampleEntryFields,
    pub ddts_box: DdtsBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl DtseBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dtse");
}

impl Encode for DtseBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.audio.encode(&mut buf[offset..])?;
        offset += self.ddts_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for DtseBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let audio = AudioSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut ddts_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    DdtsBox::TYPE if ddts_box.is_none() => {
                        ddts_box = Some(DdtsBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    audio,
                    ddts_box: check_mandatory_box(ddts_box, "ddts", "dtse")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for DtseBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.ddts_box).map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [3GPP TS 26.245] スタイル指定を保持する構造体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Tx3gStyleRecord {
    pub start_char: u16,
    pub end_char: u16,
    pub font_id: u16,
    pub face_style: u8,
    pub font_size: u8,
    pub text_color_rgba: [u8; 4],
}

impl Encode for Tx3gStyleRecord {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += self.start_char.encode(&mut buf[offset..])?;
        offset += self.end_char.encode(&mut buf[offset..])?;
        offset += self.font_id.encode(&mut buf[offset..])?;
        offset += self.face_style.encode(&mut buf[offset..])?;
        offset += self.font_size.encode(&mut buf[offset..])?;
        offset += self.text_color_rgba.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for Tx3gStyleRecord {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let start_char = u16::decode_at(buf, &mut offset)?;
        let end_char = u16::decode_at(buf, &mut offset)?;
        let font_id = u16::decode_at(buf, &mut offset)?;
        let face_style = u8::decode_at(buf, &mut offset)?;
        let font_size = u8::decode_at(buf, &mut offset)?;
        let text_color_rgba = <[u8; 4]>::decode_at(buf, &mut offset)?;
        Ok((
            Self {
                start_char,
                end_char,
                font_id,
                face_style,
                font_size,
                text_color_rgba,
            },
            offset,
        ))
    }
}

/// [3GPP TS 26.245] TextSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
///
/// タイムドテキスト（字幕）用のサンプルエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Tx3gBox {
    pub data_reference_index: NonZeroU16,
    pub display_flags: u32,
    pub horizontal_justification: i8,
    pub vertical_justification: i8,
    pub background_color_rgba: [u8; 4],

    /// デフォルトのテキスト表示領域 (top, left, bottom, right)
    pub default_text_box: [i16; 4],

    pub default_style: Tx3gStyleRecord,
    pub ftab_box: Option<FtabBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl Tx3gBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tx3g");
}

impl Encode for Tx3gBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;

        offset += [0u8; 6].encode(&mut buf[offset..])?;
        offset += self.data_reference_index.encode(&mut buf[offset..])?;
        offset += self.display_flags.encode(&mut buf[offset..])?;
        offset += self.horizontal_justification.encode(&mut buf[offset..])?;
        offset += self.vertical_justification.encode(&mut buf[offset..])?;
        offset += self.background_color_rgba.encode(&mut buf[offset..])?;
        offset += self.default_text_box.encode(&mut buf[offset..])?;
        offset += self.default_style.encode(&mut buf[offset..])?;

        if let Some(b) = &self.ftab_box {
            offset += b.encode(&mut buf[offset..])?;
        }
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for Tx3gBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _ = <[u8; 6]>::decode_at(payload, &mut offset)?;
            let data_reference_index = NonZeroU16::decode_at(payload, &mut offset)?;
            let display_flags = u32::decode_at(payload, &mut offset)?;
            let horizontal_justification = i8::decode_at(payload, &mut offset)?;
            let vertical_justification = i8::decode_at(payload, &mut offset)?;
            let background_color_rgba = <[u8; 4]>::decode_at(payload, &mut offset)?;
            let default_text_box = <[i16; 4]>::decode_at(payload, &mut offset)?;
            let default_style = Tx3gStyleRecord::decode_at(payload, &mut offset)?;

            let mut ftab_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    FtabBox::TYPE if ftab_box.is_none() => {
                        ftab_box = Some(FtabBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    data_reference_index,
                    display_flags,
                    horizontal_justification,
                    vertical_justification,
                    background_color_rgba,
                    default_text_box,
                    default_style,
                    ftab_box,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for Tx3gBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(self.ftab_box.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [`FtabBox`] に含まれるフォント情報
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtabFontEntry {
    pub font_id: u16,
    pub font_name: Vec<u8>,
}

/// [3GPP TS 26.245] FontTableBox class (親: [`Tx3gBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtabBox {
    pub entries: Vec<FtabFontEntry>,
}

impl FtabBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ftab");
}

impl Encode for FtabBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;

        offset += (self.entries.len() as u16).encode(&mut buf[offset..])?;
        for entry in &self.entries {
            offset += entry.font_id.encode(&mut buf[offset..])?;
            let name_len = u8::try_from(entry.font_name.len())
                .map_err(|_| Error::invalid_input("Too long font name"))?;
            offset += name_len.encode(&mut buf[offset..])?;
            offset += entry.font_name.as_slice().encode(&mut buf[offset..])?;
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for FtabBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let entry_count = u16::decode_at(payload, &mut offset)?;

            let mut entries = Vec::new();
            for _ in 0..entry_count {
                let font_id = u16::decode_at(payload, &mut offset)?;
                let name_len = u8::decode_at(payload, &mut offset)? as usize;
                if offset + name_len > payload.len() {
                    return Err(Error::invalid_data("Font name exceeds payload boundary"));
                }
                let font_name = payload[offset..offset + name_len].to_vec();
                offset += name_len;
                entries.push(FtabFontEntry { font_id, font_name });
            }

            Ok((Self { entries }, header.external_size() + payload.len()))
        })
    }
}

impl BaseBox for FtabBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-12] EncryptedAudioSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
///
/// 暗号化された音声トラック用のサンプルエントリー。
/// 元のサンプルエントリーの種別は sinf/frma に格納される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EncaBox {
    pub audio: AudioSampleEntryFields,
    pub sinf_box: SinfBox,
    pub esds_box: Option<EsdsBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl EncaBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"enca");
}

impl Encode for EncaBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.audio.encode(&mut buf[offset..])?;
        if let Some(b) = &self.esds_box {
            offset += b.encode(&mut buf[offset..])?;
        }
        offset += self.sinf_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for EncaBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let audio = AudioSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut sinf_box = None;
            let mut esds_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    SinfBox::TYPE if sinf_box.is_none() => {
                        sinf_box = Some(SinfBox::decode_at(payload, &mut offset)?);
                    }
                    EsdsBox::TYPE if esds_box.is_none() => {
                        esds_box = Some(EsdsBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    audio,
                    sinf_box: check_mandatory_box(sinf_box, "sinf", "enca")?,
                    esds_box,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for EncaBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(self.esds_box.iter().map(as_box_object))
                .chain(core::iter::once(&self.sinf_box).map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] EncryptedVideoSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
///
/// 暗号化された映像トラック用のサンプルエントリー。
/// 元のサンプルエントリーの種別は sinf/frma に格納される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EncvBox {
    pub visual: VisualSampleEntryFields,
    pub sinf_box: SinfBox,
    pub avcc_box: Option<AvccBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl EncvBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"encv");
}

impl Encode for EncvBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.visual.encode(&mut buf[offset..])?;
        if let Some(b) = &self.avcc_box {
            offset += b.encode(&mut buf[offset..])?;
        }
        offset += self.sinf_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for EncvBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let visual = VisualSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut sinf_box = None;
            let mut avcc_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    SinfBox::TYPE if sinf_box.is_none() => {
                        sinf_box = Some(SinfBox::decode_at(payload, &mut offset)?);
                    }
                    AvccBox::TYPE if avcc_box.is_none() => {
                        avcc_box = Some(AvccBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    visual,
                    sinf_box: check_mandatory_box(sinf_box, "sinf", "encv")?,
                    avcc_box,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for EncvBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(self.avcc_box.iter().map(as_box_object))
                .chain(core::iter::once(&self.sinf_box).map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] ProtectionSchemeInfoBox class (親: [`EncaBox`], [`EncvBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SinfBox {
    pub frma_box: FrmaBox,
    pub schi_box: Option<SchiBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl SinfBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"sinf");
}

impl Encode for SinfBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.frma_box.encode(&mut buf[offset..])?;
        if let Some(b) = &self.schi_box {
            offset += b.encode(&mut buf[offset..])?;
        }
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for SinfBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut frma_box = None;
            let mut schi_box = None;
            let mut unknown_boxes = Vec::new();

            while container_has_next_child(Self::TYPE, payload, offset) {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    FrmaBox::TYPE if frma_box.is_none() => {
                        frma_box = Some(FrmaBox::decode_at(payload, &mut offset)?);
                    }
                    SchiBox::TYPE if schi_box.is_none() => {
                        schi_box = Some(SchiBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    frma_box: check_mandatory_box(frma_box, "frma", "sinf")?,
                    schi_box,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for SinfBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.frma_box).map(as_box_object))
                .chain(self.schi_box.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] OriginalFormatBox class (親: [`SinfBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FrmaBox {
    /// 暗号化前のサンプルエントリーの種別 (例: `avc1`, `mp4a`)
    pub data_format: [u8; 4],
}

impl FrmaBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"frma");
}

impl Encode for FrmaBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.data_format.encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for FrmaBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let data_format = <[u8; 4]>::decode_at(payload, &mut offset)?;

            Ok((Self { data_format }, header.external_size() + payload.len()))
        })
    }
}

impl BaseBox for FrmaBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-12] SchemeInformationBox class (親: [`SinfBox`])
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SchiBox {
    pub unknown_boxes: Vec<UnknownBox>,
}

impl SchiBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"schi");
}

impl Encode for SchiBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for SchiBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut unknown_boxes = Vec::new();
            while container_has_next_child(Self::TYPE, payload, offset) {
                unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
            }

            Ok((Self { unknown_boxes }, header.external_size() + payload.len()))
        })
    }
}

impl BaseBox for SchiBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(self.unknown_boxes.iter().map(as_box_object))
    }
}
