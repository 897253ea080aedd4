//! ISO_IEC_14496-1 で定義されているディスクリプター群
use crate::{Decode, Encode, Error, Result, Uint, codec::BitReader};

/// [ISO_IEC_14496-1] ES_Descriptor class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EsDescriptor {
    pub es_id: u16,
    pub stream_priority: Uint<u8, 5>,
    pub depends_on_es_id: Option<u16>,
    pub url_string: Option<String>,
    pub ocr_es_id: Option<u16>,
    pub dec_config_descr: DecoderConfigDescriptor,
    pub sl_config_descr: SlConfigDescriptor,
}

impl EsDescriptor {
    const TAG: u8 = 3; // ES_DescrTag

    /// [`EsDescriptor::es_id`] の実質的な最小値 (0 は予約されている）
    pub const MIN_ES_ID: u16 = 1;

    /// [`EsDescriptor::stream_priority`] で一番優先度が低くなる値
    pub const LOWEST_STREAM_PRIORITY: Uint<u8, 5> = Uint::new(0);
}

impl Decode for EsDescriptor {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let (_tag, _size) = decode_tag_and_size(buf, &mut offset, Self::TAG)?;

        let es_id = u16::decode_at(buf, &mut offset)?;

        let b = u8::decode_at(buf, &mut offset)?;
        let stream_dependence_flag: Uint<u8, 1, 7> = Uint::from_bits(b);
        let url_flag: Uint<u8, 1, 6> = Uint::from_bits(b);
        let ocr_stream_flag: Uint<u8, 1, 5> = Uint::from_bits(b);
        let stream_priority = Uint::from_bits(b);

        let depends_on_es_id = if stream_dependence_flag.get() == 1 {
            Some(u16::decode_at(buf, &mut offset)?)
        } else {
            None
        };

        let url_string = if url_flag.get() == 1 {
            let len = u8::decode_at(buf, &mut offset)? as usize;
            Error::check_buffer_size(offset + len, buf)?;
            let s = String::from_utf8(buf[offset..offset + len].to_vec())
                .map_err(|_| Error::invalid_data("Invalid UTF-8 in URL string"))?;
            offset += len;
            Some(s)
        } else {
            None
        };

        let ocr_es_id = if ocr_stream_flag.get() == 1 {
            Some(u16::decode_at(buf, &mut offset)?)
        } else {
            None
        };

        let dec_config_descr = DecoderConfigDescriptor::decode_at(buf, &mut offset)?;
        let sl_config_descr = SlConfigDescriptor::decode_at(buf, &mut offset)?;

        Ok((
            Self {
                es_id,
                stream_priority,
                depends_on_es_id,
                url_string,
                ocr_es_id,
                dec_config_descr,
                sl_config_descr,
            },
            offset,
        ))
    }
}

impl Encode for EsDescriptor {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += self.es_id.encode(&mut buf[offset..])?;
        offset += (Uint::<u8, 1, 7>::new(self.depends_on_es_id.is_some() as u8).to_bits()
            | Uint::<u8, 1, 6>::new(self.url_string.is_some() as u8).to_bits()
            | Uint::<u8, 1, 5>::new(self.ocr_es_id.is_some() as u8).to_bits()
            | self.stream_priority.to_bits())
        .encode(&mut buf[offset..])?;

        if let Some(v) = self.depends_on_es_id {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = &self.url_string {
            offset += (v.len() as u8).encode(&mut buf[offset..])?;
            offset += v.as_bytes().encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.ocr_es_id {
            offset += v.encode(&mut buf[offset..])?;
        }

        offset += self.dec_config_descr.encode(&mut buf[offset..])?;
        offset += self.sl_config_descr.encode(&mut buf[offset..])?;

        encode_tag_and_payload(buf, Self::TAG, offset)
    }
}

/// [ISO_IEC_14496-1] DecoderConfigDescriptor class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DecoderConfigDescriptor {
    pub object_type_indication: u8,
    pub stream_type: Uint<u8, 6, 2>,
    pub up_stream: Uint<u8, 1, 1>,
    pub buffer_size_db: Uint<u32, 24>,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    pub dec_specific_info: DecoderSpecificInfo,
}

impl DecoderConfigDescriptor {
    const TAG: u8 = 4; // DecoderConfigDescrTag

    /// AAC 用の [`DecoderConfigDescriptor::object_type_indication`] の値
    pub const OBJECT_TYPE_INDICATION_AUDIO_ISO_IEC_14496_3: u8 = 0x40;

    /// 音声用の [`DecoderConfigDescriptor::stream_type`] の値
    pub const STREAM_TYPE_AUDIO: Uint<u8, 6, 2> = Uint::new(0x05);

    /// 通常の再生用メディアファイル向けの [`DecoderConfigDescriptor::up_stream`] の値
    pub const UP_STREAM_FALSE: Uint<u8, 1, 1> = Uint::new(0);
}

impl Decode for DecoderConfigDescriptor {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let (_tag, _size) = decode_tag_and_size(buf, &mut offset, Self::TAG)?;

        let object_type_indication = u8::decode_at(buf, &mut offset)?;

        let b = u8::decode_at(buf, &mut offset)?;
        let stream_type = Uint::from_bits(b);
        let up_stream = Uint::from_bits(b);

        let buffer_size_db = {
            Error::check_buffer_size(offset + 3, buf)?;
            let mut temp = [0; 4];
            temp[1..].copy_from_slice(&buf[offset..offset + 3]);
            offset += 3;
            Uint::from_bits(u32::from_be_bytes(temp))
        };

        let max_bitrate = u32::decode_at(buf, &mut offset)?;
        let avg_bitrate = u32::decode_at(buf, &mut offset)?;

        let dec_specific_info = DecoderSpecificInfo::decode_at(buf, &mut offset)?;

        Ok((
            Self {
                object_type_indication,
                stream_type,
                up_stream,
                buffer_size_db,
                max_bitrate,
                avg_bitrate,
                dec_specific_info,
            },
            offset,
        ))
    }
}

impl Encode for DecoderConfigDescriptor {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;

        offset += self.object_type_indication.encode(&mut buf[offset..])?;
        offset += (self.stream_type.to_bits()
            | self.up_stream.to_bits()
            | Uint::<u8, 1>::new(1).to_bits())
        .encode(&mut buf[offset..])?;
        offset += self.buffer_size_db.to_bits().to_be_bytes()[1..].encode(&mut buf[offset..])?;
        offset += self.max_bitrate.encode(&mut buf[offset..])?;
        offset += self.avg_bitrate.encode(&mut buf[offset..])?;
        offset += self.dec_specific_info.encode(&mut buf[offset..])?;

        encode_tag_and_payload(buf, Self::TAG, offset)
    }
}

/// [ISO_IEC_14496-1] DecoderSpecificInfo class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DecoderSpecificInfo {
    pub payload: Vec<u8>,
}

impl DecoderSpecificInfo {
    const TAG: u8 = 5; // DecSpecificInfoTag

    /// ペイロードを [`AudioSpecificConfig`] として解釈する
    ///
    /// 音声ストリーム用のディスクリプターではない場合にはエラーとなる
    pub fn parse_audio_specific_config(&self) -> Result<AudioSpecificConfig> {
        AudioSpecificConfig::parse(&self.payload)
    }
}

impl Decode for DecoderSpecificInfo {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let (_tag, size) = decode_tag_and_size(buf, &mut offset, Self::TAG)?;

        Error::check_buffer_size(offset + size, buf)?;
        let payload = buf[offset..offset + size].to_vec();
        offset += size;

        Ok((Self { payload }, offset))
    }
}

impl Encode for DecoderSpecificInfo {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.payload.encode(buf)?;
        encode_tag_and_payload(buf, Self::TAG, offset)
    }
}

/// [ISO_IEC_14496-1] SLConfigDescriptor class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlConfigDescriptor;

impl SlConfigDescriptor {
    const TAG: u8 = 6; // SLConfigDescrTag
}

impl Decode for SlConfigDescriptor {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let (_tag, _size) = decode_tag_and_size(buf, &mut offset, Self::TAG)?;

        let predefined = u8::decode_at(buf, &mut offset)?;
        if predefined != 2 {
            // MP4 では 2 が主に使われていそうなので、いったんそれ以外は未対応にしておいて、
            // 必要に応じて随時対応を追加していく
            return Err(Error::unsupported(format!(
                "Unsupported `SLConfigDescriptor.predefined` value: {predefined}"
            )));
        }

        // predefined == 2 の場合には、追加の処理は不要

        Ok((Self, offset))
    }
}

impl Encode for SlConfigDescriptor {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let predefined = 2u8;
        let offset = predefined.encode(buf)?;
        encode_tag_and_payload(buf, Self::TAG, offset)
    }
}

/// [ISO_IEC_14496-3] AudioSpecificConfig を解析した結果
///
/// マニフェスト生成などで必要となる情報だけをフィールドに展開して、
/// ビット列そのものは [`DecoderSpecificInfo::payload`] の方に保持される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sampling_frequency: u32,
    pub channel_configuration: u8,
    pub sbr_present: bool,
    pub ps_present: bool,
    pub extension_sampling_frequency: Option<u32>,
}

impl AudioSpecificConfig {
    /// AAC main
    pub const AOT_AAC_MAIN: u8 = 1;

    /// AAC LC
    pub const AOT_AAC_LC: u8 = 2;

    /// SBR (HE-AAC)
    pub const AOT_SBR: u8 = 5;

    /// PS (HE-AAC v2)
    pub const AOT_PS: u8 = 29;

    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// AudioSpecificConfig のビット列を解析する
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(payload);

        let mut audio_object_type = Self::read_audio_object_type(&mut reader)?;
        let sampling_frequency = Self::read_sampling_frequency(&mut reader)?;
        let channel_configuration = reader.read_bits(4)? as u8;

        let mut sbr_present = false;
        let mut ps_present = false;
        let mut extension_sampling_frequency = None;

        // SBR / PS が明示されている場合は、実際のオブジェクトタイプが後続する
        if audio_object_type == Self::AOT_SBR || audio_object_type == Self::AOT_PS {
            sbr_present = true;
            ps_present = audio_object_type == Self::AOT_PS;
            extension_sampling_frequency = Some(Self::read_sampling_frequency(&mut reader)?);
            audio_object_type = Self::read_audio_object_type(&mut reader)?;
        }

        match audio_object_type {
            1..=4 | 6 | 7 | 17 | 19..=23 => {
                Self::skip_ga_specific_config(&mut reader, audio_object_type, channel_configuration)?;
            }
            26 | 27 => {
                Self::skip_parametric_specific_config(&mut reader)?;
            }
            other => {
                return Err(Error::unsupported(format!(
                    "Unsupported audio object type: {other}"
                )));
            }
        }

        // ER 系のオブジェクトタイプでは epConfig が後続する
        if matches!(audio_object_type, 17 | 19..=23 | 26 | 27) {
            let ep_config = reader.read_bits(2)?;
            if ep_config == 2 || ep_config == 3 {
                return Err(Error::unsupported(format!(
                    "Unsupported epConfig value: {ep_config}"
                )));
            }
        }

        // 暗黙シグナリングされた SBR / PS の検出
        if !sbr_present && reader.remaining_bits() >= 16 {
            let sync = reader.read_bits(11)?;
            if sync == 0x2b7 {
                let extension_audio_object_type = Self::read_audio_object_type(&mut reader)?;
                if extension_audio_object_type == Self::AOT_SBR {
                    sbr_present = reader.read_bits(1)? == 1;
                    if sbr_present {
                        extension_sampling_frequency =
                            Some(Self::read_sampling_frequency(&mut reader)?);
                    }
                    if reader.remaining_bits() >= 12 {
                        let sync = reader.read_bits(11)?;
                        if sync == 0x548 {
                            ps_present = reader.read_bits(1)? == 1;
                        }
                    }
                }
            }
        }

        Ok(Self {
            audio_object_type,
            sampling_frequency,
            channel_configuration,
            sbr_present,
            ps_present,
            extension_sampling_frequency,
        })
    }

    fn read_audio_object_type(reader: &mut BitReader) -> Result<u8> {
        let aot = reader.read_bits(5)?;
        if aot == 31 {
            Ok((32 + reader.read_bits(6)?) as u8)
        } else {
            Ok(aot as u8)
        }
    }

    fn read_sampling_frequency(reader: &mut BitReader) -> Result<u32> {
        let index = reader.read_bits(4)? as usize;
        if index == 0xf {
            return reader.read_bits(24);
        }
        Self::SAMPLING_FREQUENCIES
            .get(index)
            .copied()
            .ok_or_else(|| {
                Error::invalid_data(format!("Invalid sampling frequency index: {index}"))
            })
    }

    fn skip_ga_specific_config(
        reader: &mut BitReader,
        audio_object_type: u8,
        channel_configuration: u8,
    ) -> Result<()> {
        let _frame_length_flag = reader.read_bits(1)?;
        let depends_on_core_coder = reader.read_bits(1)?;
        if depends_on_core_coder == 1 {
            let _core_coder_delay = reader.read_bits(14)?;
        }
        let extension_flag = reader.read_bits(1)?;

        if channel_configuration == 0 {
            // program_config_element の解析が必要になる
            return Err(Error::unsupported(
                "Unsupported channel configuration: 0 (program_config_element)",
            ));
        }

        if matches!(audio_object_type, 6 | 20) {
            let _layer_nr = reader.read_bits(3)?;
        }

        if extension_flag == 1 {
            if audio_object_type == 22 {
                let _num_of_sub_frame = reader.read_bits(5)?;
                let _layer_length = reader.read_bits(11)?;
            }
            if matches!(audio_object_type, 17 | 19 | 20 | 23) {
                let _aac_section_data_resilience_flag = reader.read_bits(1)?;
                let _aac_scalefactor_data_resilience_flag = reader.read_bits(1)?;
                let _aac_spectral_data_resilience_flag = reader.read_bits(1)?;
            }
            let _extension_flag3 = reader.read_bits(1)?;
        }

        Ok(())
    }

    fn skip_parametric_specific_config(reader: &mut BitReader) -> Result<()> {
        let is_base_layer = reader.read_bits(1)?;
        if is_base_layer == 1 {
            // PARAconfig
            let para_mode = reader.read_bits(2)?;
            if para_mode != 1 {
                // ErHVXCconfig
                let _hvxc_var_mode = reader.read_bits(1)?;
                let _hvxc_rate_mode = reader.read_bits(2)?;
                let extension_flag = reader.read_bits(1)?;
                if extension_flag == 1 {
                    let _var_scalable_flag = reader.read_bits(1)?;
                }
            }
            if para_mode != 0 {
                // HILNconfig
                let _hiln_quant_mode = reader.read_bits(1)?;
                let _hiln_max_num_line = reader.read_bits(8)?;
                let _hiln_sample_rate_code = reader.read_bits(4)?;
                let _hiln_frame_length = reader.read_bits(12)?;
                let _hiln_cont_mode = reader.read_bits(2)?;
            }
            let _para_extension_flag = reader.read_bits(1)?;
        } else {
            // HILNenexConfig
            let hiln_enha_layer = reader.read_bits(1)?;
            if hiln_enha_layer == 1 {
                let _hiln_enha_quant_mode = reader.read_bits(2)?;
            }
        }
        Ok(())
    }
}

fn decode_tag_and_size(buf: &[u8], offset: &mut usize, expected_tag: u8) -> Result<(u8, usize)> {
    let tag = u8::decode_at(buf, offset)?;
    if tag != expected_tag {
        return Err(Error::invalid_data(format!(
            "Unexpected descriptor tag: expected={expected_tag}, actual={tag}"
        )));
    }

    let mut size = 0;
    let mut has_next_byte = true;
    while has_next_byte {
        let b = u8::decode_at(buf, offset)?;
        has_next_byte = Uint::<u8, 1, 7>::from_bits(b).get() == 1;
        size = (size << 7) | Uint::<u8, 7>::from_bits(b).get() as usize
    }

    Ok((tag, size))
}

// buf の先頭にペイロードが格納されている前提
fn encode_tag_and_payload(buf: &mut [u8], tag: u8, payload_size: usize) -> Result<usize> {
    let mut header_buf = [0; 64];
    let header_size = encode_tag_and_size(&mut header_buf, tag, payload_size)?;
    Error::check_buffer_size(header_size + payload_size, buf)?;
    buf.copy_within(..payload_size, header_size);
    buf[..header_size].copy_from_slice(&header_buf[..header_size]);
    Ok(header_size + payload_size)
}

fn encode_tag_and_size(buf: &mut [u8], tag: u8, mut size: usize) -> Result<usize> {
    let mut offset = 0;
    offset += tag.encode(&mut buf[offset..])?;

    let mut size_bytes = Vec::new();
    for i in 0.. {
        let mut b = (size & 0b0111_1111) as u8;
        size >>= 7;

        if i > 0 {
            b |= 0b1000_0000;
        }
        size_bytes.push(b);

        if size == 0 {
            break;
        }
    }
    size_bytes.reverse(); // リトルエンディアンからビッグエンディアンにする

    offset += size_bytes.encode(&mut buf[offset..])?;
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_and_size() {
        let mut buf = [0; 32];
        let encoded_size = encode_tag_and_size(&mut buf, 12, 123456).unwrap();

        let mut offset = 0;
        let (tag, size) = decode_tag_and_size(&buf[..encoded_size], &mut offset, 12).unwrap();
        assert_eq!(tag, 12);
        assert_eq!(size, 123456);
    }

    #[test]
    fn parse_aac_lc_audio_specific_config() {
        // AOT=2 (AAC LC), 周波数インデックス=3 (48000 Hz), チャンネル構成=2
        let config = AudioSpecificConfig::parse(&[0x11, 0x90]).unwrap();
        assert_eq!(config.audio_object_type, AudioSpecificConfig::AOT_AAC_LC);
        assert_eq!(config.sampling_frequency, 48000);
        assert_eq!(config.channel_configuration, 2);
        assert!(!config.sbr_present);
        assert!(!config.ps_present);
    }

    #[test]
    fn parse_parametric_audio_specific_config() {
        // AOT=26 (ER Parametric), 周波数インデックス=11 (8000 Hz), チャンネル構成=1,
        // isBaseLayer=1, PARAmode=0 (ErHVXCconfig のみ), epConfig=0
        let config = AudioSpecificConfig::parse(&[0xD5, 0x8C, 0x00]).unwrap();
        assert_eq!(config.audio_object_type, 26);
        assert_eq!(config.sampling_frequency, 8000);
        assert_eq!(config.channel_configuration, 1);
        assert!(!config.sbr_present);
        assert!(!config.ps_present);
    }

    #[test]
    fn parse_he_aac_audio_specific_config() {
        // AOT=5 (SBR), 周波数インデックス=6 (24000 Hz), チャンネル構成=2,
        // 拡張周波数インデックス=3 (48000 Hz), 実際の AOT=2 (AAC LC)
        let config = AudioSpecificConfig::parse(&[0x2b, 0x11, 0x88, 0x00]).unwrap();
        assert_eq!(config.audio_object_type, AudioSpecificConfig::AOT_AAC_LC);
        assert_eq!(config.sampling_frequency, 24000);
        assert_eq!(config.channel_configuration, 2);
        assert!(config.sbr_present);
        assert_eq!(config.extension_sampling_frequency, Some(48000));
    }
}
