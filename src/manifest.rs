//! Smooth Streaming のクライアントマニフェスト（XML）を生成するためのモジュール
use std::fmt::Write as _;
use std::num::NonZeroU32;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};

use crate::{
    BaseBox, BoxHeader, Decode, Encode,
    authoring::{HandlerType, Movie, Track},
    boxes::{AvccBox, DdtsBox, Dec3Box, EsdsBox, SampleEntry},
    descriptors::AudioSpecificConfig,
    fragment::{FragmentPlanner, PlanError, SyncSampleIntersectPlanner},
};

/// WAVEFORMATEX の SubFormat フィールドに格納する Dolby Digital Plus の GUID
const DOLBY_DIGITAL_PLUS_GUID: [u8; 16] = [
    0xAF, 0x87, 0xFB, 0xA7, 0x02, 0x2D, 0xFB, 0x42, 0xA4, 0xD4, 0x05, 0xCD, 0x93, 0x84, 0x3B, 0xDD,
];

/// WAVEFORMATEX の SubFormat フィールドに格納する DTS-HD の GUID
const DTS_HD_GUID: [u8; 16] = [
    0xAE, 0xE4, 0xBF, 0x5E, 0x61, 0x5E, 0x41, 0x87, 0x92, 0xFC, 0xA4, 0x81, 0x26, 0x99, 0x02, 0x11,
];

/// マニフェストの生成に失敗した場合のエラー
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// ボックスやディスクリプターの処理に失敗した
    #[error(transparent)]
    Encode(#[from] crate::Error),

    /// フラグメント分割の計画に失敗した
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// XML の書き込みに失敗した
    #[error("failed to write XML: {0}")]
    Xml(#[from] std::io::Error),

    /// 生成した XML が UTF-8 として不正だった
    #[error("generated XML is not a valid UTF-8 string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// 同一メディア種別のトラック間でフラグメントの境界が一致していない
    #[error(
        "track {track_index} does not share its fragment borders with the preceding tracks of the same type"
    )]
    MisalignedFragments {
        /// 対象のトラック番号（0 起算）
        track_index: usize,
    },

    /// マニフェストで扱えないサンプルエントリーが指定された
    #[error("unsupported sample entry for a smooth streaming manifest: {fourcc}")]
    UnsupportedSampleEntry {
        /// サンプルエントリーの種別
        fourcc: String,
    },

    /// EC-3 の 1+1 (dual mono) モードは Smooth Streaming では扱えない
    #[error("EC-3 1+1 (dual mono) mode is not supported")]
    UnsupportedDualMonoMode,

    /// `encv` サンプルエントリーに `avcC` ボックスが含まれていない
    #[error("'encv' sample entry misses an 'avcC' box")]
    MissingAvcConfiguration,

    /// `enca` サンプルエントリーに `esds` ボックスが含まれていない
    #[error("'enca' sample entry misses an 'esds' box")]
    MissingEsdsBox,
}

/// ムービーから Smooth Streaming のクライアントマニフェストを生成するライター
///
/// 出力にはメディア種別（映像・音声）ごとに一つの `StreamIndex` 要素が含まれ、
/// 各要素の中にトラックごとの `QualityLevel` 行とフラグメントの尺を表す `c` 行が並ぶ。
/// そのため、同一メディア種別のトラック同士はフラグメントの境界が
/// （最後のフラグメントを除いて）一致している必要がある
#[derive(Debug, Default, Clone)]
pub struct SmoothStreamingManifestWriter;

impl SmoothStreamingManifestWriter {
    /// [`SmoothStreamingManifestWriter`] インスタンスを作成する
    pub fn new() -> Self {
        Self
    }

    /// デフォルトの [`SyncSampleIntersectPlanner`] を使ってマニフェストを生成する
    pub fn write_manifest(&self, movie: &Movie) -> Result<String, ManifestError> {
        self.write_manifest_with_planner(movie, &mut SyncSampleIntersectPlanner::new())
    }

    /// フラグメントの境界を決めるプランナーを指定してマニフェストを生成する
    ///
    /// ここで指定するプランナーは、実際のファイルの構築に使ったものと
    /// 同じ分割結果を返す必要がある
    pub fn write_manifest_with_planner(
        &self,
        movie: &Movie,
        planner: &mut dyn FragmentPlanner,
    ) -> Result<String, ManifestError> {
        let mut video_qualities = Vec::new();
        let mut video_fragment_durations: Option<Vec<u64>> = None;
        let mut video_timescale = None;

        let mut audio_qualities = Vec::new();
        let mut audio_fragment_durations: Option<Vec<u64>> = None;
        let mut audio_timescale = None;

        for (track_index, track) in movie.tracks.iter().enumerate() {
            match track.handler {
                HandlerType::Video => {
                    let durations =
                        calculate_fragment_durations(track, &planner.plan(movie, track_index)?);
                    video_fragment_durations = Some(check_fragments_align(
                        track_index,
                        video_fragment_durations.take(),
                        durations,
                    )?);
                    video_qualities.push(video_quality(track)?);
                    video_timescale.get_or_insert(track.metadata.timescale);
                }
                HandlerType::Audio => {
                    let durations =
                        calculate_fragment_durations(track, &planner.plan(movie, track_index)?);
                    audio_fragment_durations = Some(check_fragments_align(
                        track_index,
                        audio_fragment_durations.take(),
                        durations,
                    )?);
                    audio_qualities.push(audio_quality(track)?);
                    audio_timescale.get_or_insert(track.metadata.timescale);
                }
                HandlerType::Text => {}
            }
        }

        let mut writer = Writer::new(Vec::new());

        let mut root = BytesStart::new("SmoothStreamingMedia");
        root.push_attribute(("MajorVersion", "2"));
        root.push_attribute(("MinorVersion", "1"));
        root.push_attribute(("Duration", "0"));
        writer.write_event(Event::Start(root))?;

        if let (Some(durations), Some(timescale)) = (&video_fragment_durations, video_timescale) {
            write_video_stream_index(&mut writer, timescale, durations, &video_qualities)?;
        }
        if let (Some(durations), Some(timescale)) = (&audio_fragment_durations, audio_timescale) {
            write_audio_stream_index(&mut writer, timescale, durations, &audio_qualities)?;
        }

        writer.write_event(Event::End(BytesEnd::new("SmoothStreamingMedia")))?;
        Ok(String::from_utf8(writer.into_inner())?)
    }
}

#[derive(Debug)]
struct VideoQuality {
    bitrate: u64,
    fourcc: String,
    width: u16,
    height: u16,
    codec_private_data: String,
    nal_length: u8,
}

#[derive(Debug)]
struct AudioQuality {
    bitrate: u64,
    fourcc: String,
    audio_tag: u16,
    sampling_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    packet_size: u32,
    codec_private_data: String,
}

fn write_video_stream_index<W: std::io::Write>(
    writer: &mut Writer<W>,
    timescale: NonZeroU32,
    fragment_durations: &[u64],
    qualities: &[VideoQuality],
) -> Result<(), ManifestError> {
    let mut stream_index = BytesStart::new("StreamIndex");
    stream_index.push_attribute(("Type", "video"));
    stream_index.push_attribute(("TimeScale", timescale.to_string().as_str()));
    stream_index.push_attribute(("Chunks", fragment_durations.len().to_string().as_str()));
    stream_index.push_attribute(("Url", "video/{bitrate}/{start time}"));
    stream_index.push_attribute(("QualityLevels", qualities.len().to_string().as_str()));
    writer.write_event(Event::Start(stream_index))?;

    for (i, quality) in qualities.iter().enumerate() {
        let mut quality_level = BytesStart::new("QualityLevel");
        quality_level.push_attribute(("Index", i.to_string().as_str()));
        quality_level.push_attribute(("Bitrate", quality.bitrate.to_string().as_str()));
        quality_level.push_attribute(("FourCC", quality.fourcc.as_str()));
        quality_level.push_attribute(("MaxWidth", quality.width.to_string().as_str()));
        quality_level.push_attribute(("MaxHeight", quality.height.to_string().as_str()));
        quality_level.push_attribute(("CodecPrivateData", quality.codec_private_data.as_str()));
        quality_level.push_attribute(("NALUnitLengthField", quality.nal_length.to_string().as_str()));
        writer.write_event(Event::Empty(quality_level))?;
    }

    write_fragment_duration_rows(writer, fragment_durations)?;
    writer.write_event(Event::End(BytesEnd::new("StreamIndex")))?;
    Ok(())
}

fn write_audio_stream_index<W: std::io::Write>(
    writer: &mut Writer<W>,
    timescale: NonZeroU32,
    fragment_durations: &[u64],
    qualities: &[AudioQuality],
) -> Result<(), ManifestError> {
    let mut stream_index = BytesStart::new("StreamIndex");
    stream_index.push_attribute(("Type", "audio"));
    stream_index.push_attribute(("TimeScale", timescale.to_string().as_str()));
    stream_index.push_attribute(("Chunks", fragment_durations.len().to_string().as_str()));
    stream_index.push_attribute(("Url", "audio/{bitrate}/{start time}"));
    stream_index.push_attribute(("QualityLevels", qualities.len().to_string().as_str()));
    writer.write_event(Event::Start(stream_index))?;

    for (i, quality) in qualities.iter().enumerate() {
        let mut quality_level = BytesStart::new("QualityLevel");
        quality_level.push_attribute(("Index", i.to_string().as_str()));
        quality_level.push_attribute(("FourCC", quality.fourcc.as_str()));
        quality_level.push_attribute(("Bitrate", quality.bitrate.to_string().as_str()));
        quality_level.push_attribute(("AudioTag", quality.audio_tag.to_string().as_str()));
        quality_level.push_attribute(("SamplingRate", quality.sampling_rate.to_string().as_str()));
        quality_level.push_attribute(("Channels", quality.channels.to_string().as_str()));
        quality_level.push_attribute(("BitsPerSample", quality.bits_per_sample.to_string().as_str()));
        quality_level.push_attribute(("PacketSize", quality.packet_size.to_string().as_str()));
        quality_level.push_attribute(("CodecPrivateData", quality.codec_private_data.as_str()));
        writer.write_event(Event::Empty(quality_level))?;
    }

    write_fragment_duration_rows(writer, fragment_durations)?;
    writer.write_event(Event::End(BytesEnd::new("StreamIndex")))?;
    Ok(())
}

fn write_fragment_duration_rows<W: std::io::Write>(
    writer: &mut Writer<W>,
    fragment_durations: &[u64],
) -> Result<(), ManifestError> {
    for (i, duration) in fragment_durations.iter().enumerate() {
        let mut row = BytesStart::new("c");
        row.push_attribute(("n", i.to_string().as_str()));
        row.push_attribute(("d", duration.to_string().as_str()));
        writer.write_event(Event::Empty(row))?;
    }
    Ok(())
}

/// 各フラグメントの尺（トラックのタイムスケール単位）を求める
fn calculate_fragment_durations(track: &Track, fragment_starts: &[NonZeroU32]) -> Vec<u64> {
    let mut durations = vec![0; fragment_starts.len()];
    let mut current_fragment = 0;
    for (sample, sample_number) in track.samples.iter().zip(1u32..) {
        if current_fragment + 1 < fragment_starts.len()
            && sample_number == fragment_starts[current_fragment + 1].get()
        {
            current_fragment += 1;
        }
        durations[current_fragment] += sample.duration as u64;
    }
    durations
}

/// 同一メディア種別のトラック間でフラグメントの尺が一致しているかを確認する
///
/// 末尾のフラグメントだけはトラックごとに尺が異なっていてもよい
fn check_fragments_align(
    track_index: usize,
    reference: Option<Vec<u64>>,
    check: Vec<u64>,
) -> Result<Vec<u64>, ManifestError> {
    let Some(reference) = reference else {
        return Ok(check);
    };
    let reference_head = &reference[..reference.len().saturating_sub(1)];
    let check_head = &check[..check.len().saturating_sub(1)];
    if reference_head != check_head {
        tracing::warn!(?reference, ?check, "fragment borders do not match");
        return Err(ManifestError::MisalignedFragments { track_index });
    }
    Ok(check)
}

/// トラックの平均ビットレート (bps) を求める
fn bitrate(track: &Track) -> u64 {
    let duration_seconds =
        track.duration() as f64 / track.metadata.timescale.get() as f64;
    if duration_seconds == 0.0 {
        return 0;
    }
    ((track.total_data_size() * 8) as f64 / duration_seconds) as u64
}

fn video_quality(track: &Track) -> Result<VideoQuality, ManifestError> {
    // encv の場合は暗号化前の形式 (frma) で判定する
    let (visual, avcc_box) = match &track.sample_entry {
        SampleEntry::Avc1(b) => (&b.visual, &b.avcc_box),
        SampleEntry::Encv(b) if b.sinf_box.frma_box.data_format == *b"avc1" => (
            &b.visual,
            b.avcc_box
                .as_ref()
                .ok_or(ManifestError::MissingAvcConfiguration)?,
        ),
        entry => {
            return Err(ManifestError::UnsupportedSampleEntry {
                fourcc: entry.box_type().to_string(),
            });
        }
    };

    Ok(VideoQuality {
        bitrate: bitrate(track),
        fourcc: "AVC1".to_owned(),
        width: visual.width,
        height: visual.height,
        codec_private_data: hex_string(&avc_codec_private_data(avcc_box)),
        nal_length: avcc_box.length_size_minus_one.get() + 1,
    })
}

/// Annex-B 形式のスタートコード付きで SPS と PPS を並べたバイト列を作る
fn avc_codec_private_data(avcc_box: &AvccBox) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&[0, 0, 0, 1]);
    for sps in &avcc_box.sps_list {
        data.extend_from_slice(sps);
    }
    data.extend_from_slice(&[0, 0, 0, 1]);
    for pps in &avcc_box.pps_list {
        data.extend_from_slice(pps);
    }
    data
}

fn audio_quality(track: &Track) -> Result<AudioQuality, ManifestError> {
    match &track.sample_entry {
        SampleEntry::Mp4a(b) => aac_audio_quality(track, &b.esds_box),
        SampleEntry::Ec3(b) => ec3_audio_quality(track, &b.dec3_box),
        SampleEntry::Dtsc(b) => dts_audio_quality(track, "dtsc", &b.ddts_box),
        SampleEntry::Dtsh(b) => dts_audio_quality(track, "dtsh", &b.ddts_box),
        SampleEntry::Dtse(b) => dts_audio_quality(track, "dtse", &b.ddts_box),
        SampleEntry::Enca(b) if b.sinf_box.frma_box.data_format == *b"mp4a" => {
            aac_audio_quality(track, b.esds_box.as_ref().ok_or(ManifestError::MissingEsdsBox)?)
        }
        entry => Err(ManifestError::UnsupportedSampleEntry {
            fourcc: entry.box_type().to_string(),
        }),
    }
}

fn aac_audio_quality(track: &Track, esds_box: &EsdsBox) -> Result<AudioQuality, ManifestError> {
    let dec_specific_info = &esds_box.es.dec_config_descr.dec_specific_info;
    let config = dec_specific_info.parse_audio_specific_config()?;
    Ok(AudioQuality {
        bitrate: bitrate(track),
        fourcc: aac_fourcc(&config).to_owned(),
        audio_tag: 255,
        sampling_rate: track.sample_entry.audio_sample_rate().unwrap_or(0) as u32,
        channels: track.sample_entry.audio_channel_count().unwrap_or(0) as u16,
        bits_per_sample: track.sample_entry.audio_sample_size().unwrap_or(0),
        packet_size: 4,
        codec_private_data: hex_string(&dec_specific_info.payload),
    })
}

fn aac_fourcc(config: &AudioSpecificConfig) -> &'static str {
    if config.sbr_present {
        "AACH"
    } else if config.ps_present {
        "AACP"
    } else {
        "AACL"
    }
}

fn ec3_audio_quality(track: &Track, dec3_box: &Dec3Box) -> Result<AudioQuality, ManifestError> {
    let mut full_bandwidth_channels: u16 = 0;
    let mut lfe_channels: u16 = 0;
    let mut mask_first_byte: u8 = 0;
    let mut mask_second_byte: u8 = 0;
    for substream in &dec3_box.substreams {
        let has_dependent_substreams = substream.num_dep_sub.get() > 0;
        match substream.acmod.get() {
            // 1+1 (Ch1, Ch2)
            0 => return Err(ManifestError::UnsupportedDualMonoMode),
            // 1/0 (C)
            1 => {
                full_bandwidth_channels += 1;
                if has_dependent_substreams {
                    apply_dependent_substream_mask(
                        &mut mask_first_byte,
                        &mut mask_second_byte,
                        substream.chan_loc.get(),
                    );
                } else {
                    mask_first_byte |= 0x20;
                }
            }
            // 2/0 (L, R)
            2 => {
                full_bandwidth_channels += 2;
                if has_dependent_substreams {
                    apply_dependent_substream_mask(
                        &mut mask_first_byte,
                        &mut mask_second_byte,
                        substream.chan_loc.get(),
                    );
                } else {
                    mask_first_byte |= 0xC0;
                }
            }
            // 3/0 (L, C, R)
            3 => {
                full_bandwidth_channels += 3;
                if has_dependent_substreams {
                    apply_dependent_substream_mask(
                        &mut mask_first_byte,
                        &mut mask_second_byte,
                        substream.chan_loc.get(),
                    );
                } else {
                    mask_first_byte |= 0xE0;
                }
            }
            // 2/1 (L, R, S)
            4 => {
                full_bandwidth_channels += 3;
                if has_dependent_substreams {
                    apply_dependent_substream_mask(
                        &mut mask_first_byte,
                        &mut mask_second_byte,
                        substream.chan_loc.get(),
                    );
                } else {
                    mask_first_byte |= 0xC0;
                    mask_second_byte |= 0x80;
                }
            }
            // 3/1 (L, C, R, S)
            5 => {
                full_bandwidth_channels += 4;
                if has_dependent_substreams {
                    apply_dependent_substream_mask(
                        &mut mask_first_byte,
                        &mut mask_second_byte,
                        substream.chan_loc.get(),
                    );
                } else {
                    mask_first_byte |= 0xE0;
                    mask_second_byte |= 0x80;
                }
            }
            // 2/2 (L, R, SL, SR)
            6 => {
                full_bandwidth_channels += 4;
                if has_dependent_substreams {
                    apply_dependent_substream_mask(
                        &mut mask_first_byte,
                        &mut mask_second_byte,
                        substream.chan_loc.get(),
                    );
                } else {
                    mask_first_byte |= 0xCC;
                }
            }
            // 3/2 (L, C, R, SL, SR)
            _ => {
                full_bandwidth_channels += 5;
                if has_dependent_substreams {
                    apply_dependent_substream_mask(
                        &mut mask_first_byte,
                        &mut mask_second_byte,
                        substream.chan_loc.get(),
                    );
                } else {
                    mask_first_byte |= 0xEC;
                }
            }
        }
        if substream.lfeon.get() == 1 {
            lfe_channels += 1;
            mask_first_byte |= 0x10;
        }
    }

    // WAVEFORMATEX 拡張部: 1536 wSamplesPerBlock (LE) + dwChannelMask (32bit) + SubFormat GUID
    let mut codec_private_data = vec![0x00, 0x06, mask_first_byte, mask_second_byte, 0x00, 0x00];
    codec_private_data.extend_from_slice(&DOLBY_DIGITAL_PLUS_GUID);
    codec_private_data.extend_from_slice(&box_payload(dec3_box)?);

    Ok(AudioQuality {
        bitrate: bitrate(track),
        fourcc: "EC-3".to_owned(),
        audio_tag: 65534,
        sampling_rate: track.sample_entry.audio_sample_rate().unwrap_or(0) as u32,
        channels: full_bandwidth_channels + lfe_channels,
        bits_per_sample: 16,
        packet_size: first_sample_size(track),
        codec_private_data: hex_string(&codec_private_data),
    })
}

/// 従属サブストリームのチャンネル位置 (chan_loc) を dwChannelMask に反映する
fn apply_dependent_substream_mask(
    mask_first_byte: &mut u8,
    mask_second_byte: &mut u8,
    chan_loc: u16,
) {
    match chan_loc {
        0 => *mask_first_byte |= 0x3,   // Lc/Rc pair
        1 => *mask_first_byte |= 0xC,   // Lrs/Rrs pair
        2 => *mask_second_byte |= 0x80, // Cs
        3 => *mask_second_byte |= 0x8,  // Ts
        6 => *mask_second_byte |= 0x5,  // Lvh/Rvh pair
        7 => *mask_second_byte |= 0x2,  // Cvh
        _ => {}
    }
}

fn dts_audio_quality(
    track: &Track,
    fourcc: &str,
    ddts_box: &DdtsBox,
) -> Result<AudioQuality, ManifestError> {
    let samples_per_block: u16 = match ddts_box.frame_duration.get() {
        0 => 512,
        1 => 1024,
        2 => 2048,
        _ => 4096,
    };
    let (num_channels, channel_mask) = dts_channels_and_mask(ddts_box.channel_layout as u32);

    let mut codec_private_data = Vec::with_capacity(30);
    codec_private_data.extend_from_slice(&samples_per_block.to_le_bytes());
    codec_private_data.extend_from_slice(&channel_mask.to_le_bytes());
    codec_private_data.extend_from_slice(&DTS_HD_GUID);
    codec_private_data.push(ddts_box.stream_construction.get());
    codec_private_data.extend_from_slice(&(ddts_box.channel_layout as u32).to_le_bytes());
    codec_private_data
        .push((ddts_box.multi_asset.get() << 1) | ddts_box.lbr_duration_mod.get());
    codec_private_data.extend_from_slice(&[0x00, 0x00]);

    Ok(AudioQuality {
        bitrate: ddts_box.avg_bitrate as u64,
        fourcc: fourcc.to_owned(),
        audio_tag: 65534,
        sampling_rate: ddts_box.sampling_frequency,
        channels: num_channels,
        bits_per_sample: 16,
        packet_size: first_sample_size(track),
        codec_private_data: hex_string(&codec_private_data),
    })
}

/// DTS のチャンネル配置から、チャンネル数と WAVEFORMATEX の dwChannelMask を求める
fn dts_channels_and_mask(channel_layout: u32) -> (u16, u32) {
    let mut num_channels = 0;
    let mut channel_mask = 0;
    if channel_layout & 0x0001 != 0 {
        // Center in front of listener
        num_channels += 1;
        channel_mask |= 0x0000_0004; // SPEAKER_FRONT_CENTER
    }
    if channel_layout & 0x0002 != 0 {
        // Left/Right in front
        num_channels += 2;
        channel_mask |= 0x0000_0001; // SPEAKER_FRONT_LEFT
        channel_mask |= 0x0000_0002; // SPEAKER_FRONT_RIGHT
    }
    if channel_layout & 0x0004 != 0 {
        // Left/Right surround on side in rear
        num_channels += 2;
        channel_mask |= 0x0000_0010; // SPEAKER_BACK_LEFT
        channel_mask |= 0x0000_0020; // SPEAKER_BACK_RIGHT
    }
    if channel_layout & 0x0008 != 0 {
        // Low frequency effects subwoofer
        num_channels += 1;
        channel_mask |= 0x0000_0008; // SPEAKER_LOW_FREQUENCY
    }
    if channel_layout & 0x0010 != 0 {
        // Center surround in rear
        num_channels += 1;
        channel_mask |= 0x0000_0100; // SPEAKER_BACK_CENTER
    }
    if channel_layout & 0x0020 != 0 {
        // Left/Right height in front
        num_channels += 2;
        channel_mask |= 0x0000_1000; // SPEAKER_TOP_FRONT_LEFT
        channel_mask |= 0x0000_4000; // SPEAKER_TOP_FRONT_RIGHT
    }
    if channel_layout & 0x0040 != 0 {
        // Left/Right surround in rear
        num_channels += 2;
        channel_mask |= 0x0000_0010; // SPEAKER_BACK_LEFT
        channel_mask |= 0x0000_0020; // SPEAKER_BACK_RIGHT
    }
    if channel_layout & 0x0080 != 0 {
        // Center height in front
        num_channels += 1;
        channel_mask |= 0x0000_2000; // SPEAKER_TOP_FRONT_CENTER
    }
    if channel_layout & 0x0100 != 0 {
        // Over the listener's head
        num_channels += 1;
        channel_mask |= 0x0000_0800; // SPEAKER_TOP_CENTER
    }
    if channel_layout & 0x0200 != 0 {
        // Between left/right and center in front
        num_channels += 2;
        channel_mask |= 0x0000_0040; // SPEAKER_FRONT_LEFT_OF_CENTER
        channel_mask |= 0x0000_0080; // SPEAKER_FRONT_RIGHT_OF_CENTER
    }
    if channel_layout & 0x0400 != 0 {
        // Left/Right on side in front
        num_channels += 2;
        channel_mask |= 0x0000_0200; // SPEAKER_SIDE_LEFT
        channel_mask |= 0x0000_0400; // SPEAKER_SIDE_RIGHT
    }
    if channel_layout & 0x0800 != 0 {
        // Left/Right surround on side
        num_channels += 2;
        channel_mask |= 0x0000_0010; // SPEAKER_BACK_LEFT
        channel_mask |= 0x0000_0020; // SPEAKER_BACK_RIGHT
    }
    if channel_layout & 0x1000 != 0 {
        // Second low frequency effects subwoofer
        num_channels += 1;
        channel_mask |= 0x0000_0008; // SPEAKER_LOW_FREQUENCY
    }
    if channel_layout & 0x2000 != 0 {
        // Left/Right height on side
        num_channels += 2;
        channel_mask |= 0x0000_0010; // SPEAKER_BACK_LEFT
        channel_mask |= 0x0000_0020; // SPEAKER_BACK_RIGHT
    }
    if channel_layout & 0x4000 != 0 {
        // Center height in rear
        num_channels += 1;
        channel_mask |= 0x0001_0000; // SPEAKER_TOP_BACK_CENTER
    }
    if channel_layout & 0x8000 != 0 {
        // Left/Right height in rear
        num_channels += 2;
        channel_mask |= 0x0000_8000; // SPEAKER_TOP_BACK_LEFT
        channel_mask |= 0x0002_0000; // SPEAKER_TOP_BACK_RIGHT
    }
    if channel_layout & 0x10000 != 0 {
        // Center below in front
        num_channels += 1;
    }
    if channel_layout & 0x20000 != 0 {
        // Left/Right below in front
        num_channels += 2;
    }
    (num_channels, channel_mask)
}

fn first_sample_size(track: &Track) -> u32 {
    track
        .samples
        .first()
        .map(|s| s.data.len() as u32)
        .unwrap_or(0)
}

/// ボックスをエンコードして、ヘッダーを除いたペイロード部分だけを返す
fn box_payload<T: Encode>(b: &T) -> Result<Vec<u8>, crate::Error> {
    let bytes = b.encode_to_vec()?;
    let (header, _) = BoxHeader::decode(&bytes)?;
    Ok(bytes[header.external_size()..].to_vec())
}

fn hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02X}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::{Sample, TrackMetadata};
    use crate::boxes::{
        AudioSampleEntryFields, Avc1Box, Dec3IndependentSubstream, Mp4aBox,
        VisualSampleEntryFields,
    };
    use crate::boxes::Ec3Box;
    use crate::descriptors::{
        DecoderConfigDescriptor, DecoderSpecificInfo, EsDescriptor, SlConfigDescriptor,
    };
    use crate::fragment::FixedDurationPlanner;
    use crate::{FixedPointNumber, Uint};
    use std::num::NonZeroU32;

    fn avc1_sample_entry() -> SampleEntry {
        SampleEntry::Avc1(Avc1Box {
            visual: VisualSampleEntryFields {
                data_reference_index: VisualSampleEntryFields::DEFAULT_DATA_REFERENCE_INDEX,
                width: 1280,
                height: 720,
                horizresolution: VisualSampleEntryFields::DEFAULT_HORIZRESOLUTION,
                vertresolution: VisualSampleEntryFields::DEFAULT_VERTRESOLUTION,
                frame_count: VisualSampleEntryFields::DEFAULT_FRAME_COUNT,
                compressorname: VisualSampleEntryFields::NULL_COMPRESSORNAME,
                depth: VisualSampleEntryFields::DEFAULT_DEPTH,
            },
            avcc_box: AvccBox {
                avc_profile_indication: 66,
                profile_compatibility: 0,
                avc_level_indication: 31,
                length_size_minus_one: Uint::new(3),
                sps_list: vec![vec![0x67, 0x42, 0x00, 0x1F]],
                pps_list: vec![vec![0x68, 0xCE, 0x38, 0x80]],
                chroma_format: None,
                bit_depth_luma_minus8: None,
                bit_depth_chroma_minus8: None,
                sps_ext_list: Vec::new(),
            },
            unknown_boxes: Vec::new(),
        })
    }

    fn aac_sample_entry() -> SampleEntry {
        SampleEntry::Mp4a(Mp4aBox {
            audio: AudioSampleEntryFields {
                data_reference_index: AudioSampleEntryFields::DEFAULT_DATA_REFERENCE_INDEX,
                channelcount: 2,
                samplesize: AudioSampleEntryFields::DEFAULT_SAMPLESIZE,
                samplerate: FixedPointNumber::new(48000, 0),
            },
            esds_box: EsdsBox {
                es: EsDescriptor {
                    es_id: EsDescriptor::MIN_ES_ID,
                    stream_priority: EsDescriptor::LOWEST_STREAM_PRIORITY,
                    depends_on_es_id: None,
                    url_string: None,
                    ocr_es_id: None,
                    dec_config_descr: DecoderConfigDescriptor {
                        object_type_indication:
                            DecoderConfigDescriptor::OBJECT_TYPE_INDICATION_AUDIO_ISO_IEC_14496_3,
                        stream_type: DecoderConfigDescriptor::STREAM_TYPE_AUDIO,
                        up_stream: Uint::new(0),
                        buffer_size_db: Uint::new(0),
                        max_bitrate: 128_000,
                        avg_bitrate: 128_000,
                        // AAC-LC, 48kHz, 2ch
                        dec_specific_info: DecoderSpecificInfo {
                            payload: vec![0x11, 0x90],
                        },
                    },
                    sl_config_descr: SlConfigDescriptor,
                },
            },
            unknown_boxes: Vec::new(),
        })
    }

    fn video_track() -> Track {
        Track {
            track_id: None,
            handler: HandlerType::Video,
            metadata: TrackMetadata::new(NonZeroU32::new(1000).expect("non zero")),
            sample_entry: avc1_sample_entry(),
            samples: (1..=6)
                .map(|i| Sample::new(vec![i as u8; 100], 1000, i % 2 == 1))
                .collect(),
        }
    }

    fn audio_track() -> Track {
        Track {
            track_id: None,
            handler: HandlerType::Audio,
            metadata: TrackMetadata::new(NonZeroU32::new(1000).expect("non zero")),
            sample_entry: aac_sample_entry(),
            samples: (0..12).map(|_| Sample::new(vec![0xAA; 10], 500, true)).collect(),
        }
    }

    fn write_manifest(movie: &Movie) -> String {
        SmoothStreamingManifestWriter::new()
            .write_manifest_with_planner(movie, &mut FixedDurationPlanner::new(2))
            .expect("write failure")
    }

    #[test]
    fn manifest_contains_one_stream_index_per_media_type() {
        let movie = Movie {
            tracks: vec![video_track(), audio_track()],
        };
        let xml = write_manifest(&movie);

        assert!(xml.starts_with(
            r#"<SmoothStreamingMedia MajorVersion="2" MinorVersion="1" Duration="0">"#
        ));
        assert!(xml.contains(r#"<StreamIndex Type="video" TimeScale="1000" Chunks="2" Url="video/{bitrate}/{start time}" QualityLevels="1">"#));
        assert!(xml.contains(r#"<StreamIndex Type="audio" TimeScale="1000" Chunks="2" Url="audio/{bitrate}/{start time}" QualityLevels="1">"#));
    }

    #[test]
    fn fragment_duration_rows_are_zero_indexed() {
        let movie = Movie {
            tracks: vec![video_track()],
        };
        let xml = write_manifest(&movie);

        // 6 秒のトラックを 2 秒ごとに切ると 2000 + 4000 の二つのフラグメントになる
        assert!(xml.contains(r#"<c n="0" d="2000"/>"#));
        assert!(xml.contains(r#"<c n="1" d="4000"/>"#));
    }

    #[test]
    fn avc_codec_private_data_uses_annex_b_start_codes() {
        let movie = Movie {
            tracks: vec![video_track()],
        };
        let xml = write_manifest(&movie);

        assert!(xml.contains(r#"FourCC="AVC1""#));
        assert!(xml.contains(r#"MaxWidth="1280" MaxHeight="720""#));
        assert!(xml.contains(r#"CodecPrivateData="000000016742001F0000000168CE3880""#));
        assert!(xml.contains(r#"NALUnitLengthField="4""#));
    }

    #[test]
    fn aac_lc_track_is_reported_as_aacl() {
        let movie = Movie {
            tracks: vec![audio_track()],
        };
        let xml = write_manifest(&movie);

        assert!(xml.contains(r#"FourCC="AACL""#));
        assert!(xml.contains(r#"AudioTag="255""#));
        assert!(xml.contains(r#"SamplingRate="48000" Channels="2" BitsPerSample="16" PacketSize="4""#));
        assert!(xml.contains(r#"CodecPrivateData="1190""#));
    }

    #[test]
    fn misaligned_tracks_of_the_same_type_are_rejected() {
        let mut long_audio = audio_track();
        long_audio.samples = (0..24)
            .map(|_| Sample::new(vec![0xAA; 10], 500, true))
            .collect();
        let movie = Movie {
            tracks: vec![audio_track(), long_audio],
        };

        assert!(matches!(
            SmoothStreamingManifestWriter::new()
                .write_manifest_with_planner(&movie, &mut FixedDurationPlanner::new(2)),
            Err(ManifestError::MisalignedFragments { track_index: 1 })
        ));
    }

    #[test]
    fn ec3_channel_mask_follows_the_acmod_table() {
        // 3/2 (L, C, R, SL, SR) + LFE: 6ch, マスクの先頭バイトは 0xEC | 0x10
        let dec3_box = Dec3Box {
            data_rate: Uint::new(640),
            substreams: vec![Dec3IndependentSubstream {
                fscod: Uint::new(0),
                bsid: Uint::new(16),
                bsmod: Uint::new(0),
                acmod: Uint::new(7),
                lfeon: Uint::new(1),
                num_dep_sub: Uint::new(0),
                chan_loc: Uint::new(0),
            }],
        };
        let track = Track {
            track_id: None,
            handler: HandlerType::Audio,
            metadata: TrackMetadata::new(NonZeroU32::new(48000).expect("non zero")),
            sample_entry: SampleEntry::Ec3(Ec3Box {
                audio: AudioSampleEntryFields {
                    data_reference_index: AudioSampleEntryFields::DEFAULT_DATA_REFERENCE_INDEX,
                    channelcount: 6,
                    samplesize: AudioSampleEntryFields::DEFAULT_SAMPLESIZE,
                    samplerate: FixedPointNumber::new(48000, 0),
                },
                dec3_box: dec3_box.clone(),
                unknown_boxes: Vec::new(),
            }),
            samples: vec![Sample::new(vec![0; 1536], 1536, true)],
        };

        let quality = ec3_audio_quality(&track, &dec3_box).expect("quality failure");
        assert_eq!(quality.fourcc, "EC-3");
        assert_eq!(quality.audio_tag, 65534);
        assert_eq!(quality.channels, 6);
        assert_eq!(quality.packet_size, 1536);
        // 0x0006 (wSamplesPerBlock) + 0xFC 0x00 0x00 0x00 (dwChannelMask) + GUID ...
        assert!(quality.codec_private_data.starts_with("0006FC000000AF87FBA7"));
    }

    #[test]
    fn dual_mono_ec3_is_rejected() {
        let dec3_box = Dec3Box {
            data_rate: Uint::new(640),
            substreams: vec![Dec3IndependentSubstream {
                fscod: Uint::new(0),
                bsid: Uint::new(16),
                bsmod: Uint::new(0),
                acmod: Uint::new(0),
                lfeon: Uint::new(0),
                num_dep_sub: Uint::new(0),
                chan_loc: Uint::new(0),
            }],
        };
        let track = audio_track();
        assert!(matches!(
            ec3_audio_quality(&track, &dec3_box),
            Err(ManifestError::UnsupportedDualMonoMode)
        ));
    }

    #[test]
    fn dts_channel_layout_maps_to_channels_and_mask() {
        // C + L/R + LFE -> 4ch, mask = FRONT_CENTER | FRONT_LEFT | FRONT_RIGHT | LOW_FREQUENCY
        assert_eq!(dts_channels_and_mask(0x0001 | 0x0002 | 0x0008), (4, 0x0F));
        assert_eq!(dts_channels_and_mask(0), (0, 0));
    }
}
