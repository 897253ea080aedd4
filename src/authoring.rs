//! MP4 ファイルの構築時に入力となる、ムービーやトラックを表現するためのモジュール
//!
//! ボックス群を直接組み立てる代わりに、ここで定義している [`Movie`] や [`Track`] を
//! 構築用のビルダー（mux モジュール）やマニフェスト生成（manifest モジュール）に渡すことで、
//! サンプルテーブルなどの細部を意識せずに MP4 ファイルを扱うことができる
use std::num::NonZeroU32;

use crate::{
    Decode, Error, FixedPointNumber, Mp4File, Mp4FileTime, Result,
    aux::SampleTableAccessor,
    boxes::{HdlrBox, MdhdBox, RootBox, SampleEntry, SampleFlags, StblBox, TkhdBox, TrakBox},
};

/// トラックのメディア種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerType {
    /// 音声トラック
    Audio,

    /// 映像トラック
    Video,

    /// テキスト（字幕）トラック
    Text,
}

impl HandlerType {
    /// `hdlr` ボックスに格納されるハンドラー種別を返す
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Audio => HdlrBox::HANDLER_TYPE_SOUN,
            Self::Video => HdlrBox::HANDLER_TYPE_VIDE,
            Self::Text => HdlrBox::HANDLER_TYPE_TEXT,
        }
    }

    /// `hdlr` ボックスに格納されているハンドラー種別から [`HandlerType`] を求める
    ///
    /// 未対応のハンドラー種別の場合には [`None`] が返される
    pub const fn from_fourcc(fourcc: [u8; 4]) -> Option<Self> {
        match &fourcc {
            b"soun" => Some(Self::Audio),
            b"vide" => Some(Self::Video),
            b"text" => Some(Self::Text),
            _ => None,
        }
    }

    /// 音声トラックかどうか
    pub const fn is_audio(self) -> bool {
        matches!(self, Self::Audio)
    }

    /// 映像トラックかどうか
    pub const fn is_video(self) -> bool {
        matches!(self, Self::Video)
    }
}

/// トラック内の個々のサンプル（音声や映像の 1 フレーム分のデータ）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// サンプルのデータ
    pub data: Vec<u8>,

    /// サンプルの尺（トラックのタイムスケール単位）
    pub duration: u32,

    /// キーフレーム（同期サンプル）かどうか
    pub keyframe: bool,

    /// デコード時刻と合成時刻のオフセット（`ctts` ボックス由来）
    ///
    /// 合成時刻オフセットを持たないトラックの場合は [`None`] になる
    pub composition_time_offset: Option<i64>,

    /// サンプルの依存関係などの属性（`sdtp` ボックス由来）
    pub sample_flags: Option<SampleFlags>,
}

impl Sample {
    /// 属性情報を持たないサンプルを作成する
    pub fn new(data: Vec<u8>, duration: u32, keyframe: bool) -> Self {
        Self {
            data,
            duration,
            keyframe,
            composition_time_offset: None,
            sample_flags: None,
        }
    }
}

/// トラックのヘッダー情報（`tkhd` や `mdhd` ボックスに書き出される内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    /// トラックの作成日時
    pub creation_time: Mp4FileTime,

    /// トラックの更新日時
    pub modification_time: Mp4FileTime,

    /// トラックのタイムスケール
    pub timescale: NonZeroU32,

    /// ISO-639-2/T の言語コード
    pub language: [u8; 3],

    /// 映像の幅（映像トラック以外ではゼロ）
    pub width: FixedPointNumber<i16, u16>,

    /// 映像の高さ（映像トラック以外ではゼロ）
    pub height: FixedPointNumber<i16, u16>,

    /// 音量（音声トラック以外ではゼロ）
    pub volume: FixedPointNumber<i8, u8>,
}

impl TrackMetadata {
    /// 指定されたタイムスケールを持つ、他はデフォルト値のメタデータを作成する
    pub fn new(timescale: NonZeroU32) -> Self {
        Self {
            creation_time: Mp4FileTime::default(),
            modification_time: Mp4FileTime::default(),
            timescale,
            language: MdhdBox::LANGUAGE_UNDEFINED,
            width: FixedPointNumber::new(0, 0),
            height: FixedPointNumber::new(0, 0),
            volume: FixedPointNumber::new(0, 0),
        }
    }
}

/// ムービーを構成する個々のトラック
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// トラック ID
    ///
    /// [`None`] の場合はファイル構築時に自動で採番される
    pub track_id: Option<u32>,

    /// トラックのメディア種別
    pub handler: HandlerType,

    /// トラックのヘッダー情報
    pub metadata: TrackMetadata,

    /// トラック内のサンプル群の形式を表すサンプルエントリー
    pub sample_entry: SampleEntry,

    /// トラック内のサンプル群（デコード順）
    pub samples: Vec<Sample>,
}

impl Track {
    /// トラック内のサンプル数を返す
    pub fn sample_count(&self) -> u32 {
        self.samples.len() as u32
    }

    /// トラックの尺（トラックのタイムスケール単位）を返す
    pub fn duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    /// トラック内の全サンプルのデータサイズの合計を返す
    pub fn total_data_size(&self) -> u64 {
        self.samples.iter().map(|s| s.data.len() as u64).sum()
    }

    /// キーフレームのサンプル番号（1 起算）を昇順で返す
    pub fn sync_sample_numbers(&self) -> Vec<NonZeroU32> {
        self.samples
            .iter()
            .zip(1..)
            .filter(|(s, _)| s.keyframe)
            .filter_map(|(_, i)| NonZeroU32::new(i))
            .collect()
    }

    /// 全てのサンプルがキーフレームかどうか
    ///
    /// 音声トラックでは通常全てのサンプルが独立してデコード可能なので真になる
    pub fn all_samples_are_sync(&self) -> bool {
        self.samples.iter().all(|s| s.keyframe)
    }

    /// 合成時刻オフセットを持つトラックかどうか
    pub fn has_composition_time_offsets(&self) -> bool {
        self.samples
            .iter()
            .any(|s| s.composition_time_offset.is_some())
    }
}

/// MP4 ファイルの構築や変換の入力となるムービー
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Movie {
    /// ムービーを構成するトラック群
    pub tracks: Vec<Track>,
}

impl Movie {
    /// ムービーのタイムスケール（全トラックのタイムスケールの最大公約数）を返す
    ///
    /// トラックが存在しない場合には [`None`] が返される
    pub fn timescale(&self) -> Option<NonZeroU32> {
        let mut timescale = self.tracks.first()?.metadata.timescale.get();
        for track in &self.tracks {
            timescale = gcd(track.metadata.timescale.get(), timescale);
        }
        NonZeroU32::new(timescale)
    }

    /// ムービーの尺（ムービーのタイムスケール単位）を返す
    ///
    /// 最も長いトラックの尺をムービーのタイムスケールに換算した値となる
    pub fn duration(&self) -> u64 {
        let Some(timescale) = self.timescale() else {
            return 0;
        };
        self.tracks
            .iter()
            .map(|t| t.duration() * timescale.get() as u64 / t.metadata.timescale.get() as u64)
            .max()
            .unwrap_or(0)
    }

    /// 通常の（非フラグメント形式の）MP4 ファイルからムービーを取り出す
    ///
    /// `file_bytes` にはデコード元のファイル全体のバイト列を指定する
    /// （サンプルテーブル内のチャンクオフセットはファイル先頭からの絶対位置のため）
    ///
    /// 未対応のハンドラー種別のトラックは警告ログを出した上で無視される
    pub fn from_file_bytes(file_bytes: &[u8]) -> Result<Self> {
        let (file, _) = Mp4File::<RootBox>::decode(file_bytes)?;
        Self::from_file(&file, file_bytes)
    }

    /// デコード済みの MP4 ファイルからムービーを取り出す
    pub fn from_file(file: &Mp4File<RootBox>, file_bytes: &[u8]) -> Result<Self> {
        let moov_box = file
            .boxes
            .iter()
            .find_map(|b| {
                if let RootBox::Moov(b) = b {
                    Some(b)
                } else {
                    None
                }
            })
            .ok_or_else(|| Error::invalid_data("Missing mandatory 'moov' box"))?;

        let mut tracks = Vec::new();
        for trak_box in &moov_box.trak_boxes {
            let hdlr_box = &trak_box.mdia_box.hdlr_box;
            let Some(handler) = HandlerType::from_fourcc(hdlr_box.handler_type) else {
                tracing::warn!(
                    handler_type = ?hdlr_box.handler_type,
                    "Skipped a track with an unsupported handler type"
                );
                continue;
            };
            tracks.push(track_from_trak_box(trak_box, handler, file_bytes)?);
        }

        Ok(Self { tracks })
    }
}

fn track_from_trak_box(
    trak_box: &TrakBox,
    handler: HandlerType,
    file_bytes: &[u8],
) -> Result<Track> {
    let stbl_box = &trak_box.mdia_box.minf_box.stbl_box;
    let sample_entry = stbl_box
        .stsd_box
        .entries
        .first()
        .cloned()
        .ok_or_else(|| Error::invalid_data("Empty 'stsd' box"))?;

    let samples = collect_samples(stbl_box, file_bytes)?;

    Ok(Track {
        track_id: Some(trak_box.tkhd_box.track_id),
        handler,
        metadata: track_metadata(&trak_box.tkhd_box, &trak_box.mdia_box.mdhd_box),
        sample_entry,
        samples,
    })
}

fn track_metadata(tkhd_box: &TkhdBox, mdhd_box: &MdhdBox) -> TrackMetadata {
    TrackMetadata {
        creation_time: mdhd_box.creation_time,
        modification_time: mdhd_box.modification_time,
        timescale: mdhd_box.timescale,
        language: mdhd_box.language,
        width: tkhd_box.width,
        height: tkhd_box.height,
        volume: tkhd_box.volume,
    }
}

fn collect_samples(stbl_box: &StblBox, file_bytes: &[u8]) -> Result<Vec<Sample>> {
    let accessor = SampleTableAccessor::new(stbl_box)?;
    let has_composition_time_offsets = stbl_box.ctts_box.is_some();

    let mut samples = Vec::with_capacity(accessor.sample_count() as usize);
    for i in 1..=accessor.sample_count() {
        let index = NonZeroU32::MIN.saturating_add(i - 1);

        // ここから先の None は new() の整合性チェックを通っている限り発生しない
        let file_offset = accessor
            .sample_file_offset(index)
            .ok_or_else(|| Error::invalid_data("Inconsistent sample table"))?;
        let size = accessor
            .sample_size(index)
            .ok_or_else(|| Error::invalid_data("Inconsistent sample table"))?;
        let duration = accessor
            .sample_duration(index)
            .ok_or_else(|| Error::invalid_data("Inconsistent sample table"))?;
        let keyframe = accessor.is_sync_sample(index).unwrap_or(false);

        let start = usize::try_from(file_offset)
            .map_err(|_| Error::invalid_data("Too large chunk offset"))?;
        let end = start
            .checked_add(size as usize)
            .filter(|&end| end <= file_bytes.len())
            .ok_or_else(|| {
                Error::invalid_data(format!(
                    "Sample data exceeds file size: offset={file_offset}, size={size}"
                ))
            })?;

        let composition_time_offset = if has_composition_time_offsets {
            accessor.sample_composition_offset(index)
        } else {
            None
        };

        let sample_flags = sdtp_sample_flags(stbl_box, i);

        samples.push(Sample {
            data: file_bytes[start..end].to_vec(),
            duration,
            keyframe,
            composition_time_offset,
            sample_flags,
        });
    }
    Ok(samples)
}

// sdtp の依存情報を、フラグメント形式で使われるサンプルフラグに変換する
fn sdtp_sample_flags(stbl_box: &StblBox, sample_index: u32) -> Option<SampleFlags> {
    let sdtp_box = stbl_box.sdtp_box.as_ref()?;
    let dependency = sdtp_box.entries.get(sample_index as usize - 1)?;
    Some(SampleFlags::from_fields(
        dependency.is_leading.get(),
        dependency.sample_depends_on.get(),
        dependency.sample_is_depended_on.get(),
        dependency.sample_has_redundancy.get(),
        0,
        false,
        0,
    ))
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::UnknownBox;
    use crate::{BoxSize, BoxType};

    fn audio_track(timescale: u32, sample_durations: &[u32]) -> Track {
        Track {
            track_id: None,
            handler: HandlerType::Audio,
            metadata: TrackMetadata::new(NonZeroU32::new(timescale).expect("non zero")),
            sample_entry: SampleEntry::Unknown(UnknownBox {
                box_type: BoxType::Normal(*b"mp4a"),
                box_size: BoxSize::U32(8),
                payload: Vec::new(),
            }),
            samples: sample_durations
                .iter()
                .map(|d| Sample::new(vec![0; 10], *d, true))
                .collect(),
        }
    }

    #[test]
    fn movie_timescale_is_gcd_of_track_timescales() {
        let movie = Movie {
            tracks: vec![audio_track(48000, &[1024]), audio_track(90000, &[3000])],
        };
        assert_eq!(movie.timescale(), NonZeroU32::new(6000));
        assert_eq!(Movie::default().timescale(), None);
    }

    #[test]
    fn movie_duration_is_longest_track_duration() {
        // トラック 0: 2048 / 48000 秒、トラック 1: 9000 / 90000 秒
        let movie = Movie {
            tracks: vec![
                audio_track(48000, &[1024, 1024]),
                audio_track(90000, &[3000, 3000, 3000]),
            ],
        };
        // ムービータイムスケールは 6000 なので 0.1 秒 = 600
        assert_eq!(movie.duration(), 600);
    }

    #[test]
    fn sync_sample_numbers_are_one_based() {
        let mut track = audio_track(48000, &[1024, 1024, 1024]);
        track.samples[1].keyframe = false;
        assert_eq!(
            track.sync_sample_numbers(),
            [NonZeroU32::new(1).expect("non zero"), NonZeroU32::new(3).expect("non zero")]
        );
        assert!(!track.all_samples_are_sync());
    }

    #[test]
    fn handler_type_fourcc_round_trip() {
        for handler in [HandlerType::Audio, HandlerType::Video, HandlerType::Text] {
            assert_eq!(HandlerType::from_fourcc(handler.fourcc()), Some(handler));
        }
        assert_eq!(HandlerType::from_fourcc(*b"meta"), None);
    }
}
