//! [`Movie`] から MP4 ファイルのバイト列を構築するためのモジュール
//!
//! 通常の（プログレッシブ形式の）MP4 ファイルを構築する [`ProgressiveMp4Builder`] と、
//! Fragmented MP4 ファイルを構築する [`FragmentedMp4Builder`] を提供している
use std::collections::HashSet;
use std::num::NonZeroU32;

use crate::{
    Either, Error, Mp4FileTime, Utf8String,
    authoring::{HandlerType, Movie, Track},
    boxes::{
        DinfBox, HdlrBox, MdhdBox, MdiaBox, MinfBox, NmhdBox, SampleFlags, SmhdBox, StblBox,
        TkhdBox, TrakBox, VmhdBox,
    },
    fragment::PlanError,
};

mod fragmented;
mod progressive;

pub use fragmented::{FragmentedMp4Builder, FragmentedMp4BuilderOptions};
pub use progressive::{ProgressiveMp4Builder, ProgressiveMp4BuilderOptions};

/// MP4 ファイルの構築に失敗した場合のエラー
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MuxError {
    /// ボックスのエンコードに失敗した
    #[error(transparent)]
    Encode(#[from] Error),

    /// フラグメント分割の計画に失敗した
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// トラックを一つも持たないムービーが指定された
    #[error("movie has no tracks")]
    EmptyMovie,

    /// トラック ID にゼロが指定された
    #[error("track id must not be zero")]
    ZeroTrackId,

    /// トラック ID が重複している
    #[error("duplicate track id: {track_id}")]
    DuplicateTrackId {
        /// 重複しているトラック ID
        track_id: u32,
    },

    /// トラック ID を採番できない
    #[error("track id overflow")]
    TrackIdOverflow,

    /// トラックの尺の計算がオーバーフローした
    #[error("track duration computation overflows")]
    DurationOverflow,

    /// サンプルテーブルで表現可能なサイズを超えるサンプルが指定された
    #[error("too large sample size: {size}")]
    SampleTooLarge {
        /// 実際のサンプルサイズ
        size: u64,
    },

    /// `trun` ボックスで表現可能な範囲を超えるコンポジションタイムオフセットが指定された
    #[error("too large composition time offset: {offset}")]
    CompositionOffsetTooLarge {
        /// 実際のオフセット値
        offset: i64,
    },

    /// `trun` ボックスの `data_offset` が表現可能な範囲を超えた
    #[error("too large data offset: {data_offset}")]
    DataOffsetTooLarge {
        /// 実際のオフセット値
        data_offset: u64,
    },

    /// `tfra` のエントリーを作る際に参照すべきサンプルフラグが見つからない
    #[error("no sample flags available for a 'tfra' entry of track {track_id}")]
    MissingSampleFlags {
        /// 対象のトラック ID
        track_id: u32,
    },
}

/// 各トラックのトラック ID を決定する
///
/// [`Track::track_id`] が指定されているトラックはその値をそのまま使い
/// （ゼロや重複はエラー）、未指定のトラックには既存の最大値より
/// 大きな値を順番に割り当てる
pub(crate) fn assign_track_ids(movie: &Movie) -> Result<Vec<u32>, MuxError> {
    let mut used = HashSet::new();
    let mut max_track_id = 0u32;
    for track in &movie.tracks {
        if let Some(track_id) = track.track_id {
            if track_id == 0 {
                return Err(MuxError::ZeroTrackId);
            }
            if !used.insert(track_id) {
                return Err(MuxError::DuplicateTrackId { track_id });
            }
            max_track_id = max_track_id.max(track_id);
        }
    }

    let mut next_track_id = max_track_id;
    movie
        .tracks
        .iter()
        .map(|track| {
            if let Some(track_id) = track.track_id {
                Ok(track_id)
            } else {
                next_track_id = next_track_id
                    .checked_add(1)
                    .ok_or(MuxError::TrackIdOverflow)?;
                Ok(next_track_id)
            }
        })
        .collect()
}

/// 次に利用可能なトラック ID（`mvhd.next_track_id`）を求める
pub(crate) fn next_track_id(track_ids: &[u32]) -> Result<u32, MuxError> {
    track_ids
        .iter()
        .copied()
        .max()
        .unwrap_or(0)
        .checked_add(1)
        .ok_or(MuxError::TrackIdOverflow)
}

/// キーフレームかどうかの情報をサンプルフラグに変換する
pub(crate) fn sample_flags_from_keyframe(keyframe: bool) -> SampleFlags {
    SampleFlags::from_fields(0, if keyframe { 2 } else { 1 }, 0, 0, 0, !keyframe, 0)
}

/// トラックの尺をムービーのタイムスケールに換算する
pub(crate) fn track_duration_in_movie_timescale(
    track: &Track,
    movie_timescale: NonZeroU32,
) -> Result<u64, MuxError> {
    track
        .duration()
        .checked_mul(movie_timescale.get() as u64)
        .map(|v| v / track.metadata.timescale.get() as u64)
        .ok_or(MuxError::DurationOverflow)
}

/// トラックに対応する `trak` ボックスを構築する
///
/// サンプルテーブルの中身は呼び出し元の形式（プログレッシブかフラグメントか）によって
/// 異なるため、構築済みの `stbl` ボックスを受け取る
pub(crate) fn build_trak_box(
    track: &Track,
    track_id: u32,
    movie_timescale: NonZeroU32,
    creation_time: Mp4FileTime,
    stbl_box: StblBox,
) -> Result<TrakBox, MuxError> {
    let tkhd_box = TkhdBox {
        flag_track_enabled: true,
        flag_track_in_movie: true,
        flag_track_in_preview: true,
        flag_track_size_is_aspect_ratio: false,
        creation_time,
        modification_time: track.metadata.modification_time,
        track_id,
        duration: track_duration_in_movie_timescale(track, movie_timescale)?,
        layer: TkhdBox::DEFAULT_LAYER,
        alternate_group: TkhdBox::DEFAULT_ALTERNATE_GROUP,
        volume: track.metadata.volume,
        matrix: TkhdBox::DEFAULT_MATRIX,
        width: track.metadata.width,
        height: track.metadata.height,
    };

    Ok(TrakBox {
        tkhd_box,
        edts_box: None,
        mdia_box: build_mdia_box(track, creation_time, stbl_box),
        unknown_boxes: Vec::new(),
    })
}

fn build_mdia_box(track: &Track, creation_time: Mp4FileTime, stbl_box: StblBox) -> MdiaBox {
    let mdhd_box = MdhdBox {
        creation_time,
        modification_time: track.metadata.modification_time,
        timescale: track.metadata.timescale,
        duration: track.duration(),
        language: track.metadata.language,
    };

    let hdlr_box = HdlrBox {
        handler_type: track.handler.fourcc(),
        name: Utf8String::EMPTY.into_null_terminated_bytes(),
    };

    let (smhd_or_vmhd_box, nmhd_box) = match track.handler {
        HandlerType::Audio => (Some(Either::A(SmhdBox::default())), None),
        HandlerType::Video => (Some(Either::B(VmhdBox::default())), None),
        HandlerType::Text => (None, Some(NmhdBox)),
    };

    MdiaBox {
        mdhd_box,
        hdlr_box,
        minf_box: MinfBox {
            smhd_or_vmhd_box,
            nmhd_box,
            dinf_box: DinfBox::LOCAL_FILE,
            stbl_box,
            unknown_boxes: Vec::new(),
        },
        unknown_boxes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::{Sample, TrackMetadata};
    use crate::boxes::{SampleEntry, UnknownBox};
    use crate::{BoxSize, BoxType};

    fn track(track_id: Option<u32>) -> Track {
        Track {
            track_id,
            handler: HandlerType::Audio,
            metadata: TrackMetadata::new(NonZeroU32::new(48000).expect("non zero")),
            sample_entry: SampleEntry::Unknown(UnknownBox {
                box_type: BoxType::Normal(*b"mp4a"),
                box_size: BoxSize::U32(8),
                payload: Vec::new(),
            }),
            samples: vec![Sample::new(vec![0; 10], 1024, true)],
        }
    }

    #[test]
    fn unassigned_track_ids_continue_after_the_largest_explicit_id() {
        let movie = Movie {
            tracks: vec![track(Some(5)), track(None), track(Some(2)), track(None)],
        };
        assert_eq!(assign_track_ids(&movie).expect("assign failure"), [5, 6, 2, 7]);
    }

    #[test]
    fn zero_and_duplicate_track_ids_are_rejected() {
        let movie = Movie {
            tracks: vec![track(Some(0))],
        };
        assert!(matches!(assign_track_ids(&movie), Err(MuxError::ZeroTrackId)));

        let movie = Movie {
            tracks: vec![track(Some(1)), track(Some(1))],
        };
        assert!(matches!(
            assign_track_ids(&movie),
            Err(MuxError::DuplicateTrackId { track_id: 1 })
        ));
    }

    #[test]
    fn sample_flags_reflect_keyframe_state() {
        let keyframe = sample_flags_from_keyframe(true);
        assert_eq!(keyframe.sample_depends_on(), 2);
        assert!(!keyframe.sample_is_difference_sample());

        let difference = sample_flags_from_keyframe(false);
        assert_eq!(difference.sample_depends_on(), 1);
        assert!(difference.sample_is_difference_sample());
    }
}
