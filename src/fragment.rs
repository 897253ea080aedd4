//! ムービーをフラグメントに分割する際の、各フラグメントの先頭サンプルを決定するためのモジュール
//!
//! シーク可能な Fragmented MP4 やアダプティブストリーミング用のセグメントを作るためには、
//! 全トラックのフラグメント境界が時間的に揃っている必要がある。
//! このモジュールのプランナー群は、その境界となるサンプル番号を求める役割を担っている
use std::collections::HashMap;
use std::num::NonZeroU32;

use crate::authoring::{Movie, Track};

/// フラグメント分割の計画に失敗した場合のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PlanError {
    /// トラック番号が範囲外
    #[error("track index {track_index} is out of range")]
    UnknownTrack {
        /// 対象のトラック番号（0 起算）
        track_index: usize,
    },

    /// サンプルを一つも持たないトラックが指定された
    #[error("track {track_index} has no samples")]
    EmptyTrack {
        /// 対象のトラック番号（0 起算）
        track_index: usize,
    },

    /// 映像トラックにキーフレームが存在しない
    #[error("video tracks need sync samples, but track {track_index} has none")]
    NoSyncSamples {
        /// 対象のトラック番号（0 起算）
        track_index: usize,
    },

    /// 同一メディア種別のトラック間で、時刻が一致する同期サンプルが少なすぎる
    #[error(
        "less than 25% of the sync samples in track {track_index} are aligned with the other tracks of the same type ({surviving}/{total})"
    )]
    FragmentAlignment {
        /// 対象のトラック番号（0 起算）
        track_index: usize,

        /// 他のトラックと時刻が一致した同期サンプルの数
        surviving: usize,

        /// 対象トラックの同期サンプルの総数
        total: usize,
    },

    /// 音声トラックのサンプルレートが、最小サンプルレートの整数倍になっていない
    #[error(
        "audio track {track_index} sample rate {rate} is not an integer multiple of the lowest sample rate {min_rate}"
    )]
    RateMismatch {
        /// 対象のトラック番号（0 起算）
        track_index: usize,

        /// 対象トラックのサンプルレート
        rate: u32,

        /// ムービー内の音声トラックの最小サンプルレート
        min_rate: u32,
    },

    /// サンプルレートを取得できないサンプルエントリーを持つ音声トラックが存在する
    #[error("cannot determine the sample rate of audio track {track_index}")]
    UnknownSampleRate {
        /// 対象のトラック番号（0 起算）
        track_index: usize,
    },

    /// 基準となる同期サンプルを持つトラックが存在しない
    #[error("no track with sync samples to use as a reference")]
    MissingReferenceTrack,
}

/// トラック毎のフラグメント開始サンプルを求めるためのトレイト
pub trait FragmentPlanner {
    /// 指定されたトラックの各フラグメントの先頭サンプル番号を返す
    ///
    /// 返り値は 1 起算のサンプル番号で、狭義単調増加となる。
    /// 先頭要素はフラグメント 1 の先頭サンプルを表す
    fn plan(&mut self, movie: &Movie, track_index: usize) -> Result<Vec<NonZeroU32>, PlanError>;
}

/// 映像トラックの同期サンプルの時刻の積集合に基づいてフラグメント境界を決定するプランナー
///
/// 映像トラックは、同一種別の全トラックで時刻が一致する同期サンプルのみを境界として採用する。
/// 音声などの他のトラックは、映像トラックの境界時刻に合わせてサンプル番号を換算する。
///
/// 同じムービーに対して繰り返し呼ばれることを想定して、計画結果はインスタンス内に
/// キャッシュされる。別のムービーを処理する場合は新しいインスタンスを作成すること
#[derive(Debug, Default)]
pub struct SyncSampleIntersectPlanner {
    min_fragment_duration_seconds: u32,
    cache: HashMap<usize, Vec<NonZeroU32>>,
}

impl SyncSampleIntersectPlanner {
    /// フラグメント尺の下限なしのプランナーを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// フラグメント尺の下限（秒単位）を指定してプランナーを作成する
    ///
    /// 下限を指定した場合、前の境界からの経過時間が指定秒数未満の同期サンプルは
    /// 境界として採用されなくなる
    pub fn with_min_fragment_duration(seconds: u32) -> Self {
        Self {
            min_fragment_duration_seconds: seconds,
            cache: HashMap::new(),
        }
    }

    fn plan_uncached(
        &mut self,
        movie: &Movie,
        track_index: usize,
    ) -> Result<Vec<NonZeroU32>, PlanError> {
        let track = movie
            .tracks
            .get(track_index)
            .ok_or(PlanError::UnknownTrack { track_index })?;
        if track.samples.is_empty() {
            return Err(PlanError::EmptyTrack { track_index });
        }

        if track.handler.is_video() {
            self.plan_video_track(movie, track_index, track)
        } else if track.handler.is_audio() {
            self.plan_audio_track(movie, track_index, track)
        } else {
            self.plan_other_track(movie, track)
        }
    }

    fn plan_video_track(
        &mut self,
        movie: &Movie,
        track_index: usize,
        track: &Track,
    ) -> Result<Vec<NonZeroU32>, PlanError> {
        let sync_samples =
            sync_sample_table(track).ok_or(PlanError::NoSyncSamples { track_index })?;
        let sync_times = sync_sample_times(movie, track, &sync_samples);

        // 同一種別で同期サンプルを持つ全トラック（自分自身も含む）の同期時刻
        let other_times = movie
            .tracks
            .iter()
            .filter(|t| t.handler == track.handler)
            .filter_map(|t| {
                let samples = sync_sample_table(t)?;
                Some(sync_sample_times(movie, t, &samples))
            })
            .collect::<Vec<_>>();

        self.common_sync_samples(
            track_index,
            &sync_samples,
            &sync_times,
            track.metadata.timescale.get() as u64,
            &other_times,
        )
    }

    fn plan_audio_track(
        &mut self,
        movie: &Movie,
        track_index: usize,
        track: &Track,
    ) -> Result<Vec<NonZeroU32>, PlanError> {
        // 同期サンプルを持つ最後の映像トラックを基準とする
        let reference = movie
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.handler.is_video() && sync_sample_table(t).is_some())
            .next_back();
        let Some((reference_index, reference_track)) = reference else {
            return Err(PlanError::MissingReferenceTrack);
        };

        let reference_sync_samples = self.plan(movie, reference_index)?;
        let reference_sample_count = reference_track.sample_count();

        // 最小サンプルレートの音声トラックを基準に、境界サンプルの PCM サンプル位置を求める
        let mut min_sample_rate = 192000u32;
        let mut start_positions = vec![0u64; reference_sync_samples.len()];
        for (i, audio_track) in movie.tracks.iter().enumerate() {
            if !audio_track.handler.is_audio() {
                continue;
            }
            let rate = audio_sample_rate(audio_track, i)?;
            if rate < min_sample_rate {
                min_sample_rate = rate;
                let stretch = audio_track.sample_count() as f64 / reference_sample_count as f64;
                let samples_per_frame = first_sample_duration(audio_track, i)?;
                for (position, sync_sample) in
                    start_positions.iter_mut().zip(&reference_sync_samples)
                {
                    *position = (stretch * (sync_sample.get() - 1) as f64
                        * samples_per_frame as f64)
                        .ceil() as u64;
                }
                break;
            }
        }

        let rate = audio_sample_rate(track, track_index)?;
        let samples_per_frame = first_sample_duration(track, track_index)?;
        let factor = rate as f64 / min_sample_rate as f64;
        if factor.fract() != 0.0 {
            return Err(PlanError::RateMismatch {
                track_index,
                rate,
                min_rate: min_sample_rate,
            });
        }

        let samples = start_positions
            .iter()
            .map(|&position| {
                one_based((1.0 + position as f64 * factor / samples_per_frame as f64) as u64)
            })
            .collect();
        Ok(dedup_increasing(samples))
    }

    fn plan_other_track(
        &mut self,
        movie: &Movie,
        track: &Track,
    ) -> Result<Vec<NonZeroU32>, PlanError> {
        // 同期サンプルを持つ最初のトラックを基準とする
        let reference = movie
            .tracks
            .iter()
            .enumerate()
            .find(|(_, t)| sync_sample_table(t).is_some());
        let Some((reference_index, reference_track)) = reference else {
            return Err(PlanError::MissingReferenceTrack);
        };

        let reference_sync_samples = self.plan(movie, reference_index)?;
        let stretch = track.sample_count() as f64 / reference_track.sample_count() as f64;

        let samples = reference_sync_samples
            .iter()
            .map(|s| one_based((stretch * (s.get() - 1) as f64).ceil() as u64 + 1))
            .collect();
        Ok(dedup_increasing(samples))
    }

    fn common_sync_samples(
        &self,
        track_index: usize,
        sync_samples: &[NonZeroU32],
        sync_times: &[u64],
        timescale: u64,
        other_track_times: &[Vec<u64>],
    ) -> Result<Vec<NonZeroU32>, PlanError> {
        let mut survivors = Vec::new();
        let mut survivor_times = Vec::new();
        for (&sample, &time) in sync_samples.iter().zip(sync_times) {
            let found_in_every_track = other_track_times
                .iter()
                .all(|times| times.binary_search(&time).is_ok());
            if found_in_every_track {
                survivors.push(sample);
                survivor_times.push(time);
            }
        }

        let total = sync_samples.len();
        if (survivors.len() as f64) < total as f64 * 0.25 {
            return Err(PlanError::FragmentAlignment {
                track_index,
                surviving: survivors.len(),
                total,
            });
        } else if (survivors.len() as f64) < total as f64 * 0.5 {
            tracing::warn!(
                track_index,
                surviving = survivors.len(),
                total,
                "Less than 50% of the sync samples are aligned across tracks. \
                 The fragments will be larger than expected"
            );
        } else if survivors.len() < total {
            tracing::debug!(
                track_index,
                surviving = survivors.len(),
                total,
                "Some sync samples are not aligned across tracks"
            );
        }

        if self.min_fragment_duration_seconds > 0 && !survivors.is_empty() {
            let mut thinned = vec![survivors[0]];
            let mut last_time = survivor_times[0];
            for (&sample, &time) in survivors.iter().zip(&survivor_times).skip(1) {
                if (time - last_time) / timescale >= self.min_fragment_duration_seconds as u64 {
                    thinned.push(sample);
                    last_time = time;
                }
            }
            survivors = thinned;
        }

        Ok(survivors)
    }
}

impl FragmentPlanner for SyncSampleIntersectPlanner {
    fn plan(&mut self, movie: &Movie, track_index: usize) -> Result<Vec<NonZeroU32>, PlanError> {
        if let Some(samples) = self.cache.get(&track_index) {
            return Ok(samples.clone());
        }
        let samples = self.plan_uncached(movie, track_index)?;
        self.cache.insert(track_index, samples.clone());
        Ok(samples)
    }
}

/// ムービーを固定の時間間隔で区切るプランナー
///
/// 同期サンプルの位置は考慮されないため、出力された MP4 ファイルを
/// フラグメント境界からシーク再生できる保証はないことに注意。
/// 通常の MP4 ファイルのチャンク分割など、境界の厳密さが不要な用途向け
#[derive(Debug, Clone)]
pub struct FixedDurationPlanner {
    fragment_duration_seconds: u32,
}

impl FixedDurationPlanner {
    /// デフォルトのフラグメント尺（2 秒）
    pub const DEFAULT_FRAGMENT_DURATION_SECONDS: u32 = 2;

    /// 指定された秒数単位でムービーを区切るプランナーを作成する
    pub fn new(fragment_duration_seconds: u32) -> Self {
        Self {
            fragment_duration_seconds: fragment_duration_seconds.max(1),
        }
    }
}

impl Default for FixedDurationPlanner {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FRAGMENT_DURATION_SECONDS)
    }
}

impl FragmentPlanner for FixedDurationPlanner {
    fn plan(&mut self, movie: &Movie, track_index: usize) -> Result<Vec<NonZeroU32>, PlanError> {
        let track = movie
            .tracks
            .get(track_index)
            .ok_or(PlanError::UnknownTrack { track_index })?;
        if track.samples.is_empty() {
            return Err(PlanError::EmptyTrack { track_index });
        }

        // ムービー内で最も長いトラックを基準にフラグメント数を決める
        let mut movie_duration_seconds = 0.0f64;
        for t in &movie.tracks {
            let seconds = t.duration() as f64 / t.metadata.timescale.get() as f64;
            movie_duration_seconds = movie_duration_seconds.max(seconds);
        }
        let fragment_count = ((movie_duration_seconds / self.fragment_duration_seconds as f64)
            .ceil() as usize)
            .saturating_sub(1)
            .max(1);

        let timescale = track.metadata.timescale.get() as u64;
        let fragment_ticks = timescale * self.fragment_duration_seconds as u64;

        let mut starts = vec![None; fragment_count];
        starts[0] = Some(NonZeroU32::MIN);

        let mut time = 0u64;
        for (i, sample) in track.samples.iter().enumerate() {
            let fragment_index = (time / fragment_ticks) as usize;
            if fragment_index >= fragment_count {
                break;
            }
            if starts[fragment_index].is_none() {
                starts[fragment_index] = Some(one_based(i as u64 + 1));
            }
            time += sample.duration as u64;
        }

        // サンプルが存在しないフラグメントには、後続のフラグメントの先頭を割り当てる
        let mut last = one_based(track.samples.len() as u64 + 1);
        for slot in starts.iter_mut().rev() {
            match slot {
                Some(start) => last = *start,
                None => *slot = Some(last),
            }
        }

        Ok(dedup_increasing(
            starts.into_iter().flatten().collect::<Vec<_>>(),
        ))
    }
}

// トラックの同期サンプルテーブル（stss 相当）を返す
//
// 全サンプルが独立してデコード可能な音声トラックは、
// 同期サンプルテーブルを持たないものとして扱う
fn sync_sample_table(track: &Track) -> Option<Vec<NonZeroU32>> {
    if track.handler.is_audio() && track.all_samples_are_sync() {
        return None;
    }
    let samples = track.sync_sample_numbers();
    if samples.is_empty() { None } else { Some(samples) }
}

// 同期サンプル群の（スケーリング済みの）デコード時刻を求める
fn sync_sample_times(movie: &Movie, track: &Track, sync_samples: &[NonZeroU32]) -> Vec<u64> {
    let scaling_factor = times_scaling_factor(movie, track);
    let mut times = Vec::with_capacity(sync_samples.len());
    let mut sync_iter = sync_samples.iter();
    let mut next_sync = sync_iter.next();
    let mut current_time = 0u64;
    for (i, sample) in track.samples.iter().enumerate() {
        if let Some(&sync) = next_sync
            && sync.get() as usize == i + 1
        {
            times.push(current_time * scaling_factor);
            next_sync = sync_iter.next();
        }
        current_time += sample.duration as u64;
    }
    times
}

// 同一種別のトラック間でタイムスケールが異なる場合に、
// 時刻比較を可能にするための倍率（各タイムスケールの最小公倍数）を求める
fn times_scaling_factor(movie: &Movie, track: &Track) -> u64 {
    let mut factor = 1u64;
    for other in &movie.tracks {
        if other.handler == track.handler && other.metadata.timescale != track.metadata.timescale {
            factor = lcm(factor, other.metadata.timescale.get() as u64);
        }
    }
    factor
}

fn audio_sample_rate(track: &Track, track_index: usize) -> Result<u32, PlanError> {
    track
        .sample_entry
        .audio_sample_rate()
        .map(|rate| rate as u32)
        .ok_or(PlanError::UnknownSampleRate { track_index })
}

fn first_sample_duration(track: &Track, track_index: usize) -> Result<u32, PlanError> {
    track
        .samples
        .first()
        .map(|s| s.duration)
        .ok_or(PlanError::EmptyTrack { track_index })
}

fn one_based(v: u64) -> NonZeroU32 {
    NonZeroU32::MIN.saturating_add(v.saturating_sub(1).min(u32::MAX as u64) as u32)
}

fn dedup_increasing(mut samples: Vec<NonZeroU32>) -> Vec<NonZeroU32> {
    samples.dedup();
    samples
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Uint;
    use crate::authoring::{HandlerType, Sample, TrackMetadata};
    use crate::boxes::{AudioSampleEntryFields, EsdsBox, Mp4aBox, SampleEntry, UnknownBox};
    use crate::descriptors::{
        DecoderConfigDescriptor, DecoderSpecificInfo, EsDescriptor, SlConfigDescriptor,
    };
    use crate::{BoxSize, BoxType, FixedPointNumber};

    fn video_track(timescale: u32, sample_durations: &[u32], sync: &[u32]) -> Track {
        Track {
            track_id: None,
            handler: HandlerType::Video,
            metadata: TrackMetadata::new(NonZeroU32::new(timescale).expect("non zero")),
            sample_entry: SampleEntry::Unknown(UnknownBox {
                box_type: BoxType::Normal(*b"avc1"),
                box_size: BoxSize::U32(8),
                payload: Vec::new(),
            }),
            samples: sample_durations
                .iter()
                .zip(1u32..)
                .map(|(d, i)| Sample::new(vec![0; 100], *d, sync.contains(&i)))
                .collect(),
        }
    }

    fn audio_track(timescale: u32, sample_rate: u16, sample_durations: &[u32]) -> Track {
        let sample_entry = SampleEntry::Mp4a(Mp4aBox {
            audio: AudioSampleEntryFields {
                data_reference_index: AudioSampleEntryFields::DEFAULT_DATA_REFERENCE_INDEX,
                channelcount: 2,
                samplesize: AudioSampleEntryFields::DEFAULT_SAMPLESIZE,
                samplerate: FixedPointNumber::new(sample_rate, 0),
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
                        dec_specific_info: DecoderSpecificInfo {
                            payload: vec![0x11, 0x90],
                        },
                    },
                    sl_config_descr: SlConfigDescriptor,
                },
            },
            unknown_boxes: Vec::new(),
        });
        Track {
            track_id: None,
            handler: HandlerType::Audio,
            metadata: TrackMetadata::new(NonZeroU32::new(timescale).expect("non zero")),
            sample_entry,
            samples: sample_durations
                .iter()
                .map(|d| Sample::new(vec![0; 20], *d, true))
                .collect(),
        }
    }

    fn sample_numbers(numbers: &[u32]) -> Vec<NonZeroU32> {
        numbers
            .iter()
            .map(|&n| NonZeroU32::new(n).expect("non zero"))
            .collect()
    }

    #[test]
    fn video_track_fragments_start_at_sync_samples() {
        let movie = Movie {
            tracks: vec![
                video_track(1000, &[1000; 4], &[1, 3]),
                audio_track(1000, 48000, &[500; 8]),
            ],
        };
        let mut planner = SyncSampleIntersectPlanner::new();
        assert_eq!(planner.plan(&movie, 0), Ok(sample_numbers(&[1, 3])));
    }

    #[test]
    fn audio_track_fragments_follow_the_video_track() {
        let movie = Movie {
            tracks: vec![
                video_track(1000, &[1000; 4], &[1, 3]),
                audio_track(1000, 48000, &[500; 8]),
            ],
        };
        // 映像の境界は {1, 3}（0 秒と 2 秒）。音声はサンプル尺 500 なので
        // 同じ時刻はサンプル {1, 5} になる
        let mut planner = SyncSampleIntersectPlanner::new();
        assert_eq!(planner.plan(&movie, 1), Ok(sample_numbers(&[1, 5])));
    }

    #[test]
    fn planner_output_is_strictly_increasing() {
        let movie = Movie {
            tracks: vec![
                video_track(1000, &[1000; 8], &[1, 3, 5, 7]),
                audio_track(1000, 48000, &[500; 16]),
            ],
        };
        let mut planner = SyncSampleIntersectPlanner::new();
        for track_index in 0..movie.tracks.len() {
            let plan = planner.plan(&movie, track_index).expect("plan failure");
            assert!(plan.windows(2).all(|w| w[0] < w[1]), "plan={plan:?}");
            assert_eq!(plan.first(), Some(&NonZeroU32::MIN));
        }
    }

    #[test]
    fn video_track_without_sync_samples_is_rejected() {
        let movie = Movie {
            tracks: vec![video_track(1000, &[1000; 4], &[])],
        };
        let mut planner = SyncSampleIntersectPlanner::new();
        assert!(matches!(
            planner.plan(&movie, 0),
            Err(PlanError::NoSyncSamples { track_index: 0 })
        ));
    }

    #[test]
    fn misaligned_video_tracks_are_rejected() {
        // 2 つ目の映像トラックの同期サンプルの時刻が 1 つ目と全く一致しないケース
        let movie = Movie {
            tracks: vec![
                video_track(1000, &[1000; 8], &[1, 3, 5, 7]),
                video_track(1000, &[900; 8], &[2, 4, 6, 8]),
            ],
        };
        let mut planner = SyncSampleIntersectPlanner::new();
        assert!(matches!(
            planner.plan(&movie, 0),
            Err(PlanError::FragmentAlignment { .. })
        ));
    }

    #[test]
    fn non_integer_sample_rate_ratio_is_rejected() {
        let movie = Movie {
            tracks: vec![
                video_track(1000, &[1000; 4], &[1, 3]),
                audio_track(44100, 44100, &[1024; 8]),
                audio_track(48000, 48000, &[1024; 8]),
            ],
        };
        let mut planner = SyncSampleIntersectPlanner::new();
        assert!(matches!(
            planner.plan(&movie, 2),
            Err(PlanError::RateMismatch {
                track_index: 2,
                rate: 48000,
                min_rate: 44100,
            })
        ));
    }

    #[test]
    fn min_fragment_duration_thins_out_boundaries() {
        // 1 秒毎にキーフレームがある映像トラックを 2 秒下限で間引く
        let movie = Movie {
            tracks: vec![video_track(1000, &[1000; 8], &[1, 2, 3, 4, 5, 6, 7, 8])],
        };
        let mut planner = SyncSampleIntersectPlanner::with_min_fragment_duration(2);
        assert_eq!(planner.plan(&movie, 0), Ok(sample_numbers(&[1, 3, 5, 7])));
    }

    #[test]
    fn fixed_duration_planner_cuts_by_time() {
        // 10 秒のトラックを 2 秒単位で区切ると、末尾を除いて 4 フラグメント
        let movie = Movie {
            tracks: vec![audio_track(1000, 48000, &[1000; 10])],
        };
        let mut planner = FixedDurationPlanner::default();
        assert_eq!(
            planner.plan(&movie, 0),
            Ok(sample_numbers(&[1, 3, 5, 7]))
        );
    }

    #[test]
    fn single_track_plan_degenerates_to_its_own_sync_samples() {
        let movie = Movie {
            tracks: vec![video_track(1000, &[500; 6], &[1, 4])],
        };
        let mut planner = SyncSampleIntersectPlanner::new();
        assert_eq!(planner.plan(&movie, 0), Ok(sample_numbers(&[1, 4])));
    }
}
