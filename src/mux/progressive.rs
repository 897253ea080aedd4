//! 通常の（プログレッシブ形式の）MP4 ファイルを構築するためのモジュール
use std::num::NonZeroU32;

use crate::{
    BoxHeader, BoxSize, Either, Encode, Mp4FileTime, Uint,
    authoring::{Movie, Track},
    boxes::{
        Brand, Co64Box, CttsBox, FtypBox, MdatBox, MoovBox, MvhdBox, SdtpBox, SdtpSampleDependency,
        StblBox, StcoBox, StscBox, StsdBox, StssBox, StszBox, SttsBox,
    },
    fragment::{FixedDurationPlanner, FragmentPlanner},
    mux::{MuxError, assign_track_ids, build_trak_box, next_track_id},
};

/// [`ProgressiveMp4Builder`] の挙動を調整するためのオプション
#[derive(Debug, Clone)]
pub struct ProgressiveMp4BuilderOptions {
    /// `ftyp` ボックスに格納するメジャーブランド
    pub major_brand: Brand,

    /// `ftyp` ボックスに格納するマイナーバージョン
    pub minor_version: u32,

    /// `ftyp` ボックスに格納する互換ブランド群
    pub compatible_brands: Vec<Brand>,

    /// 一つのチャンクに含めるサンプル群のおおよその尺（秒単位）
    pub chunk_duration_seconds: u32,

    /// `mvhd` や `tkhd` ボックスに格納するファイルの作成日時
    pub creation_time: Mp4FileTime,
}

impl Default for ProgressiveMp4BuilderOptions {
    fn default() -> Self {
        Self {
            major_brand: Brand::ISOM,
            minor_version: 0,
            compatible_brands: vec![Brand::ISOM, Brand::ISO2, Brand::AVC1],
            chunk_duration_seconds: FixedDurationPlanner::DEFAULT_FRAGMENT_DURATION_SECONDS,
            creation_time: Mp4FileTime::default(),
        }
    }
}

/// [`Movie`] から通常の（非フラグメント形式の）MP4 ファイルを構築するビルダー
///
/// 各トラックのサンプル群は一定の尺ごとのチャンクにまとめられ、
/// `mdat` ボックス内にはチャンク単位で全トラックのデータがインターリーブして配置される
#[derive(Debug, Default, Clone)]
pub struct ProgressiveMp4Builder {
    options: ProgressiveMp4BuilderOptions,
}

impl ProgressiveMp4Builder {
    /// デフォルト設定の [`ProgressiveMp4Builder`] インスタンスを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// オプションを指定して [`ProgressiveMp4Builder`] インスタンスを作成する
    pub fn with_options(options: ProgressiveMp4BuilderOptions) -> Self {
        Self { options }
    }

    /// MP4 ファイルを構築して、そのバイト列を返す
    pub fn build(&self, movie: &Movie) -> Result<Vec<u8>, MuxError> {
        if movie.tracks.is_empty() {
            return Err(MuxError::EmptyMovie);
        }
        let track_ids = assign_track_ids(movie)?;
        let movie_timescale = movie.timescale().ok_or(MuxError::EmptyMovie)?;

        let chunk_sample_counts = self.plan_chunks(movie)?;
        let (relative_offsets, total_payload_size) =
            interleaved_chunk_offsets(movie, &chunk_sample_counts);

        let ftyp_bytes = self.build_ftyp_box().encode_to_vec()?;
        let mdat_header = BoxHeader::new(
            MdatBox::TYPE,
            BoxSize::with_payload_size(MdatBox::TYPE, total_payload_size),
        );
        let fixed_size = ftyp_bytes.len() as u64 + mdat_header.external_size() as u64;

        // チャンクオフセットには moov ボックス自体のサイズが影響するので、
        // まずは仮の値を使ってエンコードサイズを測ってから実際の値を求める。
        // オフセットのエンコード幅（stco か co64 か）はサイズには影響しても
        // 値には影響しないため、確定までに必要な試行は最大で二回となる
        let mut use_co64 = false;
        let probe = self.build_moov_box(
            movie,
            &track_ids,
            movie_timescale,
            &chunk_sample_counts,
            &placeholder_offsets(&chunk_sample_counts, use_co64),
        )?;
        let mut base_offset = fixed_size + probe.encode_to_vec()?.len() as u64;
        let max_chunk_offset = relative_offsets
            .iter()
            .flatten()
            .copied()
            .max()
            .unwrap_or(0)
            .saturating_add(base_offset);
        if max_chunk_offset > u32::MAX as u64 {
            use_co64 = true;
            let probe = self.build_moov_box(
                movie,
                &track_ids,
                movie_timescale,
                &chunk_sample_counts,
                &placeholder_offsets(&chunk_sample_counts, use_co64),
            )?;
            base_offset = fixed_size + probe.encode_to_vec()?.len() as u64;
        }

        let chunk_offsets = absolute_offsets(&relative_offsets, base_offset, use_co64)?;
        let moov_bytes = self
            .build_moov_box(
                movie,
                &track_ids,
                movie_timescale,
                &chunk_sample_counts,
                &chunk_offsets,
            )?
            .encode_to_vec()?;

        let mut file_bytes = Vec::with_capacity(base_offset as usize);
        file_bytes.extend_from_slice(&ftyp_bytes);
        file_bytes.extend_from_slice(&moov_bytes);
        file_bytes.extend_from_slice(&mdat_header.encode_to_vec()?);
        append_interleaved_chunks(movie, &chunk_sample_counts, &mut file_bytes);
        Ok(file_bytes)
    }

    fn build_ftyp_box(&self) -> FtypBox {
        FtypBox {
            major_brand: self.options.major_brand,
            minor_version: self.options.minor_version,
            compatible_brands: self.options.compatible_brands.clone(),
        }
    }

    /// 各トラックのサンプル群をチャンクに割り振って、チャンクごとのサンプル数を返す
    fn plan_chunks(&self, movie: &Movie) -> Result<Vec<Vec<u32>>, MuxError> {
        let mut planner = FixedDurationPlanner::new(self.options.chunk_duration_seconds);
        movie
            .tracks
            .iter()
            .enumerate()
            .map(|(track_index, track)| {
                let starts = planner.plan(movie, track_index)?;
                let sample_count = track.sample_count();
                let mut counts = Vec::with_capacity(starts.len());
                for (i, start) in starts.iter().enumerate() {
                    let end = starts
                        .get(i + 1)
                        .map(|s| s.get())
                        .unwrap_or(sample_count + 1);
                    if end > start.get() {
                        counts.push(end - start.get());
                    }
                }
                debug_assert_eq!(counts.iter().sum::<u32>(), sample_count);
                Ok(counts)
            })
            .collect()
    }

    fn build_moov_box(
        &self,
        movie: &Movie,
        track_ids: &[u32],
        movie_timescale: NonZeroU32,
        chunk_sample_counts: &[Vec<u32>],
        chunk_offsets: &[Either<Vec<u32>, Vec<u64>>],
    ) -> Result<MoovBox, MuxError> {
        let mvhd_box = MvhdBox {
            creation_time: self.options.creation_time,
            modification_time: self.options.creation_time,
            timescale: movie_timescale,
            duration: movie.duration(),
            rate: MvhdBox::DEFAULT_RATE,
            volume: MvhdBox::DEFAULT_VOLUME,
            matrix: MvhdBox::DEFAULT_MATRIX,
            next_track_id: next_track_id(track_ids)?,
        };

        let mut trak_boxes = Vec::with_capacity(movie.tracks.len());
        for (i, track) in movie.tracks.iter().enumerate() {
            let stbl_box =
                build_stbl_box(track, &chunk_sample_counts[i], chunk_offsets[i].clone())?;
            trak_boxes.push(build_trak_box(
                track,
                track_ids[i],
                movie_timescale,
                self.options.creation_time,
                stbl_box,
            )?);
        }

        Ok(MoovBox {
            mvhd_box,
            trak_boxes,
            mvex_box: None,
            udta_box: None,
            unknown_boxes: Vec::new(),
        })
    }
}

fn build_stbl_box(
    track: &Track,
    chunk_sample_counts: &[u32],
    stco_or_co64_box: Either<Vec<u32>, Vec<u64>>,
) -> Result<StblBox, MuxError> {
    let mut entry_sizes = Vec::with_capacity(track.samples.len());
    for sample in &track.samples {
        let size = u32::try_from(sample.data.len()).map_err(|_| MuxError::SampleTooLarge {
            size: sample.data.len() as u64,
        })?;
        entry_sizes.push(size);
    }
    let stsz_box = match entry_sizes.first().copied().and_then(NonZeroU32::new) {
        Some(sample_size) if entry_sizes.iter().all(|&size| size == sample_size.get()) => {
            StszBox::Fixed {
                sample_size,
                sample_count: track.sample_count(),
            }
        }
        _ => StszBox::Variable { entry_sizes },
    };

    let ctts_box = track.has_composition_time_offsets().then(|| {
        CttsBox::from_sample_offsets(
            track
                .samples
                .iter()
                .map(|s| s.composition_time_offset.unwrap_or(0)),
        )
    });

    let stss_box = (!track.all_samples_are_sync()).then(|| StssBox {
        sample_numbers: track.sync_sample_numbers(),
    });

    let sdtp_box = track
        .samples
        .iter()
        .any(|s| s.sample_flags.is_some())
        .then(|| SdtpBox {
            entries: track
                .samples
                .iter()
                .map(|s| {
                    let flags = s.sample_flags.unwrap_or_default();
                    SdtpSampleDependency {
                        is_leading: Uint::new(0),
                        sample_depends_on: Uint::new(flags.sample_depends_on()),
                        sample_is_depended_on: Uint::new(flags.sample_is_depended_on()),
                        sample_has_redundancy: Uint::new(flags.sample_has_redundancy()),
                    }
                })
                .collect(),
        });

    Ok(StblBox {
        stsd_box: StsdBox {
            entries: vec![track.sample_entry.clone()],
        },
        stts_box: SttsBox::from_sample_deltas(track.samples.iter().map(|s| s.duration)),
        ctts_box,
        stsc_box: StscBox::from_sample_per_chunk_counts(chunk_sample_counts.iter().copied()),
        stsz_box,
        stco_or_co64_box: match stco_or_co64_box {
            Either::A(chunk_offsets) => Either::A(StcoBox { chunk_offsets }),
            Either::B(chunk_offsets) => Either::B(Co64Box { chunk_offsets }),
        },
        stss_box,
        sdtp_box,
        unknown_boxes: Vec::new(),
    })
}

/// `mdat` ペイロードの先頭を起点とした、各トラックの各チャンクのオフセットと、
/// ペイロード全体のサイズを求める
///
/// チャンクは「チャンク番号の昇順 -> トラックの定義順」の順序でインターリーブされる
fn interleaved_chunk_offsets(
    movie: &Movie,
    chunk_sample_counts: &[Vec<u32>],
) -> (Vec<Vec<u64>>, u64) {
    let max_chunk_count = chunk_sample_counts.iter().map(|c| c.len()).max().unwrap_or(0);
    let mut next_samples = vec![0usize; movie.tracks.len()];
    let mut relative_offsets = vec![Vec::new(); movie.tracks.len()];
    let mut position = 0u64;
    for chunk_index in 0..max_chunk_count {
        for (track_index, track) in movie.tracks.iter().enumerate() {
            let Some(&sample_count) = chunk_sample_counts[track_index].get(chunk_index) else {
                continue;
            };
            relative_offsets[track_index].push(position);
            let start = next_samples[track_index];
            let end = start + sample_count as usize;
            position += track.samples[start..end]
                .iter()
                .map(|s| s.data.len() as u64)
                .sum::<u64>();
            next_samples[track_index] = end;
        }
    }
    (relative_offsets, position)
}

/// [`interleaved_chunk_offsets()`] と同じ順序で、各チャンクのサンプルデータを書き込む
fn append_interleaved_chunks(
    movie: &Movie,
    chunk_sample_counts: &[Vec<u32>],
    file_bytes: &mut Vec<u8>,
) {
    let max_chunk_count = chunk_sample_counts.iter().map(|c| c.len()).max().unwrap_or(0);
    let mut next_samples = vec![0usize; movie.tracks.len()];
    for chunk_index in 0..max_chunk_count {
        for (track_index, track) in movie.tracks.iter().enumerate() {
            let Some(&sample_count) = chunk_sample_counts[track_index].get(chunk_index) else {
                continue;
            };
            let start = next_samples[track_index];
            let end = start + sample_count as usize;
            for sample in &track.samples[start..end] {
                file_bytes.extend_from_slice(&sample.data);
            }
            next_samples[track_index] = end;
        }
    }
}

fn placeholder_offsets(
    chunk_sample_counts: &[Vec<u32>],
    use_co64: bool,
) -> Vec<Either<Vec<u32>, Vec<u64>>> {
    chunk_sample_counts
        .iter()
        .map(|counts| {
            if use_co64 {
                Either::B(vec![0; counts.len()])
            } else {
                Either::A(vec![0; counts.len()])
            }
        })
        .collect()
}

fn absolute_offsets(
    relative_offsets: &[Vec<u64>],
    base_offset: u64,
    use_co64: bool,
) -> Result<Vec<Either<Vec<u32>, Vec<u64>>>, MuxError> {
    relative_offsets
        .iter()
        .map(|offsets| {
            if use_co64 {
                Ok(Either::B(
                    offsets.iter().map(|o| o + base_offset).collect(),
                ))
            } else {
                offsets
                    .iter()
                    .map(|o| {
                        let data_offset = o + base_offset;
                        u32::try_from(data_offset)
                            .map_err(|_| MuxError::DataOffsetTooLarge { data_offset })
                    })
                    .collect::<Result<_, _>>()
                    .map(Either::A)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::{HandlerType, Sample, TrackMetadata};
    use crate::boxes::{RootBox, SampleEntry, UnknownBox};
    use crate::{BoxType, Decode, Mp4File};

    fn sample_entry(fourcc: &[u8; 4]) -> SampleEntry {
        SampleEntry::Unknown(UnknownBox {
            box_type: BoxType::Normal(*fourcc),
            box_size: BoxSize::U32(8),
            payload: Vec::new(),
        })
    }

    fn video_track(durations: &[u32], sync: &[u32]) -> Track {
        Track {
            track_id: None,
            handler: HandlerType::Video,
            metadata: TrackMetadata::new(NonZeroU32::new(1000).expect("non zero")),
            sample_entry: sample_entry(b"tstv"),
            samples: durations
                .iter()
                .zip(1..)
                .map(|(&duration, i)| {
                    Sample::new(vec![i as u8; 10], duration, sync.contains(&i))
                })
                .collect(),
        }
    }

    fn audio_track(durations: &[u32]) -> Track {
        Track {
            track_id: None,
            handler: HandlerType::Audio,
            metadata: TrackMetadata::new(NonZeroU32::new(1000).expect("non zero")),
            sample_entry: sample_entry(b"tsta"),
            samples: durations
                .iter()
                .map(|&duration| Sample::new(vec![0xAA; 5], duration, true))
                .collect(),
        }
    }

    fn build(movie: &Movie) -> Vec<u8> {
        ProgressiveMp4Builder::new()
            .build(movie)
            .expect("build failure")
    }

    #[test]
    fn empty_movie_is_rejected() {
        assert!(matches!(
            ProgressiveMp4Builder::new().build(&Movie::default()),
            Err(MuxError::EmptyMovie)
        ));
    }

    #[test]
    fn built_file_is_decodable_and_chunk_offsets_point_at_sample_data() {
        let movie = Movie {
            tracks: vec![
                video_track(&[1000, 1000, 1000, 1000], &[1, 3]),
                audio_track(&[500; 8]),
            ],
        };
        let file_bytes = build(&movie);

        let decoded = Movie::from_file_bytes(&file_bytes).expect("decode failure");
        assert_eq!(decoded.tracks.len(), 2);
        for (original, decoded) in movie.tracks.iter().zip(decoded.tracks.iter()) {
            assert_eq!(original.samples.len(), decoded.samples.len());
            for (a, b) in original.samples.iter().zip(decoded.samples.iter()) {
                assert_eq!(a.data, b.data);
                assert_eq!(a.duration, b.duration);
            }
        }
    }

    #[test]
    fn chunks_are_interleaved_in_track_order() {
        let movie = Movie {
            tracks: vec![
                video_track(&[1000; 6], &[1, 3]),
                audio_track(&[500; 12]),
            ],
        };
        let file_bytes = build(&movie);

        let (file, _) = Mp4File::<RootBox>::decode(&file_bytes).expect("decode failure");
        let moov_box = file
            .boxes
            .iter()
            .find_map(|b| {
                if let RootBox::Moov(moov_box) = b {
                    Some(moov_box)
                } else {
                    None
                }
            })
            .expect("missing moov box");

        // 6 秒のムービーを 2 秒ごとに切ると、どちらのトラックもチャンクは 2 つになる
        let mut chunk_offsets = Vec::new();
        for trak_box in &moov_box.trak_boxes {
            let stbl_box = &trak_box.mdia_box.minf_box.stbl_box;
            let Either::A(stco_box) = &stbl_box.stco_or_co64_box else {
                panic!("unexpected co64 box");
            };
            assert_eq!(stco_box.chunk_offsets.len(), 2);
            chunk_offsets.push(stco_box.chunk_offsets.clone());
        }

        // 「チャンク番号 -> トラック」の順でオフセットが増えていく
        assert!(chunk_offsets[0][0] < chunk_offsets[1][0]);
        assert!(chunk_offsets[1][0] < chunk_offsets[0][1]);
        assert!(chunk_offsets[0][1] < chunk_offsets[1][1]);
    }

    #[test]
    fn uniform_sample_sizes_use_the_fixed_stsz_representation() {
        let movie = Movie {
            tracks: vec![audio_track(&[500; 4])],
        };
        let file_bytes = build(&movie);

        let (file, _) = Mp4File::<RootBox>::decode(&file_bytes).expect("decode failure");
        let RootBox::Moov(moov_box) = &file.boxes[0] else {
            panic!("missing moov box");
        };
        let stbl_box = &moov_box.trak_boxes[0].mdia_box.minf_box.stbl_box;
        assert!(matches!(
            stbl_box.stsz_box,
            StszBox::Fixed { sample_size, sample_count: 4 }
                if sample_size.get() == 5
        ));
        assert!(stbl_box.stss_box.is_none());
    }
}
