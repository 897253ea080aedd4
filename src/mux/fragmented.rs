//! Fragmented MP4 ファイルを構築するためのモジュール
use std::num::NonZeroU32;

use crate::{
    Either, Encode, Mp4FileTime,
    authoring::{Movie, Track},
    boxes::{
        Brand, FtypBox, MdatBox, MehdBox, MfhdBox, MfraBox, MfroBox, MoofBox, MoovBox, MvexBox,
        MvhdBox, SampleFlags, StblBox, StcoBox, StscBox, StsdBox, StszBox, SttsBox, TfhdBox,
        TfraBox, TfraEntry, TrafBox, TrexBox, TrunBox, TrunSample,
    },
    fragment::{FragmentPlanner, SyncSampleIntersectPlanner},
    mux::{
        MuxError, assign_track_ids, build_trak_box, next_track_id, sample_flags_from_keyframe,
        track_duration_in_movie_timescale,
    },
};

/// [`FragmentedMp4Builder`] の挙動を調整するためのオプション
#[derive(Debug, Clone)]
pub struct FragmentedMp4BuilderOptions {
    /// `ftyp` ボックスに格納するメジャーブランド
    pub major_brand: Brand,

    /// `ftyp` ボックスに格納するマイナーバージョン
    pub minor_version: u32,

    /// `ftyp` ボックスに格納する互換ブランド群
    pub compatible_brands: Vec<Brand>,

    /// `mvhd` や `tkhd` ボックスに格納するファイルの作成日時
    pub creation_time: Mp4FileTime,
}

impl Default for FragmentedMp4BuilderOptions {
    fn default() -> Self {
        Self {
            major_brand: Brand::ISOM,
            minor_version: 0,
            compatible_brands: vec![Brand::ISOM, Brand::ISO2, Brand::AVC1],
            creation_time: Mp4FileTime::default(),
        }
    }
}

/// [`Movie`] から Fragmented MP4 ファイルを構築するビルダー
///
/// 出力されるファイルは `ftyp`、（サンプルテーブルが空の）`moov`、
/// フラグメントごとの `moof` と `mdat` のペア、そして末尾の `mfra` で構成される。
/// フラグメントの境界は [`FragmentPlanner`] が決定し、
/// デフォルトでは [`SyncSampleIntersectPlanner`] が使われる
#[derive(Debug, Default, Clone)]
pub struct FragmentedMp4Builder {
    options: FragmentedMp4BuilderOptions,
}

/// 構築済みで、ファイル内での配置待ちのフラグメント
#[derive(Debug)]
struct BuiltFragment {
    track_index: usize,
    moof_box: MoofBox,
    moof_bytes: Vec<u8>,
    mdat_bytes: Vec<u8>,
}

impl FragmentedMp4Builder {
    /// デフォルト設定の [`FragmentedMp4Builder`] インスタンスを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// オプションを指定して [`FragmentedMp4Builder`] インスタンスを作成する
    pub fn with_options(options: FragmentedMp4BuilderOptions) -> Self {
        Self { options }
    }

    /// Fragmented MP4 ファイルを構築して、そのバイト列を返す
    pub fn build(&self, movie: &Movie) -> Result<Vec<u8>, MuxError> {
        self.build_with_planner(movie, &mut SyncSampleIntersectPlanner::new())
    }

    /// フラグメントの境界を決めるプランナーを指定して、Fragmented MP4 ファイルを構築する
    pub fn build_with_planner(
        &self,
        movie: &Movie,
        planner: &mut dyn FragmentPlanner,
    ) -> Result<Vec<u8>, MuxError> {
        if movie.tracks.is_empty() {
            return Err(MuxError::EmptyMovie);
        }
        let track_ids = assign_track_ids(movie)?;
        let movie_timescale = movie.timescale().ok_or(MuxError::EmptyMovie)?;

        let plans = movie
            .tracks
            .iter()
            .enumerate()
            .map(|(i, _)| planner.plan(movie, i))
            .collect::<Result<Vec<_>, _>>()?;

        let ftyp_bytes = self.build_ftyp_box().encode_to_vec()?;
        let trex_boxes = build_trex_boxes(movie, &track_ids);
        let moov_bytes = self
            .build_moov_box(movie, &track_ids, movie_timescale, trex_boxes.clone())?
            .encode_to_vec()?;

        let fragments = self.build_fragments(movie, &track_ids, &plans)?;

        let mut file_bytes = Vec::new();
        file_bytes.extend_from_slice(&ftyp_bytes);
        file_bytes.extend_from_slice(&moov_bytes);
        let mut moof_offsets = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            moof_offsets.push(file_bytes.len() as u64);
            file_bytes.extend_from_slice(&fragment.moof_bytes);
            file_bytes.extend_from_slice(&fragment.mdat_bytes);
        }

        let mfra_box = build_mfra_box(&track_ids, &trex_boxes, &fragments, &moof_offsets)?;
        file_bytes.extend_from_slice(&mfra_box.encode_to_vec()?);
        Ok(file_bytes)
    }

    fn build_ftyp_box(&self) -> FtypBox {
        FtypBox {
            major_brand: self.options.major_brand,
            minor_version: self.options.minor_version,
            compatible_brands: self.options.compatible_brands.clone(),
        }
    }

    fn build_moov_box(
        &self,
        movie: &Movie,
        track_ids: &[u32],
        movie_timescale: NonZeroU32,
        trex_boxes: Vec<TrexBox>,
    ) -> Result<MoovBox, MuxError> {
        // フラグメント形式ではムービー全体の尺が事前には確定しないものとして扱い、
        // `mvhd` の尺は 0 にして実際の尺は `mehd` に格納する
        let mvhd_box = MvhdBox {
            creation_time: self.options.creation_time,
            modification_time: self.options.creation_time,
            timescale: movie_timescale,
            duration: 0,
            rate: MvhdBox::DEFAULT_RATE,
            volume: MvhdBox::DEFAULT_VOLUME,
            matrix: MvhdBox::DEFAULT_MATRIX,
            next_track_id: next_track_id(track_ids)?,
        };

        let mut fragment_duration = 0;
        let mut trak_boxes = Vec::with_capacity(movie.tracks.len());
        for (i, track) in movie.tracks.iter().enumerate() {
            fragment_duration =
                fragment_duration.max(track_duration_in_movie_timescale(track, movie_timescale)?);
            trak_boxes.push(build_trak_box(
                track,
                track_ids[i],
                movie_timescale,
                self.options.creation_time,
                build_empty_stbl_box(track),
            )?);
        }

        Ok(MoovBox {
            mvhd_box,
            trak_boxes,
            mvex_box: Some(MvexBox {
                mehd_box: Some(MehdBox { fragment_duration }),
                trex_boxes,
                unknown_boxes: Vec::new(),
            }),
            udta_box: None,
            unknown_boxes: Vec::new(),
        })
    }

    fn build_fragments(
        &self,
        movie: &Movie,
        track_ids: &[u32],
        plans: &[Vec<NonZeroU32>],
    ) -> Result<Vec<BuiltFragment>, MuxError> {
        let max_fragment_count = plans.iter().map(|p| p.len()).max().unwrap_or(0);
        let mut fragments = Vec::new();
        let mut sequence_number = 0;
        for cycle in 0..max_fragment_count {
            // 同一周回内ではサイズの小さなフラグメントから順に配置する
            let mut cycle_fragments = Vec::new();
            for (track_index, plan) in plans.iter().enumerate() {
                let track = &movie.tracks[track_index];
                let Some(&start) = plan.get(cycle) else {
                    continue;
                };
                let end = plan
                    .get(cycle + 1)
                    .map(|s| s.get())
                    .unwrap_or(track.sample_count() + 1);
                if end <= start.get() {
                    continue;
                }
                let start = (start.get() - 1) as usize;
                let end = (end - 1) as usize;
                let byte_size = track.samples[start..end]
                    .iter()
                    .map(|s| s.data.len() as u64)
                    .sum::<u64>();
                cycle_fragments.push((byte_size, track_index, start, end));
            }
            cycle_fragments.sort_by_key(|&(byte_size, _, _, _)| byte_size);

            for (_, track_index, start, end) in cycle_fragments {
                sequence_number += 1;
                fragments.push(build_fragment(
                    &movie.tracks[track_index],
                    track_index,
                    track_ids[track_index],
                    sequence_number,
                    start,
                    end,
                )?);
            }
        }
        Ok(fragments)
    }
}

/// `moov` 内の `trak` に格納する、エントリーを一切持たないサンプルテーブルを作る
///
/// フラグメント形式ではサンプルの情報は全て `moof` 側に置かれる
fn build_empty_stbl_box(track: &Track) -> StblBox {
    StblBox {
        stsd_box: StsdBox {
            entries: vec![track.sample_entry.clone()],
        },
        stts_box: SttsBox {
            entries: Vec::new(),
        },
        ctts_box: None,
        stsc_box: StscBox {
            entries: Vec::new(),
        },
        stsz_box: StszBox::Variable {
            entry_sizes: Vec::new(),
        },
        stco_or_co64_box: Either::A(StcoBox {
            chunk_offsets: Vec::new(),
        }),
        stss_box: None,
        sdtp_box: None,
        unknown_boxes: Vec::new(),
    }
}

fn build_trex_boxes(movie: &Movie, track_ids: &[u32]) -> Vec<TrexBox> {
    movie
        .tracks
        .iter()
        .zip(track_ids)
        .map(|(track, &track_id)| TrexBox {
            track_id,
            default_sample_description_index: 1,
            default_sample_duration: 0,
            default_sample_size: 0,
            default_sample_flags: if track.handler.is_audio() {
                SampleFlags::from_fields(0, 2, 2, 0, 0, false, 0)
            } else {
                SampleFlags::empty()
            },
        })
        .collect()
}

fn build_fragment(
    track: &Track,
    track_index: usize,
    track_id: u32,
    sequence_number: u32,
    start: usize,
    end: usize,
) -> Result<BuiltFragment, MuxError> {
    // `trun` に格納する省略可能なフィールドの有無はトラック単位で揃える必要がある
    let include_flags = track.samples.iter().any(|s| s.sample_flags.is_some())
        || !(track.handler.is_audio() && track.all_samples_are_sync());
    let include_composition_time_offsets = track.has_composition_time_offsets();

    let mut samples = Vec::with_capacity(end - start);
    let mut payload = Vec::new();
    for sample in &track.samples[start..end] {
        let size = u32::try_from(sample.data.len()).map_err(|_| MuxError::SampleTooLarge {
            size: sample.data.len() as u64,
        })?;
        let composition_time_offset = if include_composition_time_offsets {
            let offset = sample.composition_time_offset.unwrap_or(0);
            Some(
                i32::try_from(offset)
                    .map_err(|_| MuxError::CompositionOffsetTooLarge { offset })?,
            )
        } else {
            None
        };
        samples.push(TrunSample {
            duration: Some(sample.duration),
            size: Some(size),
            flags: include_flags.then(|| trun_sample_flags(sample.keyframe, sample.sample_flags)),
            composition_time_offset,
        });
        payload.extend_from_slice(&sample.data);
    }

    let tfhd_box = TfhdBox {
        track_id,
        base_data_offset: None,
        sample_description_index: None,
        default_sample_duration: None,
        default_sample_size: None,
        default_sample_flags: Some(SampleFlags::empty()),
        duration_is_empty: false,
        default_base_is_moof: false,
    };
    let trun_box = TrunBox {
        data_offset: Some(0),
        first_sample_flags: None,
        samples,
    };
    let mut moof_box = MoofBox {
        mfhd_box: MfhdBox { sequence_number },
        traf_boxes: vec![TrafBox {
            tfhd_box,
            tfdt_box: None,
            trun_boxes: vec![trun_box],
            saio_box: None,
            unknown_boxes: Vec::new(),
        }],
        unknown_boxes: Vec::new(),
    };

    // `data_offset` はファイル先頭ではなく moof の先頭を起点として、
    // 直後に続く mdat のペイロード先頭（moof のサイズ + mdat のヘッダーサイズ）を指す。
    // 値の確定前後で moof 自体のサイズは変わらない
    let moof_size = moof_box.encode_to_vec()?.len() as u64;
    let data_offset = moof_size + 8;
    moof_box.traf_boxes[0].trun_boxes[0].data_offset = Some(
        i32::try_from(data_offset).map_err(|_| MuxError::DataOffsetTooLarge { data_offset })?,
    );
    let moof_bytes = moof_box.encode_to_vec()?;

    let mdat_bytes = MdatBox {
        is_variable_size: false,
        payload,
    }
    .encode_to_vec()?;

    Ok(BuiltFragment {
        track_index,
        moof_box,
        moof_bytes,
        mdat_bytes,
    })
}

/// キーフレームかどうかの情報と `sdtp` 由来の依存情報を組み合わせてサンプルフラグを作る
fn trun_sample_flags(keyframe: bool, dependency_flags: Option<SampleFlags>) -> SampleFlags {
    let Some(base) = dependency_flags else {
        return sample_flags_from_keyframe(keyframe);
    };
    SampleFlags::from_fields(
        0,
        if keyframe { 2 } else { 1 },
        base.sample_is_depended_on(),
        base.sample_has_redundancy(),
        0,
        !keyframe,
        0,
    )
}

/// 構築済みのフラグメント群を走査して、同期サンプルの位置を列挙した `mfra` を作る
fn build_mfra_box(
    track_ids: &[u32],
    trex_boxes: &[TrexBox],
    fragments: &[BuiltFragment],
    moof_offsets: &[u64],
) -> Result<MfraBox, MuxError> {
    let mut tfra_boxes = Vec::with_capacity(track_ids.len());
    for (track_index, &track_id) in track_ids.iter().enumerate() {
        let mut entries = Vec::new();
        let mut time = 0;
        for (fragment, &moof_offset) in fragments.iter().zip(moof_offsets) {
            if fragment.track_index != track_index {
                continue;
            }
            for (traf, traf_number) in fragment.moof_box.traf_boxes.iter().zip(1..) {
                for (trun, trun_number) in traf.trun_boxes.iter().zip(1..) {
                    let mut trun_entries = Vec::new();
                    let mut all_sync = true;
                    for (i, sample) in trun.samples.iter().enumerate() {
                        let flags = if i == 0 && trun.first_sample_flags.is_some() {
                            trun.first_sample_flags
                        } else if sample.flags.is_some() {
                            sample.flags
                        } else {
                            Some(trex_boxes[track_index].default_sample_flags)
                        }
                        .ok_or(MuxError::MissingSampleFlags { track_id })?;

                        if flags.sample_is_difference_sample() {
                            all_sync = false;
                        } else {
                            trun_entries.push(TfraEntry {
                                time,
                                moof_offset,
                                traf_number,
                                trun_number,
                                sample_number: i as u32 + 1,
                            });
                        }
                        time += sample.duration.unwrap_or(0) as u64;
                    }
                    // 全サンプルが同期サンプルの場合には先頭だけを残す
                    if all_sync {
                        trun_entries.truncate(1);
                    }
                    entries.extend(trun_entries);
                }
            }
        }

        tfra_boxes.push(TfraBox {
            version: 1,
            track_id,
            length_size_of_traf_num: length_size(
                entries.iter().map(|e| e.traf_number).max().unwrap_or(0),
            ),
            length_size_of_trun_num: length_size(
                entries.iter().map(|e| e.trun_number).max().unwrap_or(0),
            ),
            length_size_of_sample_num: length_size(
                entries.iter().map(|e| e.sample_number).max().unwrap_or(0),
            ),
            entries,
        });
    }

    let mut mfra_box = MfraBox {
        tfra_boxes,
        mfro_box: MfroBox { parent_size: 0 },
    };
    // `parent_size` フィールドは固定幅なので、値を入れてもサイズは変わらない
    let parent_size = mfra_box.encode_to_vec()?.len() as u64;
    mfra_box.mfro_box.parent_size = u32::try_from(parent_size)
        .map_err(|_| MuxError::DataOffsetTooLarge {
            data_offset: parent_size,
        })?;
    Ok(mfra_box)
}

/// 値のエンコードに必要なバイト数から 1 を引いた値（`tfra` の各種フィールド幅）を返す
fn length_size(max_value: u32) -> u8 {
    match max_value {
        0..=0xFF => 0,
        0x100..=0xFFFF => 1,
        0x1_0000..=0xFF_FFFF => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::{HandlerType, Sample, TrackMetadata};
    use crate::boxes::{RootBox, SampleEntry, UnknownBox};
    use crate::fragment::FixedDurationPlanner;
    use crate::{BoxSize, BoxType, Decode, Mp4File};

    fn sample_entry(fourcc: &[u8; 4]) -> SampleEntry {
        SampleEntry::Unknown(UnknownBox {
            box_type: BoxType::Normal(*fourcc),
            box_size: BoxSize::U32(8),
            payload: Vec::new(),
        })
    }

    fn video_track(durations: &[u32], sync: &[u32], sample_size: usize) -> Track {
        Track {
            track_id: None,
            handler: HandlerType::Video,
            metadata: TrackMetadata::new(NonZeroU32::new(1000).expect("non zero")),
            sample_entry: sample_entry(b"tstv"),
            samples: durations
                .iter()
                .zip(1..)
                .map(|(&duration, i)| {
                    Sample::new(vec![i as u8; sample_size], duration, sync.contains(&i))
                })
                .collect(),
        }
    }

    fn audio_track(durations: &[u32], sample_size: usize) -> Track {
        Track {
            track_id: None,
            handler: HandlerType::Audio,
            metadata: TrackMetadata::new(NonZeroU32::new(1000).expect("non zero")),
            sample_entry: sample_entry(b"tsta"),
            samples: durations
                .iter()
                .map(|&duration| Sample::new(vec![0xAA; sample_size], duration, true))
                .collect(),
        }
    }

    fn decode_file(file_bytes: &[u8]) -> Mp4File<RootBox> {
        let (file, _) = Mp4File::<RootBox>::decode(file_bytes).expect("decode failure");
        file
    }

    #[test]
    fn video_track_is_split_at_sync_samples() {
        let movie = Movie {
            tracks: vec![video_track(&[1000; 4], &[1, 3], 10)],
        };
        let file_bytes = FragmentedMp4Builder::new()
            .build(&movie)
            .expect("build failure");
        let file = decode_file(&file_bytes);

        let moof_boxes = file
            .boxes
            .iter()
            .filter_map(|b| {
                if let RootBox::Moof(moof_box) = b {
                    Some(moof_box)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        assert_eq!(moof_boxes.len(), 2);
        for (i, moof_box) in moof_boxes.iter().enumerate() {
            assert_eq!(moof_box.mfhd_box.sequence_number, i as u32 + 1);
            assert_eq!(moof_box.traf_boxes.len(), 1);
            assert_eq!(moof_box.traf_boxes[0].trun_boxes[0].samples.len(), 2);
        }
    }

    #[test]
    fn moov_sample_tables_are_empty() {
        let movie = Movie {
            tracks: vec![video_track(&[1000; 4], &[1, 3], 10)],
        };
        let file_bytes = FragmentedMp4Builder::new()
            .build(&movie)
            .expect("build failure");
        let file = decode_file(&file_bytes);

        let RootBox::Moov(moov_box) = &file.boxes[0] else {
            panic!("missing moov box");
        };
        assert_eq!(moov_box.mvhd_box.duration, 0);

        let stbl_box = &moov_box.trak_boxes[0].mdia_box.minf_box.stbl_box;
        assert_eq!(stbl_box.stsd_box.entries.len(), 1);
        assert!(stbl_box.stts_box.entries.is_empty());
        assert!(stbl_box.stsc_box.entries.is_empty());
        assert!(matches!(&stbl_box.stsz_box, StszBox::Variable { entry_sizes } if entry_sizes.is_empty()));

        let mvex_box = moov_box.mvex_box.as_ref().expect("missing mvex box");
        assert_eq!(
            mvex_box.mehd_box.as_ref().expect("missing mehd box").fragment_duration,
            4000
        );
        assert_eq!(mvex_box.trex_boxes.len(), 1);
        assert_eq!(mvex_box.trex_boxes[0].default_sample_description_index, 1);
        assert_eq!(mvex_box.trex_boxes[0].default_sample_flags, SampleFlags::empty());
    }

    #[test]
    fn audio_trex_defaults_mark_samples_as_sync() {
        let movie = Movie {
            tracks: vec![audio_track(&[500; 4], 5)],
        };
        let file_bytes = FragmentedMp4Builder::new()
            .build_with_planner(&movie, &mut FixedDurationPlanner::new(2))
            .expect("build failure");
        let file = decode_file(&file_bytes);

        let RootBox::Moov(moov_box) = &file.boxes[0] else {
            panic!("missing moov box");
        };
        let trex_box = &moov_box.mvex_box.as_ref().expect("missing mvex box").trex_boxes[0];
        assert_eq!(trex_box.default_sample_flags.sample_depends_on(), 2);
        assert_eq!(trex_box.default_sample_flags.sample_is_depended_on(), 2);
        assert!(!trex_box.default_sample_flags.sample_is_difference_sample());
    }

    #[test]
    fn trun_data_offset_points_at_the_mdat_payload() {
        let movie = Movie {
            tracks: vec![video_track(&[1000; 4], &[1, 3], 10)],
        };
        let file_bytes = FragmentedMp4Builder::new()
            .build(&movie)
            .expect("build failure");
        let file = decode_file(&file_bytes);

        let mut moof_offset = file.ftyp_box.encode_to_vec().expect("encode failure").len();
        let mut checked = 0;
        for root_box in &file.boxes {
            let encoded = match root_box {
                RootBox::Moov(b) => b.encode_to_vec().expect("encode failure"),
                RootBox::Moof(b) => {
                    let trun_box = &b.traf_boxes[0].trun_boxes[0];
                    let data_offset = trun_box.data_offset.expect("missing data offset") as usize;
                    let first_sample_size =
                        trun_box.samples[0].size.expect("missing sample size") as usize;

                    // オフセットの参照先が、このフラグメントの先頭サンプルのデータと一致する
                    let expected = &movie.tracks[0].samples[checked * 2].data;
                    let start = moof_offset + data_offset;
                    assert_eq!(&file_bytes[start..start + first_sample_size], expected);

                    let encoded = b.encode_to_vec().expect("encode failure");
                    assert_eq!(data_offset, encoded.len() + 8);
                    checked += 1;
                    encoded
                }
                RootBox::Mdat(b) => b.encode_to_vec().expect("encode failure"),
                RootBox::Mfra(b) => b.encode_to_vec().expect("encode failure"),
                b => panic!("unexpected box: {b:?}"),
            };
            moof_offset += encoded.len();
        }
        assert_eq!(checked, 2);
    }

    #[test]
    fn smaller_fragments_come_first_within_a_cycle() {
        // 映像フラグメント（20 バイト）よりも音声フラグメント（12 バイト）の方が小さいので、
        // 各周回では音声側が先に配置される
        let movie = Movie {
            tracks: vec![
                video_track(&[1000; 6], &[1, 3], 10),
                audio_track(&[500; 12], 3),
            ],
        };
        let file_bytes = FragmentedMp4Builder::new()
            .build_with_planner(&movie, &mut FixedDurationPlanner::new(2))
            .expect("build failure");
        let file = decode_file(&file_bytes);

        let track_order = file
            .boxes
            .iter()
            .filter_map(|b| {
                if let RootBox::Moof(moof_box) = b {
                    Some(moof_box.traf_boxes[0].tfhd_box.track_id)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        assert_eq!(track_order, [2, 1, 2, 1]);
    }

    #[test]
    fn tfra_entries_point_at_sync_samples() {
        let movie = Movie {
            tracks: vec![video_track(&[1000; 4], &[1, 3], 10)],
        };
        let file_bytes = FragmentedMp4Builder::new()
            .build(&movie)
            .expect("build failure");
        let file = decode_file(&file_bytes);

        // moof ボックスのファイル内オフセットを求める
        let mut moof_offsets = Vec::new();
        let mut offset = file.ftyp_box.encode_to_vec().expect("encode failure").len();
        for root_box in &file.boxes {
            let encoded = match root_box {
                RootBox::Moov(b) => b.encode_to_vec(),
                RootBox::Moof(b) => {
                    moof_offsets.push(offset as u64);
                    b.encode_to_vec()
                }
                RootBox::Mdat(b) => b.encode_to_vec(),
                RootBox::Mfra(b) => b.encode_to_vec(),
                b => panic!("unexpected box: {b:?}"),
            };
            offset += encoded.expect("encode failure").len();
        }

        let mfra_box = file
            .boxes
            .iter()
            .find_map(|b| {
                if let RootBox::Mfra(mfra_box) = b {
                    Some(mfra_box)
                } else {
                    None
                }
            })
            .expect("missing mfra box");
        assert_eq!(mfra_box.tfra_boxes.len(), 1);

        let tfra_box = &mfra_box.tfra_boxes[0];
        assert_eq!(tfra_box.version, 1);
        assert_eq!(tfra_box.track_id, 1);
        assert_eq!(tfra_box.entries.len(), 2);

        // 各フラグメントの先頭サンプル（同期サンプル）を指している
        assert_eq!(tfra_box.entries[0].time, 0);
        assert_eq!(tfra_box.entries[0].moof_offset, moof_offsets[0]);
        assert_eq!(tfra_box.entries[0].sample_number, 1);
        assert_eq!(tfra_box.entries[1].time, 2000);
        assert_eq!(tfra_box.entries[1].moof_offset, moof_offsets[1]);
        assert_eq!(tfra_box.entries[1].sample_number, 1);

        // mfro がエンコード済みの mfra 全体のサイズを指している
        let mfra_bytes = mfra_box.encode_to_vec().expect("encode failure");
        assert_eq!(mfra_box.mfro_box.parent_size as usize, mfra_bytes.len());
    }

    #[test]
    fn all_sync_audio_fragments_keep_only_the_first_tfra_entry() {
        let movie = Movie {
            tracks: vec![audio_track(&[500; 12], 3)],
        };
        let file_bytes = FragmentedMp4Builder::new()
            .build_with_planner(&movie, &mut FixedDurationPlanner::new(2))
            .expect("build failure");
        let file = decode_file(&file_bytes);

        let mfra_box = file
            .boxes
            .iter()
            .find_map(|b| {
                if let RootBox::Mfra(mfra_box) = b {
                    Some(mfra_box)
                } else {
                    None
                }
            })
            .expect("missing mfra box");
        let tfra_box = &mfra_box.tfra_boxes[0];

        let moof_count = file
            .boxes
            .iter()
            .filter(|b| matches!(b, RootBox::Moof(_)))
            .count();
        assert_eq!(tfra_box.entries.len(), moof_count);
        assert!(tfra_box.entries.iter().all(|e| e.sample_number == 1));
    }
}
