//! MP4 ファイル構築の Property-Based Testing

use std::num::NonZeroU32;

use proptest::prelude::*;
use shiguredo_mp4kit::{
    FixedPointNumber, Uint,
    authoring::{HandlerType, Movie, Sample, Track, TrackMetadata},
    boxes::{AudioSampleEntryFields, EsdsBox, Mp4aBox, SampleEntry},
    descriptors::{DecoderConfigDescriptor, DecoderSpecificInfo, EsDescriptor, SlConfigDescriptor},
    fragment::{FixedDurationPlanner, FragmentPlanner},
    mux::ProgressiveMp4Builder,
};

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
                    up_stream: DecoderConfigDescriptor::UP_STREAM_FALSE,
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
    })
}

fn audio_track(samples: Vec<Sample>) -> Track {
    Track {
        track_id: None,
        handler: HandlerType::Audio,
        metadata: TrackMetadata::new(NonZeroU32::new(48000).expect("timescale must be non-zero")),
        sample_entry: aac_sample_entry(),
        samples,
    }
}

/// (データサイズ, 尺) のペアを生成する Strategy
fn arb_sample_info() -> impl Strategy<Value = (usize, u32)> {
    (1usize..64, 1u32..=48000)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    // 構築したファイルを読み戻すと元のサンプル列が得られる
    #[test]
    fn progressive_mux_roundtrip(sample_infos in prop::collection::vec(arb_sample_info(), 1..64)) {
        let samples = sample_infos
            .iter()
            .enumerate()
            .map(|(i, &(size, duration))| Sample::new(vec![i as u8; size], duration, true))
            .collect();
        let movie = Movie {
            tracks: vec![audio_track(samples)],
        };

        let file_bytes = ProgressiveMp4Builder::new().build(&movie).unwrap();
        let decoded = Movie::from_file_bytes(&file_bytes).unwrap();

        prop_assert_eq!(decoded.tracks.len(), 1);
        prop_assert_eq!(decoded.tracks[0].samples.len(), movie.tracks[0].samples.len());
        for (original, decoded) in movie.tracks[0].samples.iter().zip(&decoded.tracks[0].samples) {
            prop_assert_eq!(&original.data, &decoded.data);
            prop_assert_eq!(original.duration, decoded.duration);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // プランナーの出力は 1 から始まる狭義単調増加列になる
    #[test]
    fn fixed_duration_planner_output_is_strictly_increasing(
        durations in prop::collection::vec(1u32..=96000, 1..64),
        fragment_duration_seconds in 1u32..=5,
    ) {
        let samples = durations
            .iter()
            .map(|&duration| Sample::new(vec![0; 4], duration, true))
            .collect();
        let movie = Movie {
            tracks: vec![audio_track(samples)],
        };

        let mut planner = FixedDurationPlanner::new(fragment_duration_seconds);
        let starts = planner.plan(&movie, 0).unwrap();

        prop_assert!(!starts.is_empty());
        prop_assert_eq!(starts[0].get(), 1);
        for pair in starts.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        for start in &starts {
            prop_assert!(start.get() as usize <= durations.len() + 1);
        }
    }
}
