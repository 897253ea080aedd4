use std::num::NonZeroU32;

use shiguredo_mp4kit::{
    Decode, FixedPointNumber, Mp4File, Result, Uint,
    authoring::{HandlerType, Movie, Sample, Track, TrackMetadata},
    boxes::{
        AudioSampleEntryFields, Avc1Box, AvccBox, EsdsBox, Mp4aBox, RootBox, SampleEntry, StszBox,
        VisualSampleEntryFields,
    },
    descriptors::{DecoderConfigDescriptor, DecoderSpecificInfo, EsDescriptor, SlConfigDescriptor},
    manifest::SmoothStreamingManifestWriter,
    mux::{FragmentedMp4Builder, ProgressiveMp4Builder},
};

fn avc1_sample_entry() -> SampleEntry {
    SampleEntry::Avc1(Avc1Box {
        visual: VisualSampleEntryFields {
            data_reference_index: VisualSampleEntryFields::DEFAULT_DATA_REFERENCE_INDEX,
            width: 640,
            height: 480,
            horizresolution: VisualSampleEntryFields::DEFAULT_HORIZRESOLUTION,
            vertresolution: VisualSampleEntryFields::DEFAULT_VERTRESOLUTION,
            frame_count: VisualSampleEntryFields::DEFAULT_FRAME_COUNT,
            compressorname: VisualSampleEntryFields::NULL_COMPRESSORNAME,
            depth: VisualSampleEntryFields::DEFAULT_DEPTH,
        },
        avcc_box: AvccBox {
            avc_profile_indication: 66,
            profile_compatibility: 0,
            avc_level_indication: 30,
            length_size_minus_one: Uint::new(3),
            sps_list: vec![vec![0x67, 0x42, 0x00, 0x1E]],
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
                    up_stream: DecoderConfigDescriptor::UP_STREAM_FALSE,
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
        metadata: TrackMetadata::new(NonZeroU32::new(1000).expect("timescale must be non-zero")),
        sample_entry: avc1_sample_entry(),
        samples: (1..=4u8)
            .map(|i| Sample::new(vec![i; 10], 1000, i % 2 == 1))
            .collect(),
    }
}

fn audio_track() -> Track {
    Track {
        track_id: None,
        handler: HandlerType::Audio,
        metadata: TrackMetadata::new(NonZeroU32::new(1000).expect("timescale must be non-zero")),
        sample_entry: aac_sample_entry(),
        samples: (1..=8u8).map(|i| Sample::new(vec![i; 4], 500, true)).collect(),
    }
}

#[test]
fn progressive_file_round_trips_through_the_sample_table() -> Result<()> {
    let mut track = audio_track();
    track.samples = vec![
        Sample::new(vec![1; 10], 1000, true),
        Sample::new(vec![2; 20], 1000, true),
        Sample::new(vec![3; 30], 1000, true),
    ];
    let movie = Movie { tracks: vec![track] };

    let file_bytes = ProgressiveMp4Builder::new()
        .build(&movie)
        .expect("build failure");

    // サンプルサイズが不揃いなので stsz はサイズ列を列挙する形式になる
    let (file, _) = Mp4File::<RootBox>::decode(&file_bytes)?;
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
        .expect("missing moov box");
    let stsz_box = &moov_box.trak_boxes[0].mdia_box.minf_box.stbl_box.stsz_box;
    assert!(matches!(stsz_box, StszBox::Variable { entry_sizes } if *entry_sizes == [10, 20, 30]));

    // 構築したファイルを読み戻すと元のサンプル列が得られる
    let decoded = Movie::from_file_bytes(&file_bytes)?;
    assert_eq!(decoded.tracks.len(), 1);
    for (original, decoded) in movie.tracks[0].samples.iter().zip(&decoded.tracks[0].samples) {
        assert_eq!(original.data, decoded.data);
        assert_eq!(original.duration, decoded.duration);
        assert_eq!(original.keyframe, decoded.keyframe);
    }
    Ok(())
}

#[test]
fn fragmented_file_aligns_audio_fragments_with_video_sync_samples() -> Result<()> {
    let movie = Movie {
        tracks: vec![video_track(), audio_track()],
    };

    let file_bytes = FragmentedMp4Builder::new()
        .build(&movie)
        .expect("build failure");
    let (file, _) = Mp4File::<RootBox>::decode(&file_bytes)?;

    let moof_boxes = file
        .boxes
        .iter()
        .filter_map(|b| {
            if let RootBox::Moof(b) = b {
                Some(b)
            } else {
                None
            }
        })
        .collect::<Vec<_>>();

    // 映像は同期サンプル 1, 3 で 2 つに分割され、音声も同じ時刻（サンプル 1, 5）で分割される。
    // 各周回ではバイトサイズの小さい音声フラグメント（16 バイト < 20 バイト）が先に並ぶ
    assert_eq!(moof_boxes.len(), 4);
    let layout = moof_boxes
        .iter()
        .map(|moof_box| {
            let traf_box = &moof_box.traf_boxes[0];
            (
                traf_box.tfhd_box.track_id,
                traf_box.trun_boxes[0].samples.len(),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(layout, [(2, 4), (1, 2), (2, 4), (1, 2)]);

    for (i, moof_box) in moof_boxes.iter().enumerate() {
        assert_eq!(moof_box.mfhd_box.sequence_number, i as u32 + 1);
    }
    Ok(())
}

#[test]
fn manifest_matches_the_fragmented_layout() {
    let movie = Movie {
        tracks: vec![video_track(), audio_track()],
    };

    let xml = SmoothStreamingManifestWriter::new()
        .write_manifest(&movie)
        .expect("write failure");

    // 映像・音声とも同じ時刻で 2 つのフラグメントに分割される
    assert!(xml.contains(r#"<StreamIndex Type="video" TimeScale="1000" Chunks="2""#));
    assert!(xml.contains(r#"<StreamIndex Type="audio" TimeScale="1000" Chunks="2""#));
    assert!(xml.contains(r#"FourCC="AVC1""#));
    assert!(xml.contains(r#"FourCC="AACL""#));
    assert!(xml.contains(r#"<c n="0" d="2000"/>"#));
    assert!(xml.contains(r#"<c n="1" d="2000"/>"#));
}
