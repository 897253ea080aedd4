//! フラグメント関連ボックスの Property-Based Testing

use proptest::prelude::*;
use shiguredo_mp4kit::{
    Decode, Encode,
    boxes::{SampleFlags, TfhdBox, TfraBox, TfraEntry, TrunBox, TrunSample},
};

/// SampleFlags の値を生成する Strategy
fn arb_sample_flags() -> impl Strategy<Value = SampleFlags> {
    any::<u32>().prop_map(SampleFlags::new)
}

/// オプションフィールドの有無をランダムに切り替えた TfhdBox を生成する Strategy
fn arb_tfhd_box() -> impl Strategy<Value = TfhdBox> {
    (
        any::<u32>(),
        prop::option::of(any::<u64>()),
        prop::option::of(any::<u32>()),
        prop::option::of(any::<u32>()),
        prop::option::of(any::<u32>()),
        prop::option::of(arb_sample_flags()),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(
                track_id,
                base_data_offset,
                sample_description_index,
                default_sample_duration,
                default_sample_size,
                default_sample_flags,
                duration_is_empty,
                default_base_is_moof,
            )| TfhdBox {
                track_id,
                base_data_offset,
                sample_description_index,
                default_sample_duration,
                default_sample_size,
                default_sample_flags,
                duration_is_empty,
                default_base_is_moof,
            },
        )
}

/// TrunBox を生成する Strategy
///
/// 各サンプルのフィールドの有無はフラグで一括制御されるため、
/// 全サンプルで同じ有無の組み合わせを使う
fn arb_trun_box() -> impl Strategy<Value = TrunBox> {
    (
        prop::option::of(any::<i32>()),
        prop::option::of(arb_sample_flags()),
        any::<[bool; 4]>(),
        prop::collection::vec(
            (any::<u32>(), any::<u32>(), arb_sample_flags(), any::<i32>()),
            0..16,
        ),
    )
        .prop_map(|(data_offset, first_sample_flags, presence, values)| TrunBox {
            data_offset,
            first_sample_flags,
            samples: values
                .into_iter()
                .map(|(duration, size, flags, composition_time_offset)| TrunSample {
                    duration: presence[0].then_some(duration),
                    size: presence[1].then_some(size),
                    flags: presence[2].then_some(flags),
                    composition_time_offset: presence[3].then_some(composition_time_offset),
                })
                .collect(),
        })
}

/// TfraBox を生成する Strategy
///
/// version=0 の場合は time と moof_offset を 32 ビットに収め、
/// 各番号フィールドは length_size_of_* で指定された幅に収まるようにマスクする
fn arb_tfra_box() -> impl Strategy<Value = TfraBox> {
    (
        0u8..=1,
        any::<u32>(),
        0u8..=3,
        0u8..=3,
        0u8..=3,
        prop::collection::vec(
            (any::<u64>(), any::<u64>(), any::<u32>(), any::<u32>(), any::<u32>()),
            0..8,
        ),
    )
        .prop_map(
            |(version, track_id, ls_traf, ls_trun, ls_sample, values)| TfraBox {
                version,
                track_id,
                length_size_of_traf_num: ls_traf,
                length_size_of_trun_num: ls_trun,
                length_size_of_sample_num: ls_sample,
                entries: values
                    .into_iter()
                    .map(|(time, moof_offset, traf_number, trun_number, sample_number)| {
                        TfraEntry {
                            time: if version == 0 { time & 0xFFFF_FFFF } else { time },
                            moof_offset: if version == 0 {
                                moof_offset & 0xFFFF_FFFF
                            } else {
                                moof_offset
                            },
                            traf_number: mask_to_length(traf_number, ls_traf),
                            trun_number: mask_to_length(trun_number, ls_trun),
                            sample_number: mask_to_length(sample_number, ls_sample),
                        }
                    })
                    .collect(),
            },
        )
}

/// 値を (length_size + 1) バイトに収まるようにマスクする
fn mask_to_length(value: u32, length_size: u8) -> u32 {
    match length_size {
        0 => value & 0xFF,
        1 => value & 0xFFFF,
        2 => value & 0xFF_FFFF,
        _ => value,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // TfhdBox の Roundtrip (オプションフィールドの有無はフラグに反映される)
    #[test]
    fn tfhd_box_roundtrip(tfhd_box in arb_tfhd_box()) {
        let encoded = tfhd_box.encode_to_vec().unwrap();
        let (decoded, size) = TfhdBox::decode(&encoded).unwrap();
        prop_assert_eq!(size, encoded.len());
        prop_assert_eq!(decoded, tfhd_box);
    }

    // TrunBox の Roundtrip
    #[test]
    fn trun_box_roundtrip(trun_box in arb_trun_box()) {
        let encoded = trun_box.encode_to_vec().unwrap();
        let (decoded, size) = TrunBox::decode(&encoded).unwrap();
        prop_assert_eq!(size, encoded.len());
        prop_assert_eq!(decoded, trun_box);
    }

    // TfraBox の Roundtrip (バージョンと番号フィールドの幅が保持される)
    #[test]
    fn tfra_box_roundtrip(tfra_box in arb_tfra_box()) {
        let encoded = tfra_box.encode_to_vec().unwrap();
        let (decoded, size) = TfraBox::decode(&encoded).unwrap();
        prop_assert_eq!(size, encoded.len());
        prop_assert_eq!(decoded, tfra_box);
    }
}
