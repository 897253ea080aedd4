use shiguredo_mp4kit::{
    Decode, Encode, Result,
    boxes::{Dec3Box, StszBox, TfhdBox, UdtaBox},
};

#[test]
fn decode_tfhd_with_all_optional_fields() -> Result<()> {
    // flags=0x00003B: base_data_offset, sample_description_index,
    // default_sample_duration, default_sample_size, default_sample_flags
    #[rustfmt::skip]
    let input_bytes = [
        0, 0, 0, 40, b't', b'f', b'h', b'd',
        0, 0, 0, 0x3B,
        0, 0, 0, 7, // track_id
        0, 0, 0, 0, 0, 0, 0x10, 0, // base_data_offset
        0, 0, 0, 2, // sample_description_index
        0, 0, 0x03, 0xE8, // default_sample_duration
        0, 0, 0x02, 0x00, // default_sample_size
        0x01, 0x01, 0, 0, // default_sample_flags
    ];
    let (tfhd_box, size) = TfhdBox::decode(&input_bytes)?;
    assert_eq!(size, input_bytes.len());

    assert_eq!(tfhd_box.track_id, 7);
    assert_eq!(tfhd_box.base_data_offset, Some(0x1000));
    assert_eq!(tfhd_box.sample_description_index, Some(2));
    assert_eq!(tfhd_box.default_sample_duration, Some(1000));
    assert_eq!(tfhd_box.default_sample_size, Some(512));
    assert_eq!(
        tfhd_box.default_sample_flags.map(|f| f.sample_depends_on()),
        Some(1)
    );
    assert!(!tfhd_box.duration_is_empty);
    assert!(!tfhd_box.default_base_is_moof);

    // 存在フラグはフィールドの有無から再計算されるので、バイト列は完全に一致する
    assert_eq!(tfhd_box.encode_to_vec()?, input_bytes);
    Ok(())
}

#[test]
fn decode_dec3_with_dependent_substream() -> Result<()> {
    #[rustfmt::skip]
    let input_bytes = [
        0, 0, 0, 14, b'd', b'e', b'c', b'3',
        0x0E, 0x00, // data_rate=448, num_ind_sub=1
        // fscod=0, bsid=16, bsmod=0, acmod=7, lfeon=1, num_dep_sub=1, chan_loc=2
        0x20, 0x0F, 0x02, 0x02,
    ];
    let (dec3_box, size) = Dec3Box::decode(&input_bytes)?;
    assert_eq!(size, input_bytes.len());

    assert_eq!(dec3_box.data_rate.get(), 448);
    assert_eq!(dec3_box.substreams.len(), 1);
    assert_eq!(dec3_box.substreams[0].acmod.get(), 7);
    assert_eq!(dec3_box.substreams[0].lfeon.get(), 1);
    assert_eq!(dec3_box.substreams[0].num_dep_sub.get(), 1);
    assert_eq!(dec3_box.substreams[0].chan_loc.get(), 2);

    assert_eq!(dec3_box.encode_to_vec()?, input_bytes);
    Ok(())
}

#[test]
fn decode_container_with_trailing_slack_bytes() -> Result<()> {
    // コンテナーの末尾にボックスヘッダー未満の端数バイトが残っていても、
    // パース済みの子ボックス群は失われない
    #[rustfmt::skip]
    let input_bytes = [
        0, 0, 0, 19, b'u', b'd', b't', b'a',
        0, 0, 0, 8, b'f', b'r', b'e', b'e',
        0xDE, 0xAD, 0xBE, // 端数バイト
    ];
    let (udta_box, size) = UdtaBox::decode(&input_bytes)?;
    assert_eq!(size, input_bytes.len());
    assert!(udta_box.meta_box.is_none());
    assert_eq!(udta_box.unknown_boxes.len(), 1);
    Ok(())
}

#[test]
fn decode_variable_size_stsz() -> Result<()> {
    // sample_size=0 なのでサンプルごとのサイズ列が続く
    #[rustfmt::skip]
    let input_bytes = [
        0, 0, 0, 32, b's', b't', b's', b'z',
        0, 0, 0, 0,
        0, 0, 0, 0, // sample_size
        0, 0, 0, 3, // sample_count
        0, 0, 0, 10,
        0, 0, 0, 20,
        0, 0, 0, 30,
    ];
    let (stsz_box, size) = StszBox::decode(&input_bytes)?;
    assert_eq!(size, input_bytes.len());
    assert!(matches!(&stsz_box, StszBox::Variable { entry_sizes } if *entry_sizes == [10, 20, 30]));

    assert_eq!(stsz_box.encode_to_vec()?, input_bytes);
    Ok(())
}
