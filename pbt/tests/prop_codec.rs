//! ビット単位の読み書きと可変幅整数の Property-Based Testing

use proptest::prelude::*;
use shiguredo_mp4kit::aux::{BitReader, BitWriter, decode_variable_uint, encode_variable_uint};

/// (値, ビット数) のペアを生成する Strategy
///
/// 値は指定ビット数に収まるようにマスクされる
fn arb_bit_field() -> impl Strategy<Value = (u32, usize)> {
    (any::<u32>(), 1usize..=32).prop_map(|(value, bits)| {
        let masked = if bits == 32 {
            value
        } else {
            value & ((1u32 << bits) - 1)
        };
        (masked, bits)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // BitWriter で書いたビット列を BitReader で読み戻すと元の値が得られる
    #[test]
    fn bit_writer_reader_agree(fields in prop::collection::vec(arb_bit_field(), 1..32)) {
        let mut writer = BitWriter::new();
        for &(value, bits) in &fields {
            writer.write_bits(value, bits).unwrap();
        }
        let encoded = writer.finish();

        let total_bits: usize = fields.iter().map(|&(_, bits)| bits).sum();
        prop_assert_eq!(encoded.len(), total_bits.div_ceil(8));

        let mut reader = BitReader::new(&encoded);
        for &(value, bits) in &fields {
            prop_assert_eq!(reader.read_bits(bits).unwrap(), value);
        }

        // 末尾の余りビットはゼロ埋めされている
        let padding = reader.remaining_bits();
        prop_assert!(padding < 8);
        if padding > 0 {
            prop_assert_eq!(reader.read_bits(padding).unwrap(), 0);
        }
    }

    // ビット数に収まらない値の書き込みは拒否される
    #[test]
    fn bit_writer_rejects_oversized_values(bits in 1usize..32, extra in any::<u32>()) {
        let value = (1u32 << bits) | (extra & ((1u32 << bits) - 1));
        let mut writer = BitWriter::new();
        prop_assert!(writer.write_bits(value, bits).is_err());
    }

    // 33 ビット以上の一括読み書きは拒否される
    #[test]
    fn bit_cursor_rejects_too_wide_access(bits in 33usize..=64) {
        let mut writer = BitWriter::new();
        prop_assert!(writer.write_bits(0, bits).is_err());

        let buf = [0u8; 16];
        let mut reader = BitReader::new(&buf);
        prop_assert!(reader.read_bits(bits).is_err());
    }

    // 可変幅整数の Roundtrip
    #[test]
    fn variable_uint_roundtrip(value in any::<u64>(), field_size in 1usize..=8) {
        let value = if field_size == 8 {
            value
        } else {
            value & ((1u64 << (field_size * 8)) - 1)
        };

        let mut buf = [0u8; 8];
        let written = encode_variable_uint(value, field_size, &mut buf).unwrap();
        prop_assert_eq!(written, field_size);

        let mut offset = 0;
        let decoded = decode_variable_uint(&buf, &mut offset, field_size).unwrap();
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(offset, field_size);
    }

    // 1 ～ 8 バイトの範囲外のフィールド幅は拒否される
    #[test]
    fn variable_uint_rejects_out_of_range_sizes(field_size in prop_oneof![Just(0usize), 9usize..=64]) {
        let mut buf = [0u8; 64];
        prop_assert!(encode_variable_uint(0, field_size, &mut buf).is_err());
        prop_assert!(decode_variable_uint(&buf, &mut 0, field_size).is_err());
    }

    // フィールド幅に収まらない値のエンコードは拒否される
    #[test]
    fn variable_uint_rejects_overflow(value in any::<u64>(), field_size in 1usize..=7) {
        let value = value | (1u64 << (field_size * 8));
        let mut buf = [0u8; 8];
        prop_assert!(encode_variable_uint(value, field_size, &mut buf).is_err());
    }
}
