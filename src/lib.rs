//! MP4 ファイルの解析と構築（プログレッシブ / フラグメント形式）を行うためのライブラリ
#![warn(missing_docs)]

mod auxiliary;
mod basic_types;
mod boxes_fmp4;
mod boxes_moov_tree;
mod boxes_sample_entry;
mod codec;

pub mod authoring;
pub mod boxes;
pub mod descriptors;
pub mod fragment;
pub mod manifest;
pub mod mux;

pub use basic_types::{
    BaseBox, BoxHeader, BoxSize, BoxType, Either, FixedPointNumber, FullBox, FullBoxFlags,
    FullBoxHeader, Mp4File, Mp4FileTime, Uint, Utf8String,
};
pub use codec::{Decode, Encode, Error, ErrorKind, Result};

// [NOTE]
// Windows 環境では aux.rs というファイル名が予約語で、リポジトリに含まれていると git clone に失敗するため、
// ファイル名自体は auxiliary.rs にして lib.rs の中で aux モジュール以下に再エクスポートしている。
pub mod aux {
    //! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール

    pub use crate::auxiliary::SampleTableAccessor;
    pub use crate::codec::{BitReader, BitWriter, decode_variable_uint, encode_variable_uint};
}
