//! プログレッシブ形式の MP4 ファイルを、先頭から指定した尺までに切り詰めるためのライブラリ
//!
//! サンプルデータの再エンコードは行わず、サンプルテーブルとチャンクオフセットを書き換えた上で、
//! 残すべき `mdat` 内のバイト範囲だけを入力ファイルからストリーミングでコピーする。
#![warn(missing_docs)]

mod auxiliary;
mod basic_types;
pub mod boxes;
mod boxes_moov_tree;
mod codec;
pub mod crop;
pub mod file;

pub use basic_types::{
    BaseBox, BoxHeader, BoxSize, BoxType, Either, FixedPointNumber, FullBox, FullBoxFlags,
    FullBoxHeader, Mp4FileTime, Uint,
};
pub use codec::{Decode, Encode, Error, ErrorKind, Result};
pub use file::Mp4File;

// [NOTE]
// Windows 環境では aux.rs というファイル名が予約語で、リポジトリに含まれていると git clone に失敗するため、
// ファイル名自体は auxiliary.rs にして lib.rs の中で aux モジュール以下に再エクスポートしている。
pub mod aux {
    //! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール

    pub use crate::auxiliary::{ChunkInfo, SampleTableAccessor, SampleTableAccessorError};
}
