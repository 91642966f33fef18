//! プログレッシブ形式の MP4 ファイルを指定した尺に切り詰めるためのモジュール
//!
//! 処理は以下の順番で適用される値を返すパスの連なりとして構成されている:
//! 1. [`resolve_terminal_sample()`]: 基準トラックの終端サンプル（同期サンプルの直前）を決める
//! 2. [`compute_track_boundaries()`]: 全トラックについて、基準トラックの終端時刻に対応する終端サンプルとチャンクを決める
//! 3. [`plan_byte_ranges()`]: 元ファイルでのオフセット順にチャンクをマージして、コピーするバイト範囲と新しいチャンクオフセットを求める
//! 4. [`truncate_sample_table()`]: 各トラックのサンプルテーブルを切り詰める
//! 5. [`rewrite_durations()`] と [`rewrite_chunk_offsets()`]: 尺とチャンクオフセットを書き換える
//! 6. [`emit()`]: `mdat` 以外のボックスを書き出し、計画したバイト範囲をストリーミングでコピーする
//!
//! 通常は [`Mp4Cropper`] もしくは [`crop_file()`] を通して利用する。
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, Write},
    num::NonZeroU32,
    path::Path,
    time::Duration,
};

use crate::{Mp4File, aux::SampleTableAccessorError, boxes::MdatBox};

mod emit;
mod plan;
mod rewrite;
mod terminal;
#[cfg(test)]
mod test_util;
mod truncate;

pub use emit::emit;
pub use plan::{ByteRange, BytePlan, plan_byte_ranges};
pub use rewrite::{media_data_start, rewrite_chunk_offsets, rewrite_durations};
pub use terminal::{TerminalSample, TrackBoundary, compute_track_boundaries, resolve_terminal_sample};
pub use truncate::{SampleTable, truncate_sample_table};

/// 切り詰め処理で発生するエラー
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum CropError {
    /// このエンジンが扱えない入力（フラグメント化された MP4 など）
    #[error("unsupported input: {reason}")]
    Unsupported { reason: String },

    /// 映像トラックも音声トラックも存在しない
    #[error("no video or audio track found")]
    NoReferenceTrack,

    /// 指定時刻以降に同期サンプルが存在しない
    #[error(
        "no sync frame at or after the target time in track {track_id} \
         (sample {sample_number}, requested {requested_ms} ms, last sync frame at {available_ms} ms)"
    )]
    NoSyncSample {
        track_id: u32,
        sample_number: u32,
        requested_ms: u64,
        available_ms: u64,
    },

    /// 切り詰めの結果、基準トラックにサンプルが一つも残らない
    #[error("the crop would leave no samples in reference track {track_id}")]
    EmptyOutput { track_id: u32 },

    /// サンプルテーブルの内容に不整合がある
    #[error("invalid sample table in track {track_id}")]
    InvalidSampleTable {
        track_id: u32,
        #[source]
        source: SampleTableAccessorError,
    },

    /// 出力の `mdat` が 32 ビットのサイズフィールドに収まらない
    #[error("media data of {payload_size} bytes does not fit in a 32-bit 'mdat' box")]
    MdatTooLarge { payload_size: u64 },

    /// 書き換え後のチャンクオフセットが `stco` ボックスの 32 ビットに収まらない
    #[error("chunk offset {offset} of track {track_id} does not fit in a 32-bit 'stco' box")]
    ChunkOffsetOverflow { track_id: u32, offset: u64 },

    /// 入力ファイルに `mdat` ボックスが存在しないか、チャンクが `mdat` の外を指している
    #[error("media data not found: {reason}")]
    MissingMdat { reason: String },

    /// 実装上の不変条件が破られた
    #[error("internal error: {reason}")]
    Internal { reason: String },

    /// ファイルの読み書きに失敗した
    #[error("failed to {action}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// ボックスのエンコードまたはデコードに失敗した
    #[error(transparent)]
    Codec(#[from] crate::Error),
}

impl CropError {
    pub(crate) fn io(action: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { action, source }
    }
}

/// [`Mp4Cropper`] に指定するオプション
#[derive(Debug, Clone)]
pub struct CropOptions {
    /// 出力ファイルの目標尺
    ///
    /// 実際の尺は、基準トラックの同期サンプルの直前で切られるため、この値とは一致しないことがある
    pub duration: Duration,

    /// [`crop_file()`] で入出力に使うバッファのバイト数
    ///
    /// デフォルト値は 1 MB
    pub copy_buffer_size: usize,
}

impl CropOptions {
    /// [`CropOptions::copy_buffer_size`] のデフォルト値
    pub const DEFAULT_COPY_BUFFER_SIZE: usize = 1024 * 1024;

    /// 目標尺を指定してオプションを作成する
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            duration: Duration::ZERO,
            copy_buffer_size: Self::DEFAULT_COPY_BUFFER_SIZE,
        }
    }
}

/// 切り詰め処理の計画
///
/// [`Mp4Cropper::plan()`] で作成され、ファイルを変更する前に失敗しうる判定は全てこの時点で済んでいる
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropPlan {
    /// 基準トラックの終端サンプル
    pub terminal: TerminalSample,

    /// トラックごとの終端情報（`trak` ボックスの順番と一致する）
    pub boundaries: Vec<TrackBoundary>,

    /// コピーするバイト範囲と新しいチャンクオフセット
    pub byte_plan: BytePlan,
}

/// 切り詰め処理の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropReport {
    /// 基準トラックの ID
    pub reference_track_id: u32,

    /// 基準トラックの終端サンプルの番号
    pub terminal_sample: NonZeroU32,

    /// 出力ファイルの尺（基準トラックの終端時刻）
    pub duration: Duration,

    /// トラックごとの終端情報
    pub tracks: Vec<TrackBoundary>,

    /// 出力した `mdat` ペイロードのバイト数
    pub media_data_size: u64,

    /// 入力からコピーしたバイト範囲の数
    pub range_count: usize,
}

/// MP4 ファイルの切り詰めを行うための構造体
#[derive(Debug, Clone, Default)]
pub struct Mp4Cropper {
    options: CropOptions,
}

impl Mp4Cropper {
    /// 指定のオプションで [`Mp4Cropper`] インスタンスを生成する
    pub fn new(options: CropOptions) -> Self {
        Self { options }
    }

    /// オプションを返す
    pub fn options(&self) -> &CropOptions {
        &self.options
    }

    /// ファイルを変更せずに、切り詰め処理の計画を立てる
    pub fn plan(&self, file: &Mp4File) -> Result<CropPlan, CropError> {
        let moov_box = file.moov_box().ok_or_else(|| CropError::Unsupported {
            reason: "missing 'moov' box".to_owned(),
        })?;

        let terminal = resolve_terminal_sample(moov_box, self.options.duration)?;
        let boundaries = compute_track_boundaries(moov_box, &terminal)?;
        let byte_plan = plan_byte_ranges(moov_box, &boundaries)?;

        let mdat_boxes = file.mdat_boxes().collect::<Vec<_>>();
        byte_plan.check_within(&mdat_boxes)?;
        if MdatBox::compact_header(byte_plan.total_size).is_none() {
            return Err(CropError::MdatTooLarge {
                payload_size: byte_plan.total_size,
            });
        }

        Ok(CropPlan {
            terminal,
            boundaries,
            byte_plan,
        })
    }

    /// 計画に従ってメタデータを書き換える
    ///
    /// サンプルテーブルの切り詰め、尺の更新、チャンクオフセットの書き換えをこの順番で行う。
    /// チャンクオフセットは `mdat` より前のボックスのサイズが確定してから計算する必要があるため最後になる。
    pub fn apply(&self, file: &mut Mp4File, plan: &CropPlan) -> Result<(), CropError> {
        let moov_box = file.moov_box_mut().ok_or_else(|| CropError::Unsupported {
            reason: "missing 'moov' box".to_owned(),
        })?;
        for (trak_box, boundary) in moov_box.trak_boxes.iter_mut().zip(&plan.boundaries) {
            truncate_sample_table(trak_box.stbl_box_mut(), boundary);
        }
        rewrite_durations(moov_box, &plan.terminal, &plan.boundaries);

        let payload_start = media_data_start(file)?;
        let moov_box = file.moov_box_mut().ok_or_else(|| CropError::Internal {
            reason: "'moov' box disappeared while rewriting".to_owned(),
        })?;
        rewrite_chunk_offsets(moov_box, &plan.byte_plan, payload_start)?;
        Ok(())
    }

    /// `file` を切り詰めて `writer` へ書き出す
    ///
    /// `reader` は `file` の読み込み元と同じ入力である必要がある
    pub fn crop<R, W>(
        &self,
        file: &mut Mp4File,
        reader: R,
        writer: W,
    ) -> Result<CropReport, CropError>
    where
        R: Read + Seek,
        W: Write,
    {
        let plan = self.plan(file)?;
        self.apply(file, &plan)?;
        let media_data_size = emit(file, &plan.byte_plan, reader, writer)?;
        Ok(self.report(plan, media_data_size))
    }

    fn report(&self, plan: CropPlan, media_data_size: u64) -> CropReport {
        let terminal = &plan.terminal;
        let duration_ms =
            terminal.end_time as u128 * 1000 / terminal.timescale.get() as u128;
        let report = CropReport {
            reference_track_id: terminal.track_id,
            terminal_sample: terminal.sample_number,
            duration: Duration::from_millis(u64::try_from(duration_ms).unwrap_or(u64::MAX)),
            range_count: plan.byte_plan.ranges.len(),
            tracks: plan.boundaries,
            media_data_size,
        };
        tracing::info!(
            reference_track_id = report.reference_track_id,
            terminal_sample = report.terminal_sample.get(),
            duration_ms = report.duration.as_millis() as u64,
            media_data_size = report.media_data_size,
            ranges = report.range_count,
            "cropped MP4"
        );
        report
    }
}

/// `input` の MP4 ファイルを切り詰めて `output` に書き出す
///
/// 出力ファイルは計画が成功した後にはじめて作成されるので、入力の検証や計画の段階で失敗した場合には何も書き込まれない。
/// 書き出しの途中で失敗した場合には、不完全な出力ファイルが残ることがある。
pub fn crop_file<P, Q>(input: P, output: Q, options: CropOptions) -> Result<CropReport, CropError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let cropper = Mp4Cropper::new(options);
    let buffer_size = cropper.options.copy_buffer_size.max(1);

    let input_file = File::open(input.as_ref()).map_err(CropError::io("open input file"))?;
    let mut reader = BufReader::with_capacity(buffer_size, input_file);
    let mut file = Mp4File::read_from(&mut reader).map_err(|e| match e.kind {
        crate::ErrorKind::Unsupported => CropError::Unsupported { reason: e.reason },
        _ => CropError::Codec(e),
    })?;

    let plan = cropper.plan(&file)?;
    cropper.apply(&mut file, &plan)?;

    let output_file = File::create(output.as_ref()).map_err(CropError::io("create output file"))?;
    let mut writer = BufWriter::with_capacity(buffer_size, output_file);
    let media_data_size = emit(&file, &plan.byte_plan, &mut reader, &mut writer)?;
    writer.flush().map_err(CropError::io("flush output file"))?;

    Ok(cropper.report(plan, media_data_size))
}
