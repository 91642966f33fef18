use std::{num::NonZeroU32, time::Duration};

use crate::{
    aux::{ChunkInfo, SampleTableAccessor},
    boxes::{MoovBox, TrakBox},
};

use super::CropError;

/// 基準トラックの終端サンプル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSample {
    /// `moov` 内での基準トラックの位置
    pub track_index: usize,

    /// 基準トラックの ID
    pub track_id: u32,

    /// 出力に残る最後のサンプルの番号
    pub sample_number: NonZeroU32,

    /// 最後のサンプルの終端時刻（基準トラックのタイムスケール単位）
    ///
    /// 他の全トラックの終端はこの時刻を基準に決まる
    pub end_time: u64,

    /// 基準トラックのタイムスケール
    pub timescale: NonZeroU32,

    /// 目標尺が基準トラックの尺以上で、基準トラックがそのまま残るかどうか
    ///
    /// この場合は他のトラックも切り詰められない
    pub reaches_track_end: bool,
}

/// トラックごとの切り詰め位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackBoundary {
    /// `moov` 内でのトラックの位置
    pub track_index: usize,

    /// トラック ID
    pub track_id: u32,

    /// トラックのタイムスケール
    pub timescale: NonZeroU32,

    /// 出力に残るサンプルの数（= 最後に残るサンプルの番号）
    pub sample_count: u32,

    /// 切り詰め前のサンプルの数
    pub original_sample_count: u32,

    /// 最後に残るサンプルの終端時刻（トラックのタイムスケール単位）
    pub end_time: u64,

    /// 最後に残るサンプルを含むチャンク（サンプルが一つも残らない場合は [`None`]）
    pub terminal_chunk: Option<ChunkInfo>,
}

impl TrackBoundary {
    /// 最後に残るサンプルの番号を返す
    pub fn terminal_sample(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.sample_count)
    }

    /// このトラックからサンプルが削られるかどうか
    pub fn is_trimmed(&self) -> bool {
        self.sample_count < self.original_sample_count
    }

    /// 出力に残るチャンクの数
    pub fn chunk_count(&self) -> u32 {
        self.terminal_chunk.map_or(0, |c| c.chunk_number.get())
    }
}

pub(crate) fn accessor(trak_box: &TrakBox) -> Result<SampleTableAccessor<'_>, CropError> {
    SampleTableAccessor::new(trak_box.stbl_box()).map_err(|source| {
        CropError::InvalidSampleTable {
            track_id: trak_box.track_id(),
            source,
        }
    })
}

// 映像トラックを優先し、なければ音声トラックを使う
fn reference_track(moov_box: &MoovBox) -> Result<(usize, &TrakBox), CropError> {
    let traks = || moov_box.trak_boxes.iter().enumerate();
    traks()
        .find(|(_, t)| t.is_video())
        .or_else(|| traks().find(|(_, t)| t.is_audio()))
        .ok_or(CropError::NoReferenceTrack)
}

pub(crate) fn rescale(value: u64, to: u32, from: NonZeroU32) -> u64 {
    let scaled = value as u128 * to as u128 / from.get() as u128;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// 目標尺から基準トラックの終端サンプルを求める
///
/// 目標時刻をカバーするサンプル `N` を求め、同期サンプルの一覧がある場合には `N` 以降の最初の同期サンプルの直前を終端とする。
/// 目標尺がトラックの尺以上の場合は、トラック末尾を切れ目とみなして最後のサンプルを終端にする。
pub fn resolve_terminal_sample(
    moov_box: &MoovBox,
    duration: Duration,
) -> Result<TerminalSample, CropError> {
    let (track_index, trak_box) = reference_track(moov_box)?;
    let track_id = trak_box.track_id();
    let timescale = trak_box.timescale();
    let accessor = accessor(trak_box)?;
    let last_sample = accessor
        .last_sample()
        .ok_or(CropError::EmptyOutput { track_id })?;

    let ticks = duration.as_millis() * timescale.get() as u128 / 1000;
    let ticks = u64::try_from(ticks).unwrap_or(u64::MAX);

    let reaches_track_end = ticks >= accessor.total_duration();
    let sample_number = if reaches_track_end {
        last_sample
    } else {
        let covering = accessor
            .first_sample_ending_at_or_after(ticks)
            .unwrap_or(last_sample);
        if accessor.has_sync_sample_table() {
            let sync = accessor
                .first_sync_sample_at_or_after(covering)
                .ok_or_else(|| {
                    let last_sync = trak_box
                        .stbl_box()
                        .stss_box
                        .as_ref()
                        .and_then(|b| b.sample_numbers.last().copied())
                        .and_then(|n| accessor.decode_time(n))
                        .unwrap_or(0);
                    CropError::NoSyncSample {
                        track_id,
                        sample_number: covering.get(),
                        requested_ms: duration.as_millis() as u64,
                        available_ms: rescale(last_sync, 1000, timescale),
                    }
                })?;
            NonZeroU32::new(sync.get() - 1).ok_or(CropError::EmptyOutput { track_id })?
        } else {
            covering
        }
    };

    let end_time = accessor
        .sample_end_time(sample_number)
        .ok_or_else(|| CropError::Internal {
            reason: format!("sample {sample_number} of track {track_id} has no end time"),
        })?;

    tracing::debug!(
        track_id,
        sample_number = sample_number.get(),
        end_time,
        timescale = timescale.get(),
        reaches_track_end,
        "resolved terminal sample of reference track"
    );
    Ok(TerminalSample {
        track_index,
        track_id,
        sample_number,
        end_time,
        timescale,
        reaches_track_end,
    })
}

/// 基準トラックの終端時刻を全トラックに適用して、トラックごとの切り詰め位置を求める
///
/// 各トラックでは、終端時刻以降に始まる最初のサンプルの直前までが残る。
/// 終端時刻より前にトラックのサンプルが尽きる場合は、最後のサンプルまでが残る。
/// 基準トラックが末尾まで残る場合は、基準トラックより長いトラックも含めて全サンプルが残る。
pub fn compute_track_boundaries(
    moov_box: &MoovBox,
    terminal: &TerminalSample,
) -> Result<Vec<TrackBoundary>, CropError> {
    let mut boundaries = Vec::with_capacity(moov_box.trak_boxes.len());
    for (track_index, trak_box) in moov_box.trak_boxes.iter().enumerate() {
        let track_id = trak_box.track_id();
        let timescale = trak_box.timescale();
        let accessor = accessor(trak_box)?;
        let original_sample_count = accessor.sample_count();

        let sample_count = if track_index == terminal.track_index {
            terminal.sample_number.get()
        } else if terminal.reaches_track_end {
            original_sample_count
        } else {
            let local_end = rescale(terminal.end_time, timescale.get(), terminal.timescale);
            accessor
                .first_sample_starting_at_or_after(local_end)
                .map_or(original_sample_count, |n| n.get() - 1)
        };

        let (end_time, terminal_chunk) = match NonZeroU32::new(sample_count) {
            None => (0, None),
            Some(n) => {
                let end_time = accessor.sample_end_time(n);
                let chunk = accessor.chunk_for_sample(n).copied();
                let (Some(end_time), Some(chunk)) = (end_time, chunk) else {
                    return Err(CropError::Internal {
                        reason: format!("sample {n} of track {track_id} is not addressable"),
                    });
                };
                (end_time, Some(chunk))
            }
        };

        tracing::debug!(
            track_id,
            sample_count,
            original_sample_count,
            end_time,
            terminal_chunk = terminal_chunk.map(|c| c.chunk_number.get()),
            "computed track boundary"
        );
        boundaries.push(TrackBoundary {
            track_index,
            track_id,
            timescale,
            sample_count,
            original_sample_count,
            end_time,
            terminal_chunk,
        });
    }
    Ok(boundaries)
}
