//! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール
use std::num::NonZeroU32;

use crate::boxes::{StblBox, StszBox};

/// [`SampleTableAccessor`] の構築時に検出されるサンプルテーブルの不整合
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[allow(missing_docs)]
pub enum SampleTableAccessorError {
    /// テーブルごとのサンプル数が一致しない
    #[error("sample count mismatch in '{table}' box: expected {expected}, got {actual}")]
    SampleCountMismatch {
        table: &'static str,
        expected: u64,
        actual: u64,
    },

    /// stsc ボックスの最初のエントリーがチャンク 1 から始まっていない
    #[error("the first 'stsc' entry must start at chunk 1, but starts at chunk {first_chunk}")]
    FirstChunkNotOne { first_chunk: u32 },

    /// stsc ボックスのエントリーのチャンク番号が昇順になっていない
    #[error("'stsc' entries are not in ascending chunk order (chunk {previous} followed by {next})")]
    NonMonotonicChunkIndex { previous: u32, next: u32 },

    /// stsc ボックスが存在しないチャンクを参照している
    #[error("'stsc' entry refers to chunk {chunk_number}, but only {chunk_count} chunks exist")]
    ChunkIndexOutOfRange { chunk_number: u32, chunk_count: u32 },

    /// チャンクが存在するのに stsc ボックスが空
    #[error("'stsc' box is empty while {chunk_count} chunks exist")]
    MissingSampleToChunk { chunk_count: u32 },

    /// stss ボックスのサンプル番号が昇順でないか、範囲外を指している
    #[error("invalid sync sample number {sample_number} (sample count {sample_count})")]
    InvalidSyncSample {
        sample_number: u32,
        sample_count: u32,
    },
}

/// [ISO/IEC 14496-12] のチャンク一つ分の情報
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkInfo {
    /// チャンク番号 (1 始まり)
    pub chunk_number: NonZeroU32,

    /// チャンク内の最初のサンプルの番号
    pub first_sample: NonZeroU32,

    /// チャンク内のサンプル数
    pub sample_count: u32,

    /// 入力ファイル内でのチャンクの絶対位置
    pub offset: u64,

    /// チャンクが参照するサンプルエントリーのインデックス
    pub sample_description_index: NonZeroU32,
}

impl ChunkInfo {
    /// チャンク内の最後のサンプルの番号を返す（空のチャンクの場合は [`None`]）
    pub fn last_sample(&self) -> Option<NonZeroU32> {
        let last = self.first_sample.get() as u64 + self.sample_count as u64 - 1;
        u32::try_from(last)
            .ok()
            .and_then(NonZeroU32::new)
            .filter(|_| self.sample_count > 0)
    }

    /// 指定されたサンプルがこのチャンクに含まれるかどうかを判定する
    pub fn contains(&self, sample_number: NonZeroU32) -> bool {
        let n = sample_number.get() as u64;
        let first = self.first_sample.get() as u64;
        first <= n && n < first + self.sample_count as u64
    }
}

// stts ボックスのエントリーを、開始サンプル番号と開始時刻つきで展開したもの
#[derive(Debug, Clone, Copy)]
struct TimeRun {
    first_sample: u32,
    start_time: u64,
    sample_count: u32,
    sample_delta: u32,
}

impl TimeRun {
    fn end_time(&self) -> u64 {
        self.start_time + self.sample_count as u64 * self.sample_delta as u64
    }

    fn last_start_time(&self) -> u64 {
        self.start_time + (self.sample_count as u64 - 1) * self.sample_delta as u64
    }
}

/// [`StblBox`] をラップして、その中の情報を簡単かつ効率的に取り出せるようにするための構造体
///
/// 構築時にテーブル間の整合性が検証されるので、以降の参照系メソッドは範囲内のサンプルに対しては失敗しない
#[derive(Debug)]
pub struct SampleTableAccessor<'a> {
    stbl_box: &'a StblBox,
    sample_count: u32,
    time_runs: Vec<TimeRun>,
    chunks: Vec<ChunkInfo>,
}

impl<'a> SampleTableAccessor<'a> {
    /// 引数で渡された [`StblBox`] 用の [`SampleTableAccessor`] インスタンスを生成する
    pub fn new(stbl_box: &'a StblBox) -> Result<Self, SampleTableAccessorError> {
        let mut time_runs = Vec::with_capacity(stbl_box.stts_box.entries.len());
        let mut sample_count = 0u64;
        let mut time = 0u64;
        for entry in &stbl_box.stts_box.entries {
            if entry.sample_count == 0 {
                continue;
            }
            let first_sample = u32::try_from(sample_count + 1).map_err(|_| {
                SampleTableAccessorError::SampleCountMismatch {
                    table: "stts",
                    expected: u32::MAX as u64,
                    actual: sample_count + 1,
                }
            })?;
            time_runs.push(TimeRun {
                first_sample,
                start_time: time,
                sample_count: entry.sample_count,
                sample_delta: entry.sample_delta,
            });
            sample_count += entry.sample_count as u64;
            time = time.saturating_add(entry.sample_count as u64 * entry.sample_delta as u64);
        }

        let stsz_count = stbl_box.stsz_box.sample_count() as u64;
        if stsz_count != sample_count {
            return Err(SampleTableAccessorError::SampleCountMismatch {
                table: "stsz",
                expected: sample_count,
                actual: stsz_count,
            });
        }
        let sample_count = stsz_count as u32;

        if let Some(ctts_box) = &stbl_box.ctts_box
            && ctts_box.sample_count() != sample_count as u64
        {
            return Err(SampleTableAccessorError::SampleCountMismatch {
                table: "ctts",
                expected: sample_count as u64,
                actual: ctts_box.sample_count(),
            });
        }

        if let Some(sdtp_box) = &stbl_box.sdtp_box
            && sdtp_box.entries.len() as u64 != sample_count as u64
        {
            return Err(SampleTableAccessorError::SampleCountMismatch {
                table: "sdtp",
                expected: sample_count as u64,
                actual: sdtp_box.entries.len() as u64,
            });
        }

        if let Some(stss_box) = &stbl_box.stss_box {
            let mut previous = 0;
            for n in &stss_box.sample_numbers {
                if n.get() <= previous || n.get() > sample_count {
                    return Err(SampleTableAccessorError::InvalidSyncSample {
                        sample_number: n.get(),
                        sample_count,
                    });
                }
                previous = n.get();
            }
        }

        let chunks = build_chunk_table(stbl_box)?;
        let chunk_sample_count = chunks.iter().map(|c| c.sample_count as u64).sum::<u64>();
        if chunk_sample_count != sample_count as u64 {
            return Err(SampleTableAccessorError::SampleCountMismatch {
                table: "stsc",
                expected: sample_count as u64,
                actual: chunk_sample_count,
            });
        }

        Ok(Self {
            stbl_box,
            sample_count,
            time_runs,
            chunks,
        })
    }

    /// ラップしている [`StblBox`] への参照を返す
    pub fn stbl_box(&self) -> &'a StblBox {
        self.stbl_box
    }

    /// トラック内のサンプルの数を取得する
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// トラック内のチャンクの数を取得する
    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// トラックの全サンプルの尺の合計を返す
    pub fn total_duration(&self) -> u64 {
        self.time_runs.last().map_or(0, |r| r.end_time())
    }

    /// 最後のサンプルの番号を返す（サンプルが存在しない場合は [`None`]）
    pub fn last_sample(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.sample_count)
    }

    fn time_run(&self, sample_number: NonZeroU32) -> Option<&TimeRun> {
        if self.sample_count < sample_number.get() {
            return None;
        }
        let i = self
            .time_runs
            .partition_point(|r| r.first_sample <= sample_number.get());
        self.time_runs.get(i.checked_sub(1)?)
    }

    /// 指定されたサンプルの尺を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_duration(&self, sample_number: NonZeroU32) -> Option<u32> {
        self.time_run(sample_number).map(|r| r.sample_delta)
    }

    /// 指定されたサンプルのデコード時刻（トラックのタイムスケール単位）を取得する
    pub fn decode_time(&self, sample_number: NonZeroU32) -> Option<u64> {
        let run = self.time_run(sample_number)?;
        let k = (sample_number.get() - run.first_sample) as u64;
        Some(run.start_time + k * run.sample_delta as u64)
    }

    /// 指定されたサンプルの終端時刻（デコード時刻 + 尺）を取得する
    pub fn sample_end_time(&self, sample_number: NonZeroU32) -> Option<u64> {
        let run = self.time_run(sample_number)?;
        let k = (sample_number.get() - run.first_sample) as u64 + 1;
        Some(run.start_time + k * run.sample_delta as u64)
    }

    /// 終端時刻が `time` 以上となる最初のサンプルの番号を返す
    ///
    /// トラックの尺が `time` に届かない場合には [`None`] が返される
    pub fn first_sample_ending_at_or_after(&self, time: u64) -> Option<NonZeroU32> {
        let i = self.time_runs.partition_point(|r| r.end_time() < time);
        let run = self.time_runs.get(i)?;
        let k = if run.sample_delta == 0 {
            0
        } else {
            let delta = run.sample_delta as u64;
            (time.saturating_sub(run.start_time)).div_ceil(delta).saturating_sub(1)
        };
        NonZeroU32::new(run.first_sample + k as u32)
    }

    /// デコード時刻が `time` 以上となる最初のサンプルの番号を返す
    ///
    /// 全てのサンプルが `time` より前に始まる場合には [`None`] が返される
    pub fn first_sample_starting_at_or_after(&self, time: u64) -> Option<NonZeroU32> {
        let i = self.time_runs.partition_point(|r| r.last_start_time() < time);
        let run = self.time_runs.get(i)?;
        let k = if run.sample_delta == 0 {
            0
        } else {
            let delta = run.sample_delta as u64;
            time.saturating_sub(run.start_time).div_ceil(delta)
        };
        NonZeroU32::new(run.first_sample + k as u32)
    }

    /// 指定されたサンプルのデータサイズ（バイト数）を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_size(&self, sample_number: NonZeroU32) -> Option<u32> {
        if self.sample_count < sample_number.get() {
            return None;
        }

        let i = sample_number.get() as usize - 1;
        match &self.stbl_box.stsz_box {
            StszBox::Fixed { sample_size, .. } => Some(sample_size.get()),
            StszBox::Variable { entry_sizes } => entry_sizes.get(i).copied(),
        }
    }

    /// `first_sample` から始まる `count` 個のサンプルの合計バイト数を返す
    pub fn samples_byte_size(&self, first_sample: NonZeroU32, count: u32) -> Option<u64> {
        let start = first_sample.get() as usize - 1;
        let end = start.checked_add(count as usize)?;
        if end > self.sample_count as usize {
            return None;
        }
        match &self.stbl_box.stsz_box {
            StszBox::Fixed { sample_size, .. } => Some(sample_size.get() as u64 * count as u64),
            StszBox::Variable { entry_sizes } => Some(
                entry_sizes[start..end]
                    .iter()
                    .map(|&size| size as u64)
                    .sum(),
            ),
        }
    }

    /// サンプルテーブルが同期サンプルの一覧 (stss) を持っているかどうか
    pub fn has_sync_sample_table(&self) -> bool {
        self.stbl_box.stss_box.is_some()
    }

    /// 指定されたサンプルが同期サンプルかどうかを判定する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn is_sync_sample(&self, sample_number: NonZeroU32) -> Option<bool> {
        if self.sample_count < sample_number.get() {
            return None;
        }

        let Some(stss_box) = &self.stbl_box.stss_box else {
            // stss ボックスが存在しない場合は全てが同期サンプル扱い
            return Some(true);
        };

        Some(stss_box.sample_numbers.binary_search(&sample_number).is_ok())
    }

    /// `sample_number` 以降で最初に現れる同期サンプルの番号を返す
    pub fn first_sync_sample_at_or_after(
        &self,
        sample_number: NonZeroU32,
    ) -> Option<NonZeroU32> {
        if self.sample_count < sample_number.get() {
            return None;
        }
        let Some(stss_box) = &self.stbl_box.stss_box else {
            return Some(sample_number);
        };
        let i = stss_box
            .sample_numbers
            .partition_point(|n| *n < sample_number);
        stss_box.sample_numbers.get(i).copied()
    }

    /// 指定されたチャンクのファイル内でのバイト位置を返す
    ///
    /// 存在しないチャンクが指定された場合には [`None`] が返される
    pub fn chunk_offset(&self, chunk_number: NonZeroU32) -> Option<u64> {
        self.chunk(chunk_number).map(|c| c.offset)
    }

    /// 指定されたチャンクの情報を返す
    pub fn chunk(&self, chunk_number: NonZeroU32) -> Option<&ChunkInfo> {
        self.chunks.get(chunk_number.get() as usize - 1)
    }

    /// 全チャンクの情報を返す
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// 指定されたサンプルを含むチャンクの情報を返す
    pub fn chunk_for_sample(&self, sample_number: NonZeroU32) -> Option<&ChunkInfo> {
        if self.sample_count < sample_number.get() {
            return None;
        }
        // 空のチャンクは first_sample が次のチャンクと重なるので、サンプルを持つ最後の候補を選ぶ
        let i = self
            .chunks
            .partition_point(|c| c.first_sample <= sample_number);
        self.chunks[..i].iter().rev().find(|c| c.contains(sample_number))
    }
}

fn build_chunk_table(stbl_box: &StblBox) -> Result<Vec<ChunkInfo>, SampleTableAccessorError> {
    let offsets = stbl_box.chunk_offsets();
    let chunk_count = offsets.len() as u32;
    let entries = &stbl_box.stsc_box.entries;

    if entries.is_empty() {
        if chunk_count > 0 {
            return Err(SampleTableAccessorError::MissingSampleToChunk { chunk_count });
        }
        return Ok(Vec::new());
    }

    let first_chunk = entries[0].first_chunk.get();
    if first_chunk != 1 {
        return Err(SampleTableAccessorError::FirstChunkNotOne { first_chunk });
    }

    let mut chunks = Vec::with_capacity(offsets.len());
    let mut next_sample = 1u64;
    for (i, entry) in entries.iter().enumerate() {
        let first = entry.first_chunk.get();
        let end = match entries.get(i + 1) {
            Some(next) if next.first_chunk.get() <= first => {
                return Err(SampleTableAccessorError::NonMonotonicChunkIndex {
                    previous: first,
                    next: next.first_chunk.get(),
                });
            }
            Some(next) => next.first_chunk.get(),
            None => chunk_count.saturating_add(1),
        };
        if first > chunk_count || end > chunk_count.saturating_add(1) {
            return Err(SampleTableAccessorError::ChunkIndexOutOfRange {
                chunk_number: first.max(end - 1),
                chunk_count,
            });
        }

        for chunk_number in first..end {
            let first_sample = u32::try_from(next_sample)
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or(SampleTableAccessorError::SampleCountMismatch {
                    table: "stsc",
                    expected: u32::MAX as u64,
                    actual: next_sample,
                })?;
            chunks.push(ChunkInfo {
                chunk_number: NonZeroU32::MIN.saturating_add(chunk_number - 1),
                first_sample,
                sample_count: entry.sample_per_chunk,
                offset: offsets[chunk_number as usize - 1],
                sample_description_index: entry.sample_description_index,
            });
            next_sample += entry.sample_per_chunk as u64;
        }
    }
    Ok(chunks)
}
