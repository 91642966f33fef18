use std::{cmp::Reverse, collections::BinaryHeap, num::NonZeroU32};

use crate::{aux::SampleTableAccessor, boxes::{MdatBox, MoovBox}};

use super::{CropError, TrackBoundary, terminal::accessor};

/// 入力ファイル内のバイト範囲（両端を含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// 先頭バイトの位置
    pub start: u64,

    /// 末尾バイトの位置（この位置のバイトも範囲に含まれる）
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// 範囲のバイト数を返す
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// 出力 `mdat` の組み立て計画
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePlan {
    /// 最初に出力されるチャンクの元ファイル内でのオフセット
    ///
    /// [`BytePlan::chunk_offsets`] はこの位置を起点に詰めて配置した値になっている
    pub base_offset: u64,

    /// 入力からコピーするバイト範囲（元ファイルでの出現順、隣接する範囲は結合済み）
    pub ranges: Vec<ByteRange>,

    /// トラックごとの新しいチャンクオフセット（`trak` ボックスの順番と一致する）
    pub chunk_offsets: Vec<Vec<u64>>,

    /// 出力 `mdat` のペイロードのバイト数
    pub total_size: u64,
}

impl BytePlan {
    fn push_range(&mut self, start: u64, size: u64) {
        if size == 0 {
            return;
        }
        let end = start + size - 1;
        match self.ranges.last_mut() {
            Some(last) if last.end.checked_add(1) == Some(start) => last.end = end,
            _ => self.ranges.push(ByteRange { start, end }),
        }
    }

    /// 全てのバイト範囲が、いずれかの `mdat` ボックスのペイロード内に収まっているかを確認する
    pub fn check_within(&self, mdat_boxes: &[&MdatBox]) -> Result<(), CropError> {
        if mdat_boxes.is_empty() {
            return Err(CropError::MissingMdat {
                reason: "no 'mdat' box in input".to_owned(),
            });
        }
        for range in &self.ranges {
            if !mdat_boxes.iter().any(|m| m.contains(range.start, range.len())) {
                return Err(CropError::MissingMdat {
                    reason: format!(
                        "byte range {}..={} is outside of every 'mdat' payload",
                        range.start, range.end
                    ),
                });
            }
        }
        Ok(())
    }
}

// マージ対象となるトラック内の残すチャンクの列
struct TrackCursor<'a> {
    accessor: SampleTableAccessor<'a>,
    boundary: &'a TrackBoundary,
    next_chunk: u32,
}

impl TrackCursor<'_> {
    fn peek_offset(&self) -> Option<u64> {
        if self.next_chunk > self.boundary.chunk_count() {
            return None;
        }
        self.accessor
            .chunk_offset(NonZeroU32::new(self.next_chunk)?)
    }

    // 次のチャンクを取り出して、その元オフセットと残すバイト数を返す
    fn advance(&mut self) -> Result<(u64, u64), CropError> {
        let chunk = NonZeroU32::new(self.next_chunk)
            .and_then(|n| self.accessor.chunk(n))
            .copied()
            .ok_or_else(|| CropError::Internal {
                reason: format!(
                    "chunk {} of track {} does not exist",
                    self.next_chunk, self.boundary.track_id
                ),
            })?;
        self.next_chunk += 1;

        let retained = if self.next_chunk > self.boundary.chunk_count() {
            // 終端チャンクは途中のサンプルまでしか残らないことがある
            self.boundary.sample_count + 1 - chunk.first_sample.get()
        } else {
            chunk.sample_count
        };
        let size = if retained == 0 {
            0
        } else {
            self.accessor
                .samples_byte_size(chunk.first_sample, retained)
                .ok_or_else(|| CropError::Internal {
                    reason: format!(
                        "samples of chunk {} in track {} are out of range",
                        chunk.chunk_number, self.boundary.track_id
                    ),
                })?
        };
        Ok((chunk.offset, size))
    }
}

/// 全トラックの残すチャンクを元ファイルでのオフセット順にマージして、コピーするバイト範囲と新しいチャンクオフセットを求める
///
/// オフセットが同じチャンクが複数のトラックにある場合には、`trak` ボックスの順番が先のトラックを優先する。
/// 新しいオフセットは、最初のチャンクの元オフセットを起点にして、各チャンクの残すバイト数ずつ進めた値となる。
pub fn plan_byte_ranges(
    moov_box: &MoovBox,
    boundaries: &[TrackBoundary],
) -> Result<BytePlan, CropError> {
    let mut cursors = moov_box
        .trak_boxes
        .iter()
        .zip(boundaries)
        .map(|(trak_box, boundary)| {
            Ok(TrackCursor {
                accessor: accessor(trak_box)?,
                boundary,
                next_chunk: 1,
            })
        })
        .collect::<Result<Vec<_>, CropError>>()?;

    let mut queue = BinaryHeap::new();
    for (i, cursor) in cursors.iter().enumerate() {
        if let Some(offset) = cursor.peek_offset() {
            queue.push(Reverse((offset, i)));
        }
    }

    let mut plan = BytePlan {
        base_offset: 0,
        ranges: Vec::new(),
        chunk_offsets: boundaries
            .iter()
            .map(|b| Vec::with_capacity(b.chunk_count() as usize))
            .collect(),
        total_size: 0,
    };
    let mut output_cursor = None;
    let mut retained_total = 0u64;
    while let Some(Reverse((_, i))) = queue.pop() {
        let cursor = &mut cursors[i];
        let (offset, size) = cursor.advance()?;

        let new_offset = match output_cursor {
            Some(v) => v,
            None => {
                plan.base_offset = offset;
                offset
            }
        };
        plan.chunk_offsets[i].push(new_offset);
        output_cursor = Some(new_offset + size);
        retained_total += size;
        plan.push_range(offset, size);

        if let Some(next) = cursor.peek_offset() {
            queue.push(Reverse((next, i)));
        }
    }

    let Some(end_offset) = output_cursor else {
        return Err(CropError::EmptyOutput {
            track_id: boundaries.first().map_or(0, |b| b.track_id),
        });
    };
    plan.total_size = plan.ranges.iter().map(ByteRange::len).sum();
    if plan.total_size != retained_total || end_offset - plan.base_offset != retained_total {
        return Err(CropError::Internal {
            reason: format!(
                "planned {} bytes in ranges, but retained samples total {retained_total} bytes",
                plan.total_size
            ),
        });
    }

    tracing::debug!(
        ranges = plan.ranges.len(),
        total_size = plan.total_size,
        base_offset = plan.base_offset,
        "planned media data byte ranges"
    );
    Ok(plan)
}
