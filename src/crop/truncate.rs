use crate::{
    BoxType, Either,
    boxes::{
        Co64Box, CttsBox, SdtpBox, StblBox, StcoBox, StscBox, StscEntry, StssBox, StszBox,
        SttsBox,
    },
};

use super::TrackBoundary;

// サンプル単位の情報を持つが、このモジュールでは切り詰められないボックス
const UNTRUNCATED_BOX_TYPES: [BoxType; 6] = [
    BoxType::Normal(*b"sbgp"),
    BoxType::Normal(*b"sgpd"),
    BoxType::Normal(*b"subs"),
    BoxType::Normal(*b"saiz"),
    BoxType::Normal(*b"saio"),
    BoxType::Normal(*b"stps"),
];

/// 切り詰めの対象となるサンプルテーブルのボックス
///
/// [`StblBox`] の各フィールドへの可変参照を保持する
#[derive(Debug)]
pub enum SampleTable<'a> {
    /// stts
    TimeToSample(&'a mut SttsBox),
    /// stss
    SyncSample(&'a mut StssBox),
    /// ctts
    CompositionOffset(&'a mut CttsBox),
    /// stsc
    SampleToChunk(&'a mut StscBox),
    /// stsz
    SampleSize(&'a mut StszBox),
    /// sdtp
    SampleDependency(&'a mut SdtpBox),
    /// stco / co64
    ChunkOffset(&'a mut Either<StcoBox, Co64Box>),
}

impl<'a> SampleTable<'a> {
    /// [`StblBox`] 内の切り詰め対象のボックスを列挙する
    pub fn tables(stbl_box: &'a mut StblBox) -> Vec<Self> {
        let StblBox {
            stts_box,
            ctts_box,
            stss_box,
            sdtp_box,
            stsc_box,
            stsz_box,
            stco_or_co64_box,
            ..
        } = stbl_box;

        let mut tables = vec![Self::TimeToSample(stts_box)];
        tables.extend(stss_box.as_mut().map(Self::SyncSample));
        tables.extend(ctts_box.as_mut().map(Self::CompositionOffset));
        tables.push(Self::SampleToChunk(stsc_box));
        tables.push(Self::SampleSize(stsz_box));
        tables.extend(sdtp_box.as_mut().map(Self::SampleDependency));
        tables.push(Self::ChunkOffset(stco_or_co64_box));
        tables
    }

    /// `boundary` が示す位置までテーブルを切り詰める
    pub fn truncate(self, boundary: &TrackBoundary) {
        let sample_count = boundary.sample_count;
        match self {
            Self::TimeToSample(b) => {
                truncate_runs(&mut b.entries, sample_count, |e| &mut e.sample_count);
            }
            Self::CompositionOffset(b) => {
                truncate_runs(&mut b.entries, sample_count, |e| &mut e.sample_count);
            }
            Self::SyncSample(b) => {
                b.sample_numbers.retain(|n| n.get() <= sample_count);
            }
            Self::SampleToChunk(b) => truncate_sample_to_chunk(b, boundary),
            Self::SampleSize(b) => match b {
                StszBox::Fixed {
                    sample_count: count,
                    ..
                } => *count = sample_count,
                StszBox::Variable { entry_sizes } => entry_sizes.truncate(sample_count as usize),
            },
            Self::SampleDependency(b) => b.entries.truncate(sample_count as usize),
            Self::ChunkOffset(b) => {
                let chunk_count = boundary.chunk_count() as usize;
                match b {
                    Either::A(b) => b.chunk_offsets.truncate(chunk_count),
                    Either::B(b) => b.chunk_offsets.truncate(chunk_count),
                }
            }
        }
    }
}

// ランレングス表現のエントリー群を、先頭から `sample_count` サンプル分だけ残すように切り詰める
fn truncate_runs<T, F>(entries: &mut Vec<T>, sample_count: u32, mut run_length: F)
where
    F: FnMut(&mut T) -> &mut u32,
{
    let mut remaining = sample_count;
    let mut keep = 0;
    for entry in entries.iter_mut() {
        if remaining == 0 {
            break;
        }
        let n = run_length(entry);
        *n = (*n).min(remaining);
        remaining -= *n;
        keep += 1;
    }
    entries.truncate(keep);
}

fn truncate_sample_to_chunk(stsc_box: &mut StscBox, boundary: &TrackBoundary) {
    let Some(chunk) = boundary.terminal_chunk else {
        stsc_box.entries.clear();
        return;
    };
    let retained = boundary.sample_count + 1 - chunk.first_sample.get();

    stsc_box
        .entries
        .retain(|e| e.first_chunk <= chunk.chunk_number);
    let Some(last) = stsc_box.entries.last_mut() else {
        return;
    };
    if last.sample_per_chunk == retained {
        return;
    }

    if last.first_chunk == chunk.chunk_number {
        // 終端チャンクから始まるエントリーはそのまま書き換える
        last.sample_per_chunk = retained;
    } else {
        // 終端チャンクより前のチャンクは元のエントリーのまま残し、終端チャンク用のエントリーを追加する
        stsc_box.entries.push(StscEntry {
            first_chunk: chunk.chunk_number,
            sample_per_chunk: retained,
            sample_description_index: chunk.sample_description_index,
        });
    }
}

/// トラックのサンプルテーブルを `boundary` が示す位置までに切り詰める
///
/// チャンクオフセットは残るチャンクの数に切り詰められるだけで、値の書き換えは
/// [`rewrite_chunk_offsets()`](super::rewrite_chunk_offsets) で行われる
pub fn truncate_sample_table(stbl_box: &mut StblBox, boundary: &TrackBoundary) {
    for b in &stbl_box.unknown_boxes {
        if UNTRUNCATED_BOX_TYPES.contains(&b.box_type) {
            tracing::warn!(
                track_id = boundary.track_id,
                box_type = %b.box_type,
                "sample table box is left untruncated"
            );
        }
    }

    for table in SampleTable::tables(stbl_box) {
        table.truncate(boundary);
    }
    tracing::debug!(
        track_id = boundary.track_id,
        sample_count = boundary.sample_count,
        chunk_count = boundary.chunk_count(),
        "truncated sample table"
    );
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;
    use crate::{
        aux::{ChunkInfo, SampleTableAccessor},
        boxes::{CttsEntry, SdtpEntry, SttsEntry},
        crop::test_util::{TrackSpec, moov},
    };

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).expect("non-zero")
    }

    fn boundary(stbl_box: &StblBox, sample_count: u32) -> TrackBoundary {
        let accessor = SampleTableAccessor::new(stbl_box).expect("valid sample table");
        TrackBoundary {
            track_index: 0,
            track_id: 1,
            timescale: nz(30),
            sample_count,
            original_sample_count: accessor.sample_count(),
            end_time: 0,
            terminal_chunk: NonZeroU32::new(sample_count)
                .and_then(|n| accessor.chunk_for_sample(n))
                .copied(),
        }
    }

    fn stbl(sample_count: u32, samples_per_chunk: u32) -> StblBox {
        let mut video = TrackSpec::video(30, sample_count, 30);
        video.samples_per_chunk = samples_per_chunk;
        let mut moov = moov(&[video]);
        moov.trak_boxes.remove(0).mdia_box.minf_box.stbl_box
    }

    #[test]
    fn time_runs_are_clamped() {
        let mut entries = vec![
            SttsEntry {
                sample_count: 3,
                sample_delta: 10,
            },
            SttsEntry {
                sample_count: 4,
                sample_delta: 20,
            },
            SttsEntry {
                sample_count: 5,
                sample_delta: 30,
            },
        ];
        truncate_runs(&mut entries, 5, |e| &mut e.sample_count);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sample_count, 2);
        assert_eq!(entries[1].sample_delta, 20);

        // 境界がエントリーの切れ目と一致する場合は、余分なエントリーは作られない
        truncate_runs(&mut entries, 3, |e| &mut e.sample_count);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sample_count, 3);
    }

    #[test]
    fn composition_offsets_keep_their_value() {
        let mut ctts = CttsBox {
            version: 1,
            entries: vec![
                CttsEntry {
                    sample_count: 2,
                    sample_offset: 1,
                },
                CttsEntry {
                    sample_count: 2,
                    sample_offset: -1,
                },
            ],
        };
        truncate_runs(&mut ctts.entries, 3, |e| &mut e.sample_count);
        assert_eq!(
            ctts.entries,
            vec![
                CttsEntry {
                    sample_count: 2,
                    sample_offset: 1
                },
                CttsEntry {
                    sample_count: 1,
                    sample_offset: -1
                },
            ]
        );
    }

    #[test]
    fn partial_chunk_gets_its_own_stsc_entry() {
        // 10 サンプルずつのチャンク 3 つのうち、3 番目のチャンクの 6 サンプル目までを残す
        let mut stbl_box = stbl(30, 10);
        let boundary = boundary(&stbl_box, 26);
        truncate_sample_table(&mut stbl_box, &boundary);

        let entries = &stbl_box.stsc_box.entries;
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].first_chunk.get(), entries[0].sample_per_chunk), (1, 10));
        assert_eq!((entries[1].first_chunk.get(), entries[1].sample_per_chunk), (3, 6));
        assert_eq!(entries[1].sample_description_index.get(), 1);
        assert_eq!(stbl_box.chunk_offsets().len(), 3);
        assert_eq!(stbl_box.stts_box.sample_count(), 26);
        assert_eq!(stbl_box.stsz_box.sample_count(), 26);
        assert_eq!(
            stbl_box
                .stss_box
                .as_ref()
                .map(|b| b.sample_numbers.clone()),
            Some(vec![nz(1)])
        );
    }

    #[test]
    fn partial_first_chunk_is_rewritten_in_place() {
        let mut stbl_box = stbl(10, 10);
        let boundary = boundary(&stbl_box, 6);
        truncate_sample_table(&mut stbl_box, &boundary);

        let entries = &stbl_box.stsc_box.entries;
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].first_chunk.get(), entries[0].sample_per_chunk), (1, 6));
        assert_eq!(stbl_box.chunk_offsets().len(), 1);
    }

    #[test]
    fn later_stsc_entries_are_dropped() {
        let mut stbl_box = stbl(30, 10);
        stbl_box.stsc_box.entries.push(StscEntry {
            first_chunk: nz(3),
            sample_per_chunk: 10,
            sample_description_index: nz(2),
        });
        let boundary = TrackBoundary {
            sample_count: 20,
            terminal_chunk: Some(ChunkInfo {
                chunk_number: nz(2),
                first_sample: nz(11),
                sample_count: 10,
                offset: 0,
                sample_description_index: nz(1),
            }),
            ..boundary(&stbl_box, 20)
        };
        truncate_sample_table(&mut stbl_box, &boundary);
        assert_eq!(stbl_box.stsc_box.entries.len(), 1);
        assert_eq!(stbl_box.chunk_offsets().len(), 2);
    }

    #[test]
    fn fixed_size_and_dependency_tables() {
        let mut stbl_box = stbl(30, 10);
        stbl_box.stsz_box = StszBox::Fixed {
            sample_size: nz(100),
            sample_count: 30,
        };
        stbl_box.sdtp_box = Some(SdtpBox {
            entries: vec![SdtpEntry::from_byte(0b0001_0000); 30],
        });
        let boundary = boundary(&stbl_box, 12);
        truncate_sample_table(&mut stbl_box, &boundary);

        assert_eq!(stbl_box.stsz_box.sample_count(), 12);
        assert_eq!(stbl_box.sdtp_box.map(|b| b.entries.len()), Some(12));
    }

    #[test]
    fn empty_track_loses_every_chunk() {
        let mut stbl_box = stbl(30, 10);
        let boundary = boundary(&stbl_box, 0);
        truncate_sample_table(&mut stbl_box, &boundary);

        assert!(stbl_box.stts_box.entries.is_empty());
        assert!(stbl_box.stsc_box.entries.is_empty());
        assert!(stbl_box.chunk_offsets().is_empty());
        assert_eq!(stbl_box.stsz_box.sample_count(), 0);
    }
}
