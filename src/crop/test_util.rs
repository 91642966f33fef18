//! 単体テスト用の `moov` ボックス生成ヘルパー
use std::num::NonZeroU32;

use crate::{
    Either, FixedPointNumber, Mp4FileTime,
    boxes::{
        HdlrBox, MdhdBox, MdiaBox, MinfBox, MoovBox, MvhdBox, StblBox, StcoBox, StscBox,
        StscEntry, StsdBox, StssBox, StszBox, SttsBox, TkhdBox, TrakBox,
    },
};

pub const FIRST_CHUNK_OFFSET: u64 = 1000;

#[derive(Debug, Clone)]
pub struct TrackSpec {
    pub handler_type: [u8; 4],
    pub timescale: u32,
    pub sample_count: u32,
    pub sample_delta: u32,
    pub sync_interval: Option<u32>,
    pub samples_per_chunk: u32,
    pub sample_size: u32,
}

impl TrackSpec {
    pub fn video(timescale: u32, sample_count: u32, sync_interval: u32) -> Self {
        Self {
            handler_type: HdlrBox::HANDLER_TYPE_VIDE,
            timescale,
            sample_count,
            sample_delta: 1,
            sync_interval: Some(sync_interval),
            samples_per_chunk: 5,
            sample_size: 100,
        }
    }

    pub fn audio(timescale: u32, sample_count: u32, sample_delta: u32) -> Self {
        Self {
            handler_type: HdlrBox::HANDLER_TYPE_SOUN,
            timescale,
            sample_count,
            sample_delta,
            sync_interval: None,
            samples_per_chunk: 10,
            sample_size: 10,
        }
    }

    fn chunk_count(&self) -> u32 {
        self.sample_count.div_ceil(self.samples_per_chunk)
    }

    fn chunk_sample_count(&self, chunk_index: u32) -> u32 {
        let first = chunk_index * self.samples_per_chunk;
        self.samples_per_chunk.min(self.sample_count - first)
    }
}

fn nz(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).expect("non-zero")
}

/// チャンクを「チャンク番号、トラック」の順にインターリーブして配置した `moov` を作る
pub fn moov(tracks: &[TrackSpec]) -> MoovBox {
    let mut chunk_offsets = vec![Vec::new(); tracks.len()];
    let mut offset = FIRST_CHUNK_OFFSET;
    let max_chunks = tracks.iter().map(|t| t.chunk_count()).max().unwrap_or(0);
    for chunk_index in 0..max_chunks {
        for (i, track) in tracks.iter().enumerate() {
            if chunk_index < track.chunk_count() {
                chunk_offsets[i].push(offset as u32);
                offset += (track.chunk_sample_count(chunk_index) * track.sample_size) as u64;
            }
        }
    }

    let trak_boxes = tracks
        .iter()
        .zip(chunk_offsets)
        .enumerate()
        .map(|(i, (track, chunk_offsets))| trak(i as u32 + 1, track, chunk_offsets))
        .collect();

    MoovBox {
        mvhd_box: MvhdBox {
            creation_time: Mp4FileTime::default(),
            modification_time: Mp4FileTime::default(),
            timescale: nz(1000),
            duration: tracks
                .iter()
                .map(|t| (t.sample_count * t.sample_delta) as u64 * 1000 / t.timescale as u64)
                .max()
                .unwrap_or(0),
            rate: MvhdBox::DEFAULT_RATE,
            volume: MvhdBox::DEFAULT_VOLUME,
            matrix: MvhdBox::DEFAULT_MATRIX,
            next_track_id: tracks.len() as u32 + 1,
        },
        trak_boxes,
        unknown_boxes: Vec::new(),
    }
}

fn trak(track_id: u32, track: &TrackSpec, chunk_offsets: Vec<u32>) -> TrakBox {
    let media_duration = (track.sample_count * track.sample_delta) as u64;
    let mut stsc_entries = vec![StscEntry {
        first_chunk: nz(1),
        sample_per_chunk: track.samples_per_chunk,
        sample_description_index: nz(1),
    }];
    let last = track.chunk_count();
    let last_chunk_samples = track.chunk_sample_count(last - 1);
    if last > 1 && last_chunk_samples != track.samples_per_chunk {
        stsc_entries.push(StscEntry {
            first_chunk: nz(last),
            sample_per_chunk: last_chunk_samples,
            sample_description_index: nz(1),
        });
    }

    TrakBox {
        tkhd_box: TkhdBox {
            flag_track_enabled: true,
            flag_track_in_movie: true,
            flag_track_in_preview: false,
            flag_track_size_is_aspect_ratio: false,
            creation_time: Mp4FileTime::default(),
            modification_time: Mp4FileTime::default(),
            track_id,
            duration: media_duration * 1000 / track.timescale as u64,
            layer: 0,
            alternate_group: 0,
            volume: FixedPointNumber::new(0, 0),
            matrix: TkhdBox::DEFAULT_MATRIX,
            width: FixedPointNumber::new(0, 0),
            height: FixedPointNumber::new(0, 0),
        },
        edts_box: None,
        mdia_box: MdiaBox {
            mdhd_box: MdhdBox {
                creation_time: Mp4FileTime::default(),
                modification_time: Mp4FileTime::default(),
                timescale: nz(track.timescale),
                duration: media_duration,
                language: MdhdBox::LANGUAGE_UNDEFINED,
            },
            hdlr_box: HdlrBox {
                handler_type: track.handler_type,
                name: b"test\0".to_vec(),
            },
            minf_box: MinfBox {
                stbl_box: StblBox {
                    stsd_box: StsdBox {
                        entries: Vec::new(),
                    },
                    stts_box: SttsBox::from_sample_deltas(
                        (0..track.sample_count).map(|_| track.sample_delta),
                    ),
                    ctts_box: None,
                    stss_box: track.sync_interval.map(|interval| StssBox {
                        sample_numbers: (1..=track.sample_count)
                            .step_by(interval as usize)
                            .map(nz)
                            .collect(),
                    }),
                    sdtp_box: None,
                    stsc_box: StscBox {
                        entries: stsc_entries,
                    },
                    stsz_box: StszBox::Variable {
                        entry_sizes: vec![track.sample_size; track.sample_count as usize],
                    },
                    stco_or_co64_box: Either::A(StcoBox { chunk_offsets }),
                    unknown_boxes: Vec::new(),
                },
                unknown_boxes: Vec::new(),
            },
            unknown_boxes: Vec::new(),
        },
        unknown_boxes: Vec::new(),
    }
}
