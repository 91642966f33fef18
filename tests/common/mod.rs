//! 結合テスト用の合成 MP4 ファイル生成ヘルパー
#![allow(dead_code)]

use std::num::NonZeroU32;

use shiguredo_mp4_crop::{
    BoxType, Either, Encode, FixedPointNumber, Mp4File, Mp4FileTime,
    aux::SampleTableAccessor,
    boxes::{
        Brand, Co64Box, CttsBox, CttsEntry, EdtsBox, ElstBox, ElstEntry, FtypBox, HdlrBox,
        MdhdBox, MdiaBox, MinfBox, MoovBox, MvhdBox, SdtpBox, SdtpEntry, StblBox, StcoBox,
        StscBox, StscEntry, StsdBox, StssBox, StszBox, SttsBox, TkhdBox, TrakBox, UnknownBox,
    },
};

pub const MOVIE_TIMESCALE: u32 = 1000;

/// 合成するトラックの設定
#[derive(Debug, Clone)]
pub struct TrackConfig {
    pub handler_type: [u8; 4],
    pub timescale: u32,
    pub sample_count: u32,
    pub sample_delta: u32,
    pub sync_interval: Option<u32>,
    pub samples_per_chunk: u32,
    pub base_sample_size: u32,
    pub fixed_sample_size: bool,
    pub co64: bool,
    pub composition_offsets: bool,
    pub sample_dependencies: bool,
    pub edit_list: bool,
}

impl TrackConfig {
    /// `fps` フレーム毎秒、`sync_interval` フレームごとにキーフレームを持つ映像トラック
    pub fn video(fps: u32, seconds: u32, sync_interval: u32) -> Self {
        Self {
            handler_type: HdlrBox::HANDLER_TYPE_VIDE,
            timescale: fps * 1000,
            sample_count: fps * seconds,
            sample_delta: 1000,
            sync_interval: Some(sync_interval),
            samples_per_chunk: 5,
            base_sample_size: 200,
            fixed_sample_size: false,
            co64: false,
            composition_offsets: false,
            sample_dependencies: false,
            edit_list: false,
        }
    }

    /// 48 kHz、1 サンプル 1024 tick の音声トラック
    pub fn audio(seconds: u32) -> Self {
        Self {
            handler_type: HdlrBox::HANDLER_TYPE_SOUN,
            timescale: 48000,
            sample_count: seconds * 48000 / 1024,
            sample_delta: 1024,
            sync_interval: None,
            samples_per_chunk: 8,
            base_sample_size: 20,
            fixed_sample_size: false,
            co64: false,
            composition_offsets: false,
            sample_dependencies: false,
            edit_list: false,
        }
    }

    pub fn chunk_count(&self) -> u32 {
        self.sample_count.div_ceil(self.samples_per_chunk)
    }

    fn chunk_sample_count(&self, chunk_index: u32) -> u32 {
        let first = chunk_index * self.samples_per_chunk;
        self.samples_per_chunk.min(self.sample_count - first)
    }

    /// 1 始まりのサンプル番号に対応するサンプルサイズ
    pub fn sample_size(&self, sample_number: u32) -> u32 {
        if self.fixed_sample_size {
            self.base_sample_size
        } else {
            self.base_sample_size + sample_number % 7
        }
    }

    fn composition_offset(sample_number: u32) -> i32 {
        (sample_number % 3) as i32 - 1
    }

    fn media_duration(&self) -> u64 {
        self.sample_count as u64 * self.sample_delta as u64
    }

    fn movie_duration(&self) -> u64 {
        self.media_duration() * MOVIE_TIMESCALE as u64 / self.timescale as u64
    }
}

/// サンプルの中身（トラック ID とサンプル番号から決まるパターンで埋める）
pub fn sample_fill(track_id: u32, sample_number: u32) -> u8 {
    (track_id.wrapping_mul(31).wrapping_add(sample_number) % 251) as u8
}

/// 合成 MP4 ファイルのビルダー
#[derive(Debug, Clone)]
pub struct Mp4Builder {
    pub tracks: Vec<TrackConfig>,

    /// `moov` を `mdat` の前に配置するかどうか
    pub moov_first: bool,

    /// `sgpd` などの未対応ボックスを stbl に追加するかどうか
    pub extra_sample_group: bool,
}

impl Mp4Builder {
    pub fn new(tracks: Vec<TrackConfig>) -> Self {
        Self {
            tracks,
            moov_first: true,
            extra_sample_group: false,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let ftyp = FtypBox {
            major_brand: Brand::ISOM,
            minor_version: 512,
            compatible_brands: vec![Brand::ISOM, Brand::MP41],
        }
        .encode_to_vec()
        .expect("encode ftyp");

        // チャンクを「チャンク番号、トラック」の順にインターリーブして配置する
        let mut relative_offsets = vec![Vec::new(); self.tracks.len()];
        let mut payload = Vec::new();
        let max_chunks = self.tracks.iter().map(TrackConfig::chunk_count).max().unwrap_or(0);
        for chunk_index in 0..max_chunks {
            for (i, track) in self.tracks.iter().enumerate() {
                if chunk_index >= track.chunk_count() {
                    continue;
                }
                relative_offsets[i].push(payload.len() as u64);
                let first = chunk_index * track.samples_per_chunk + 1;
                for n in first..first + track.chunk_sample_count(chunk_index) {
                    let fill = sample_fill(i as u32 + 1, n);
                    payload.extend(std::iter::repeat_n(fill, track.sample_size(n) as usize));
                }
            }
        }

        let moov_size = self.moov(&relative_offsets, 0).encode_to_vec().expect("encode moov").len();
        let payload_start = if self.moov_first {
            ftyp.len() + moov_size + 8
        } else {
            ftyp.len() + 8
        } as u64;
        let moov = self
            .moov(&relative_offsets, payload_start)
            .encode_to_vec()
            .expect("encode moov");

        let mut mdat = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        mdat.extend_from_slice(b"mdat");
        mdat.extend_from_slice(&payload);

        let mut bytes = ftyp;
        if self.moov_first {
            bytes.extend_from_slice(&moov);
            bytes.extend_from_slice(&mdat);
        } else {
            bytes.extend_from_slice(&mdat);
            bytes.extend_from_slice(&moov);
        }
        bytes
    }

    fn moov(&self, relative_offsets: &[Vec<u64>], payload_start: u64) -> MoovBox {
        MoovBox {
            mvhd_box: MvhdBox {
                creation_time: Mp4FileTime::default(),
                modification_time: Mp4FileTime::default(),
                timescale: nz(MOVIE_TIMESCALE),
                duration: self
                    .tracks
                    .iter()
                    .map(TrackConfig::movie_duration)
                    .max()
                    .unwrap_or(0),
                rate: MvhdBox::DEFAULT_RATE,
                volume: MvhdBox::DEFAULT_VOLUME,
                matrix: MvhdBox::DEFAULT_MATRIX,
                next_track_id: self.tracks.len() as u32 + 1,
            },
            trak_boxes: self
                .tracks
                .iter()
                .zip(relative_offsets)
                .enumerate()
                .map(|(i, (track, offsets))| {
                    let offsets = offsets.iter().map(|o| o + payload_start).collect();
                    self.trak(i as u32 + 1, track, offsets)
                })
                .collect(),
            unknown_boxes: Vec::new(),
        }
    }

    fn trak(&self, track_id: u32, track: &TrackConfig, chunk_offsets: Vec<u64>) -> TrakBox {
        let mut stsc_entries = vec![StscEntry {
            first_chunk: nz(1),
            sample_per_chunk: track.samples_per_chunk,
            sample_description_index: nz(1),
        }];
        let last = track.chunk_count();
        let last_chunk_samples = track.chunk_sample_count(last - 1);
        if last == 1 {
            stsc_entries[0].sample_per_chunk = last_chunk_samples;
        } else if last_chunk_samples != track.samples_per_chunk {
            stsc_entries.push(StscEntry {
                first_chunk: nz(last),
                sample_per_chunk: last_chunk_samples,
                sample_description_index: nz(1),
            });
        }

        let samples = 1..=track.sample_count;
        let stco_or_co64_box = if track.co64 {
            Either::B(Co64Box { chunk_offsets })
        } else {
            Either::A(StcoBox {
                chunk_offsets: chunk_offsets.into_iter().map(|o| o as u32).collect(),
            })
        };
        let stsz_box = if track.fixed_sample_size {
            StszBox::Fixed {
                sample_size: nz(track.base_sample_size),
                sample_count: track.sample_count,
            }
        } else {
            StszBox::Variable {
                entry_sizes: samples.clone().map(|n| track.sample_size(n)).collect(),
            }
        };

        let mut unknown_boxes = Vec::new();
        if self.extra_sample_group {
            unknown_boxes.push(UnknownBox {
                box_type: BoxType::Normal(*b"sgpd"),
                box_size: shiguredo_mp4_crop::BoxSize::U32(8 + 8),
                payload: vec![0; 8],
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
                duration: track.movie_duration(),
                layer: 0,
                alternate_group: 0,
                volume: FixedPointNumber::new(0, 0),
                matrix: TkhdBox::DEFAULT_MATRIX,
                width: FixedPointNumber::new(320, 0),
                height: FixedPointNumber::new(240, 0),
            },
            edts_box: track.edit_list.then(|| EdtsBox {
                elst_box: Some(ElstBox {
                    entries: vec![ElstEntry {
                        edit_duration: track.movie_duration(),
                        media_time: 0,
                        media_rate: FixedPointNumber::new(1, 0),
                    }],
                }),
                unknown_boxes: Vec::new(),
            }),
            mdia_box: MdiaBox {
                mdhd_box: MdhdBox {
                    creation_time: Mp4FileTime::default(),
                    modification_time: Mp4FileTime::default(),
                    timescale: nz(track.timescale),
                    duration: track.media_duration(),
                    language: MdhdBox::LANGUAGE_UNDEFINED,
                },
                hdlr_box: HdlrBox {
                    handler_type: track.handler_type,
                    name: b"synthetic\0".to_vec(),
                },
                minf_box: MinfBox {
                    stbl_box: StblBox {
                        stsd_box: StsdBox {
                            entries: vec![UnknownBox {
                                box_type: BoxType::Normal(*b"mp4v"),
                                box_size: shiguredo_mp4_crop::BoxSize::U32(8 + 4),
                                payload: vec![1, 2, 3, 4],
                            }],
                        },
                        stts_box: SttsBox::from_sample_deltas(
                            samples.clone().map(|_| track.sample_delta),
                        ),
                        ctts_box: track.composition_offsets.then(|| {
                            CttsBox::from_entries(
                                samples
                                    .clone()
                                    .map(|n| CttsEntry {
                                        sample_count: 1,
                                        sample_offset: TrackConfig::composition_offset(n),
                                    })
                                    .collect(),
                            )
                        }),
                        stss_box: track.sync_interval.map(|interval| StssBox {
                            sample_numbers: samples.clone().step_by(interval as usize).map(nz).collect(),
                        }),
                        sdtp_box: track.sample_dependencies.then(|| SdtpBox {
                            entries: samples
                                .clone()
                                .map(|n| SdtpEntry::from_byte(if n == 1 { 0x20 } else { 0x10 }))
                                .collect(),
                        }),
                        stsc_box: StscBox {
                            entries: stsc_entries,
                        },
                        stsz_box,
                        stco_or_co64_box,
                        unknown_boxes,
                    },
                    unknown_boxes: Vec::new(),
                },
                unknown_boxes: Vec::new(),
            },
            unknown_boxes: Vec::new(),
        }
    }
}

pub fn nz(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).expect("non-zero")
}

/// バイト列を MP4 ファイルとしてデコードする
pub fn parse(bytes: &[u8]) -> Mp4File {
    Mp4File::read_from(std::io::Cursor::new(bytes)).expect("decode output")
}

/// トラックの各サンプルのバイト列を、サンプルテーブルに従って取り出す
pub fn read_samples(bytes: &[u8], trak_box: &TrakBox) -> Vec<Vec<u8>> {
    let accessor = SampleTableAccessor::new(trak_box.stbl_box()).expect("valid sample table");
    let mut samples = Vec::new();
    for chunk in accessor.chunks() {
        let mut offset = chunk.offset as usize;
        for i in 0..chunk.sample_count {
            let n = nz(chunk.first_sample.get() + i);
            let size = accessor.sample_size(n).expect("sample size") as usize;
            samples.push(bytes[offset..offset + size].to_vec());
            offset += size;
        }
    }
    samples
}

/// トラックの全サンプルが、元のサンプル番号に対応するパターンのままであることを確認する
pub fn assert_samples_intact(bytes: &[u8], trak_box: &TrakBox, track: &TrackConfig) {
    let track_id = trak_box.track_id();
    for (i, sample) in read_samples(bytes, trak_box).iter().enumerate() {
        let n = i as u32 + 1;
        assert_eq!(sample.len(), track.sample_size(n) as usize, "size of sample {n}");
        let fill = sample_fill(track_id, n);
        assert!(
            sample.iter().all(|b| *b == fill),
            "content of sample {n} in track {track_id}"
        );
    }
}

/// トラックのサンプルテーブルの各テーブルが表すサンプル数が揃っていることを確認し、そのサンプル数を返す
pub fn assert_table_lengths_consistent(trak_box: &TrakBox) -> u32 {
    let stbl_box = trak_box.stbl_box();
    let count = stbl_box.stts_box.sample_count();
    assert_eq!(stbl_box.stsz_box.sample_count() as u64, count);
    if let StszBox::Variable { entry_sizes } = &stbl_box.stsz_box {
        assert_eq!(entry_sizes.len() as u64, count);
    }
    if let Some(ctts_box) = &stbl_box.ctts_box {
        assert_eq!(ctts_box.sample_count(), count);
    }
    if let Some(sdtp_box) = &stbl_box.sdtp_box {
        assert_eq!(sdtp_box.entries.len() as u64, count);
    }
    SampleTableAccessor::new(stbl_box).expect("consistent sample table");
    count as u32
}
