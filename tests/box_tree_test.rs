//! moov 配下のボックスのエンコード・デコードのテスト
use std::{io::Cursor, num::NonZeroU32};

use shiguredo_mp4_crop::{
    BoxSize, BoxType, Decode, Either, Encode, FullBox, Mp4FileTime, Result,
    boxes::{
        CttsBox, CttsEntry, MvhdBox, SdtpBox, SdtpEntry, StblBox, StcoBox, StscBox, StscEntry,
        StsdBox, StssBox, StszBox, SttsBox, UnknownBox,
    },
};

mod common;

use common::{Mp4Builder, TrackConfig};

fn stbl_children() -> (StsdBox, SttsBox, StscBox, StszBox, StcoBox, StssBox) {
    (
        StsdBox {
            entries: vec![UnknownBox {
                box_type: BoxType::Normal(*b"avc1"),
                box_size: BoxSize::U32(8 + 2),
                payload: vec![0xAB, 0xCD],
            }],
        },
        SttsBox::from_sample_deltas([10, 10, 10, 20]),
        StscBox {
            entries: vec![StscEntry {
                first_chunk: NonZeroU32::MIN,
                sample_per_chunk: 2,
                sample_description_index: NonZeroU32::MIN,
            }],
        },
        StszBox::Variable {
            entry_sizes: vec![5, 6, 7, 8],
        },
        StcoBox {
            chunk_offsets: vec![100, 200],
        },
        StssBox {
            sample_numbers: vec![NonZeroU32::MIN, NonZeroU32::new(3).expect("non-zero")],
        },
    )
}

#[test]
fn stbl_children_are_accepted_in_any_order() -> Result<()> {
    let (stsd, stts, stsc, stsz, stco, stss) = stbl_children();
    let sgpd = UnknownBox {
        box_type: BoxType::Normal(*b"sgpd"),
        box_size: BoxSize::U32(8 + 3),
        payload: vec![1, 2, 3],
    };

    // 子ボックスを標準とは異なる順番で並べる
    let mut payload = Vec::new();
    payload.extend(stco.encode_to_vec()?);
    payload.extend(sgpd.encode_to_vec()?);
    payload.extend(stsz.encode_to_vec()?);
    payload.extend(stss.encode_to_vec()?);
    payload.extend(stsc.encode_to_vec()?);
    payload.extend(stts.encode_to_vec()?);
    payload.extend(stsd.encode_to_vec()?);
    let mut bytes = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    bytes.extend_from_slice(b"stbl");
    bytes.extend(payload);

    let (stbl, size) = StblBox::decode(&bytes)?;
    assert_eq!(size, bytes.len());
    assert_eq!(stbl.stsd_box, stsd);
    assert_eq!(stbl.stts_box, stts);
    assert_eq!(stbl.stss_box, Some(stss));
    assert_eq!(stbl.stco_or_co64_box, Either::A(stco));
    assert_eq!(stbl.unknown_boxes, vec![sgpd]);
    assert_eq!(stbl.chunk_offsets(), vec![100, 200]);

    // 再エンコードすると標準の順番になり、サイズは変わらない
    let encoded = stbl.encode_to_vec()?;
    assert_eq!(encoded.len(), bytes.len());
    assert_eq!(&encoded[12..16], b"stsd");
    assert_eq!(StblBox::decode(&encoded)?.0, stbl);
    Ok(())
}

#[test]
fn stbl_without_chunk_offsets_is_rejected() -> Result<()> {
    let (stsd, stts, stsc, stsz, _, _) = stbl_children();
    let mut payload = Vec::new();
    payload.extend(stsd.encode_to_vec()?);
    payload.extend(stts.encode_to_vec()?);
    payload.extend(stsc.encode_to_vec()?);
    payload.extend(stsz.encode_to_vec()?);
    let mut bytes = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    bytes.extend_from_slice(b"stbl");
    bytes.extend(payload);

    assert!(StblBox::decode(&bytes).is_err());
    Ok(())
}

#[test]
fn ctts_version_follows_sign_of_offsets() -> Result<()> {
    let mut entries = vec![
        CttsEntry {
            sample_count: 2,
            sample_offset: 10,
        },
        CttsEntry {
            sample_count: 1,
            sample_offset: 0,
        },
    ];
    let ctts = CttsBox::from_entries(entries.clone());
    assert_eq!(ctts.full_box_version(), 0);
    assert_eq!(ctts.sample_count(), 3);

    entries[1].sample_offset = -20;
    let ctts = CttsBox::from_entries(entries);
    assert_eq!(ctts.full_box_version(), 1);
    let encoded = ctts.encode_to_vec()?;
    assert_eq!(encoded[8], 1);
    assert_eq!(CttsBox::decode(&encoded)?.0, ctts);
    Ok(())
}

#[test]
fn ctts_keeps_decoded_version() -> Result<()> {
    // バージョン 0 で 2^31 以上の符号なしオフセットを持つ ctts
    let mut bytes = vec![0, 0, 0, 24, b'c', b't', b't', b's', 0, 0, 0, 0, 0, 0, 0, 1];
    bytes.extend_from_slice(&5u32.to_be_bytes());
    bytes.extend_from_slice(&0x8000_0010u32.to_be_bytes());

    let (ctts, size) = CttsBox::decode(&bytes)?;
    assert_eq!(size, bytes.len());
    assert_eq!(ctts.version, 0);
    assert_eq!(ctts.full_box_version(), 0);

    // 再エンコードしてもバージョン 0 のままで、バイト列も変わらない
    assert_eq!(ctts.encode_to_vec()?, bytes);

    bytes[8] = 2;
    assert!(CttsBox::decode(&bytes).is_err());
    Ok(())
}

#[test]
fn sdtp_entries_keep_flag_bits() -> Result<()> {
    let entries = [0x00, 0x10, 0x24, 0xAA, 0xFF].map(SdtpEntry::from_byte);
    for (entry, byte) in entries.iter().zip([0x00, 0x10, 0x24, 0xAA, 0xFF]) {
        assert_eq!(entry.to_byte(), byte);
    }
    assert_eq!(entries[2].sample_depends_on.get(), 2);
    assert_eq!(entries[2].sample_is_depended_on.get(), 1);

    let sdtp = SdtpBox {
        entries: entries.to_vec(),
    };
    let encoded = sdtp.encode_to_vec()?;
    // ヘッダー 8 バイト、フルボックスヘッダー 4 バイト、サンプルごとに 1 バイト
    assert_eq!(encoded.len(), 8 + 4 + 5);
    assert_eq!(SdtpBox::decode(&encoded)?.0, sdtp);
    Ok(())
}

#[test]
fn stsz_with_uniform_size() -> Result<()> {
    let stsz = StszBox::Fixed {
        sample_size: NonZeroU32::new(100).expect("non-zero"),
        sample_count: 42,
    };
    let encoded = stsz.encode_to_vec()?;
    assert_eq!(encoded.len(), 8 + 4 + 8);

    let (decoded, _) = StszBox::decode(&encoded)?;
    assert_eq!(decoded.sample_count(), 42);
    assert_eq!(decoded, stsz);
    Ok(())
}

#[test]
fn stsz_with_too_many_entries_is_rejected() -> Result<()> {
    let mut encoded = StszBox::Variable {
        entry_sizes: vec![1, 2, 3],
    }
    .encode_to_vec()?;
    // sample_count フィールドを書き換えて、ペイロードに収まらない数にする
    encoded[16..20].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(StszBox::decode(&encoded).is_err());
    Ok(())
}

#[test]
fn mvhd_version_follows_duration() -> Result<()> {
    let mut mvhd = MvhdBox {
        creation_time: Mp4FileTime::from_secs(0),
        modification_time: Mp4FileTime::from_secs(0),
        timescale: NonZeroU32::new(1000).expect("non-zero"),
        duration: u32::MAX as u64,
        rate: MvhdBox::DEFAULT_RATE,
        volume: MvhdBox::DEFAULT_VOLUME,
        matrix: MvhdBox::DEFAULT_MATRIX,
        next_track_id: 2,
    };
    assert_eq!(mvhd.full_box_version(), 0);
    let v0 = mvhd.encode_to_vec()?;

    mvhd.duration += 1;
    assert_eq!(mvhd.full_box_version(), 1);
    let v1 = mvhd.encode_to_vec()?;
    assert_eq!(v1.len(), v0.len() + 12);
    assert_eq!(MvhdBox::decode(&v1)?.0, mvhd);
    Ok(())
}

#[test]
fn mdat_with_size_zero_extends_to_end_of_file() -> Result<()> {
    let mut bytes = Mp4Builder::new(vec![TrackConfig::video(30, 1, 30)]).build();
    let file = common::parse(&bytes);
    let mdat = file.mdat_boxes().next().expect("mdat");
    let (payload_offset, payload_size) = (mdat.payload_offset, mdat.payload_size);

    let header_offset = (payload_offset - 8) as usize;
    bytes[header_offset..header_offset + 4].copy_from_slice(&[0; 4]);

    let file = shiguredo_mp4_crop::Mp4File::read_from(Cursor::new(&bytes))?;
    let mdat = file.mdat_boxes().next().expect("mdat");
    assert_eq!(mdat.payload_offset, payload_offset);
    assert_eq!(mdat.payload_size, payload_size);
    Ok(())
}
