use std::io::{Read, Seek, Write};

use crate::{
    BaseBox, Encode, Mp4File,
    boxes::{MdatBox, RootBox},
};

use super::{BytePlan, CropError};

/// 書き換え済みの `file` と計画 `plan` に従って、出力ファイルを `writer` に書き出す
///
/// `mdat` 以外のボックスは入力での順番のままエンコードされる。
/// 先頭の `mdat` の位置には計画サイズの `mdat` を書き出し、各バイト範囲を `reader` からコピーする。
/// 二つ目以降の `mdat` は、残すデータが全て先頭の `mdat` に移されるので出力しない。
///
/// 返り値は出力した `mdat` ペイロードのバイト数
pub fn emit<R, W>(
    file: &Mp4File,
    plan: &BytePlan,
    mut reader: R,
    mut writer: W,
) -> Result<u64, CropError>
where
    R: Read + Seek,
    W: Write,
{
    let mdat_boxes = file.mdat_boxes().collect::<Vec<_>>();
    let header = MdatBox::compact_header(plan.total_size).ok_or(CropError::MdatTooLarge {
        payload_size: plan.total_size,
    })?;

    writer
        .write_all(&file.ftyp_box.encode_to_vec()?)
        .map_err(CropError::io("write 'ftyp' box"))?;

    let mut written = None;
    for b in &file.boxes {
        tracing::trace!(box_type = %b.box_type(), "writing top-level box");
        match b {
            RootBox::Moov(b) => writer
                .write_all(&b.encode_to_vec()?)
                .map_err(CropError::io("write 'moov' box"))?,
            RootBox::Unknown(b) => writer
                .write_all(&b.encode_to_vec()?)
                .map_err(CropError::io("write box"))?,
            RootBox::Mdat(_) if written.is_some() => {
                tracing::debug!("dropping additional 'mdat' box");
            }
            RootBox::Mdat(_) => {
                writer
                    .write_all(&header.encode_to_vec()?)
                    .map_err(CropError::io("write 'mdat' header"))?;
                written = Some(copy_ranges(plan, &mdat_boxes, &mut reader, &mut writer)?);
            }
        }
    }

    let written = written.ok_or_else(|| CropError::MissingMdat {
        reason: "no 'mdat' box in input".to_owned(),
    })?;
    if written != plan.total_size {
        return Err(CropError::Internal {
            reason: format!(
                "wrote {written} bytes of media data, but {} bytes were planned",
                plan.total_size
            ),
        });
    }
    Ok(written)
}

fn copy_ranges<R, W>(
    plan: &BytePlan,
    mdat_boxes: &[&MdatBox],
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, CropError>
where
    R: Read + Seek,
    W: Write,
{
    let mut written = 0;
    for range in &plan.ranges {
        let mdat = mdat_boxes
            .iter()
            .find(|m| m.contains(range.start, range.len()))
            .ok_or_else(|| CropError::MissingMdat {
                reason: format!(
                    "byte range {}..={} is outside of every 'mdat' payload",
                    range.start, range.end
                ),
            })?;
        let copied = mdat
            .copy_range(range.start, range.len(), &mut *reader, &mut *writer)
            .map_err(CropError::io("copy media data"))?;
        if copied != range.len() {
            tracing::debug!(
                copied,
                expected = range.len(),
                offset = range.start,
                "input ended inside a media data range"
            );
            return Err(CropError::Io {
                action: "copy media data",
                source: std::io::ErrorKind::UnexpectedEof.into(),
            });
        }
        written += copied;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        BoxHeader, BoxSize,
        boxes::{Brand, FtypBox, UnknownBox},
        crop::ByteRange,
    };

    fn file(boxes: Vec<RootBox>) -> Mp4File {
        Mp4File {
            ftyp_box: FtypBox {
                major_brand: Brand::ISOM,
                minor_version: 0,
                compatible_brands: vec![],
            },
            boxes,
        }
    }

    fn mdat(payload_offset: u64, payload_size: u64) -> RootBox {
        RootBox::Mdat(MdatBox {
            header: BoxHeader {
                box_type: MdatBox::TYPE,
                box_size: BoxSize::U32(payload_size as u32 + 8),
            },
            payload_offset,
            payload_size,
        })
    }

    #[test]
    fn copies_ranges_into_single_mdat() -> Result<(), CropError> {
        let input: Vec<u8> = (0..=255).collect();
        let file = file(vec![
            RootBox::Unknown(UnknownBox {
                box_type: crate::BoxType::Normal(*b"free"),
                box_size: BoxSize::U32(9),
                payload: vec![0xAA],
            }),
            mdat(100, 50),
            mdat(200, 50),
        ]);
        let plan = BytePlan {
            base_offset: 100,
            ranges: vec![
                ByteRange { start: 100, end: 103 },
                ByteRange { start: 210, end: 211 },
            ],
            chunk_offsets: vec![],
            total_size: 6,
        };

        let mut output = Vec::new();
        let written = emit(&file, &plan, Cursor::new(&input), &mut output)?;
        assert_eq!(written, 6);

        // ftyp (16) + free (9) + mdat ヘッダー (8) + ペイロード (6)
        assert_eq!(output.len(), 16 + 9 + 8 + 6);
        assert_eq!(&output[25..33], &[0, 0, 0, 14, b'm', b'd', b'a', b't']);
        assert_eq!(&output[33..], &[100, 101, 102, 103, 210, 211]);
        Ok(())
    }

    #[test]
    fn truncated_input_is_an_error() {
        let input = vec![0u8; 120];
        let file = file(vec![mdat(100, 50)]);
        let plan = BytePlan {
            base_offset: 100,
            ranges: vec![ByteRange { start: 100, end: 149 }],
            chunk_offsets: vec![],
            total_size: 50,
        };
        let err = emit(&file, &plan, Cursor::new(&input), Vec::new()).expect_err("short input");
        let CropError::Io { action, source } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(action, "copy media data");
        assert_eq!(source.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn missing_mdat_is_an_error() {
        let plan = BytePlan {
            base_offset: 0,
            ranges: vec![],
            chunk_offsets: vec![],
            total_size: 0,
        };
        let err = emit(&file(vec![]), &plan, Cursor::new(Vec::new()), Vec::new())
            .expect_err("no mdat");
        assert!(matches!(err, CropError::MissingMdat { .. }));
    }
}
