//! プログレッシブ形式の MP4 ファイル全体を読み込むためのモジュール
use std::io::{Read, Seek, SeekFrom};

use crate::{
    BoxHeader, BoxSize, Decode, Error, Result,
    boxes::{FtypBox, MdatBox, MoovBox, RootBox, UnknownBox},
};

/// フラグメント化された MP4 のトップレベルに現れる `moof` ボックスの種別
const MOOF_TYPE: crate::BoxType = crate::BoxType::Normal(*b"moof");

/// デコード済みの MP4 ファイル
///
/// `mdat` ボックスのペイロードはメモリ上には読み込まず、位置とサイズだけを [`MdatBox`] として保持する。
/// それ以外のトップレベルのボックスは、ファイル内での出現順のまま [`Mp4File::boxes`] に格納される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4File {
    /// 先頭の `ftyp` ボックス
    pub ftyp_box: FtypBox,

    /// `ftyp` 以降のトップレベルのボックス群
    pub boxes: Vec<RootBox>,
}

impl Mp4File {
    /// シーク可能な入力から MP4 ファイルを読み込む
    ///
    /// フラグメント化された MP4 (`moof` や `mvex` を含むもの) は [`ErrorKind::Unsupported`](crate::ErrorKind::Unsupported) エラーとなる
    pub fn read_from<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut ftyp_box = None;
        let mut boxes = Vec::new();
        let mut position = 0;
        while position < file_size {
            let (header, header_size) = read_box_header(&mut reader, file_size - position)?;
            let box_size = match header.box_size.get() {
                0 => file_size - position,
                n => n,
            };
            if position.checked_add(box_size).is_none_or(|end| end > file_size) {
                return Err(Error::invalid_data(format!(
                    "Box at offset {position} is truncated: expected {box_size} bytes, but only {} bytes available",
                    file_size - position
                ))
                .with_box_type(header.box_type));
            }

            if ftyp_box.is_none() && header.box_type != FtypBox::TYPE {
                return Err(Error::invalid_data(
                    "The first box of an MP4 file must be 'ftyp'",
                ));
            }

            match header.box_type {
                MdatBox::TYPE => {
                    boxes.push(RootBox::Mdat(MdatBox {
                        header,
                        payload_offset: position + header_size as u64,
                        payload_size: box_size - header_size as u64,
                    }));
                }
                MOOF_TYPE => {
                    return Err(Error::unsupported(
                        "Fragmented MP4 ('moof' box) is not supported",
                    ));
                }
                _ => {
                    let bytes = read_box_bytes(&mut reader, position, box_size)?;
                    match header.box_type {
                        FtypBox::TYPE if ftyp_box.is_none() => {
                            ftyp_box = Some(FtypBox::decode(&bytes)?.0);
                        }
                        MoovBox::TYPE => {
                            if boxes.iter().any(|b| matches!(b, RootBox::Moov(_))) {
                                return Err(Error::invalid_data("Multiple 'moov' boxes found"));
                            }
                            let (moov_box, _) = MoovBox::decode(&bytes)?;
                            if moov_box.is_fragmented() {
                                return Err(Error::unsupported(
                                    "Fragmented MP4 ('mvex' box) is not supported",
                                )
                                .with_box_type(MoovBox::TYPE));
                            }
                            boxes.push(RootBox::Moov(moov_box));
                        }
                        _ => {
                            let (mut unknown, _) = UnknownBox::decode(&bytes)?;
                            if unknown.box_size.get() == 0 {
                                // 末尾まで続くボックスも、書き出し先では末尾になるとは限らないのでサイズを確定させる
                                unknown.box_size = BoxSize::with_payload_size(
                                    unknown.box_type,
                                    unknown.payload.len() as u64,
                                );
                            }
                            boxes.push(RootBox::Unknown(unknown));
                        }
                    }
                }
            }

            position += box_size;
            reader.seek(SeekFrom::Start(position))?;
        }

        let ftyp_box = ftyp_box.ok_or_else(|| Error::invalid_data("Missing 'ftyp' box"))?;
        if !boxes.iter().any(|b| matches!(b, RootBox::Moov(_))) {
            return Err(Error::invalid_data("Missing 'moov' box"));
        }
        Ok(Self { ftyp_box, boxes })
    }

    /// `moov` ボックスへの参照を返す
    pub fn moov_box(&self) -> Option<&MoovBox> {
        self.boxes.iter().find_map(|b| match b {
            RootBox::Moov(b) => Some(b),
            _ => None,
        })
    }

    /// `moov` ボックスへの可変参照を返す
    pub fn moov_box_mut(&mut self) -> Option<&mut MoovBox> {
        self.boxes.iter_mut().find_map(|b| match b {
            RootBox::Moov(b) => Some(b),
            _ => None,
        })
    }

    /// ファイル内の `mdat` ボックスを出現順に走査する
    pub fn mdat_boxes(&self) -> impl Iterator<Item = &MdatBox> {
        self.boxes.iter().filter_map(|b| match b {
            RootBox::Mdat(b) => Some(b),
            _ => None,
        })
    }
}

fn read_box_header<R: Read>(reader: &mut R, remaining: u64) -> Result<(BoxHeader, usize)> {
    let mut buf = Vec::with_capacity(BoxHeader::MAX_SIZE);
    reader
        .by_ref()
        .take(remaining.min(BoxHeader::MAX_SIZE as u64))
        .read_to_end(&mut buf)?;
    BoxHeader::decode(&buf).map_err(|e| {
        Error::invalid_data(format!("Failed to decode box header: {}", e.reason))
    })
}

fn read_box_bytes<R: Read + Seek>(reader: &mut R, position: u64, box_size: u64) -> Result<Vec<u8>> {
    let size = usize::try_from(box_size)
        .map_err(|_| Error::invalid_data("Box size exceeds addressable memory"))?;
    let mut bytes = vec![0; size];
    reader.seek(SeekFrom::Start(position))?;
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}
