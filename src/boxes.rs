//! ボックス群を定義するためのモジュール
use std::io::{Read, Seek, SeekFrom, Write};

use crate::{BaseBox, BoxHeader, BoxSize, BoxType, Decode, Encode, Error, Result};

pub use crate::boxes_moov_tree::{
    Co64Box, CttsBox, CttsEntry, EdtsBox, ElstBox, ElstEntry, HdlrBox, MdhdBox, MdiaBox, MinfBox,
    MoovBox, MvhdBox, SdtpBox, SdtpEntry, StblBox, StcoBox, StscBox, StscEntry, StsdBox, StssBox,
    StszBox, SttsBox, SttsEntry, TkhdBox, TrakBox,
};

pub(crate) fn with_box_type<F, T>(box_type: BoxType, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    f().map_err(|e| e.with_box_type(box_type))
}

pub(crate) fn check_mandatory_box<T>(maybe_box: Option<T>, expected: &str, parent: &str) -> Result<T> {
    maybe_box.ok_or_else(|| {
        Error::invalid_data(format!(
            "Missing mandatory '{expected}' box in '{parent}' box"
        ))
    })
}

/// [`FtypBox`] で使われるブランド定義
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Brand([u8; 4]);

impl Brand {
    /// [ISO/IEC 14496-12] `isom` ブランド
    pub const ISOM: Self = Self::new(*b"isom");

    /// [ISO/IEC 14496-14] `mp41` ブランド
    pub const MP41: Self = Self::new(*b"mp41");

    /// バイト列を渡して、対応するブランドを作成する
    pub const fn new(brand: [u8; 4]) -> Self {
        Self(brand)
    }

    /// このブランドを表すバイト列を返す
    pub const fn get(self) -> [u8; 4] {
        self.0
    }
}

impl std::fmt::Debug for Brand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Ok(s) = std::str::from_utf8(&self.0) {
            f.debug_tuple("Brand").field(&s).finish()
        } else {
            f.debug_tuple("Brand").field(&self.0).finish()
        }
    }
}

impl Encode for Brand {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Decode for Brand {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (bytes, size) = <[u8; 4]>::decode(buf)?;
        Ok((Self(bytes), size))
    }
}

/// [ISO/IEC 14496-12] FileTypeBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl FtypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ftyp");
}

impl Encode for FtypBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.major_brand.encode(&mut buf[offset..])?;
        offset += self.minor_version.encode(&mut buf[offset..])?;
        for brand in &self.compatible_brands {
            offset += brand.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for FtypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let major_brand = Brand::decode_at(payload, &mut offset)?;
            let minor_version = u32::decode_at(payload, &mut offset)?;
            let mut compatible_brands = Vec::new();
            while offset + 4 <= payload.len() {
                compatible_brands.push(Brand::decode_at(payload, &mut offset)?);
            }

            Ok((
                Self {
                    major_brand,
                    minor_version,
                    compatible_brands,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for FtypBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// このライブラリが個別には扱わないボックス
///
/// ペイロードはバイト列のまま保持され、エンコード時にはそのまま書き戻される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct UnknownBox {
    pub box_type: BoxType,
    pub box_size: BoxSize,
    pub payload: Vec<u8>,
}

impl Encode for UnknownBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader {
            box_type: self.box_type,
            box_size: self.box_size,
        };
        let mut offset = header.encode(buf)?;
        offset += self.payload.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for UnknownBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        Ok((
            Self {
                box_type: header.box_type,
                box_size: header.box_size,
                payload: payload.to_vec(),
            },
            header.external_size() + payload.len(),
        ))
    }
}

impl BaseBox for UnknownBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }
}

/// [ISO/IEC 14496-12] MediaDataBox class
///
/// ペイロードはメモリ上には読み込まず、ファイル内での位置とサイズだけを保持する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MdatBox {
    /// 入力ファイル内でのヘッダー
    pub header: BoxHeader,

    /// ペイロードの先頭のファイル内での絶対位置
    pub payload_offset: u64,

    /// ペイロードのバイト数
    pub payload_size: u64,
}

impl MdatBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdat");

    /// 32 ビットのサイズフィールドを持つ `mdat` ヘッダーのバイト数
    pub const HEADER_SIZE: u64 = 8;

    /// ペイロードの末尾（排他的）のファイル内での絶対位置を返す
    pub fn payload_end(&self) -> u64 {
        self.payload_offset + self.payload_size
    }

    /// `[offset, offset + length)` の範囲がペイロード内に収まっているかどうかを判定する
    pub fn contains(&self, offset: u64, length: u64) -> bool {
        offset >= self.payload_offset
            && offset
                .checked_add(length)
                .is_some_and(|end| end <= self.payload_end())
    }

    /// 指定されたペイロードサイズを持つ 32 ビットサイズの `mdat` ヘッダーを作成する
    ///
    /// ヘッダーを含めたサイズが 32 ビットに収まらない場合には [`None`] が返される
    pub fn compact_header(payload_size: u64) -> Option<BoxHeader> {
        let size = payload_size.checked_add(Self::HEADER_SIZE)?;
        let size = u32::try_from(size).ok()?;
        Some(BoxHeader {
            box_type: Self::TYPE,
            box_size: BoxSize::U32(size),
        })
    }

    /// 入力ファイルの `src_offset` から `length` バイトを `writer` へとコピーする
    ///
    /// 返り値は実際にコピーされたバイト数で、入力が途中で終わっている場合には `length` より小さくなる
    pub fn copy_range<R, W>(
        &self,
        src_offset: u64,
        length: u64,
        mut reader: R,
        mut writer: W,
    ) -> std::io::Result<u64>
    where
        R: Read + Seek,
        W: Write,
    {
        if !self.contains(src_offset, length) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "range {src_offset}+{length} is outside of mdat payload {}..{}",
                    self.payload_offset,
                    self.payload_end()
                ),
            ));
        }
        reader.seek(SeekFrom::Start(src_offset))?;
        std::io::copy(&mut reader.take(length), &mut writer)
    }
}

impl BaseBox for MdatBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// MP4 ファイルのトップレベルに位置するボックスを表す列挙型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum RootBox {
    Moov(MoovBox),
    Mdat(MdatBox),
    Unknown(UnknownBox),
}

impl RootBox {
    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            RootBox::Moov(b) => b,
            RootBox::Mdat(b) => b,
            RootBox::Unknown(b) => b,
        }
    }
}

impl BaseBox for RootBox {
    fn box_type(&self) -> BoxType {
        self.inner_box().box_type()
    }
}
