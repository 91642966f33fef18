//! moov とその下に配置されるボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use std::num::NonZeroU32;

use crate::{
    BaseBox, BoxHeader, BoxType, Decode, Either, Encode, Error, FixedPointNumber, FullBox,
    FullBoxFlags, FullBoxHeader, Mp4FileTime, Result, Uint,
    boxes::{UnknownBox, check_mandatory_box, with_box_type},
};

/// フルボックスのヘッダーとペイロードをデコードする
///
/// `f` にはフルボックスヘッダー、ペイロード、ヘッダー直後のオフセットが渡される
fn decode_full_box<T, F>(buf: &[u8], box_type: BoxType, f: F) -> Result<(T, usize)>
where
    F: FnOnce(FullBoxHeader, &[u8], &mut usize) -> Result<T>,
{
    with_box_type(box_type, || {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        header.box_type.expect(box_type)?;

        let mut offset = 0;
        let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
        let value = f(full_header, payload, &mut offset)?;
        Ok((value, header.external_size() + payload.len()))
    })
}

/// コンテナボックスをデコードする
///
/// 子ボックスごとに `f` が呼ばれ、`f` が `false` を返した子ボックスは [`UnknownBox`] として扱われる。
/// 返り値は、未知の子ボックス群とボックス全体のバイト数
fn decode_children<F>(buf: &[u8], box_type: BoxType, mut f: F) -> Result<(Vec<UnknownBox>, usize)>
where
    F: FnMut(BoxType, &[u8], &mut usize) -> Result<bool>,
{
    let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
    header.box_type.expect(box_type)?;

    let mut offset = 0;
    let mut unknown_boxes = Vec::new();
    while offset < payload.len() {
        let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
        if !f(child_header.box_type, payload, &mut offset)? {
            unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
        }
    }
    Ok((unknown_boxes, header.external_size() + payload.len()))
}

/// ボックスのペイロードを先頭から順に書き込むためのカーソル
struct BoxWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl BoxWriter<'_> {
    fn put<T: Encode + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.offset += value.encode(&mut self.buf[self.offset..])?;
        Ok(())
    }
}

/// ヘッダーに続けて `f` でペイロードを書き込み、最後にボックスサイズを確定させる
fn write_box<F>(buf: &mut [u8], box_type: BoxType, f: F) -> Result<usize>
where
    F: FnOnce(&mut BoxWriter<'_>) -> Result<()>,
{
    let header = BoxHeader::new_variable_size(box_type);
    let offset = header.encode(buf)?;
    let mut writer = BoxWriter {
        buf: &mut *buf,
        offset,
    };
    f(&mut writer)?;
    let size = writer.offset;
    header.finalize_box_size(&mut buf[..size])?;
    Ok(size)
}

/// [`write_box()`] のフルボックス版
fn write_full_box<B, F>(buf: &mut [u8], b: &B, f: F) -> Result<usize>
where
    B: FullBox,
    F: FnOnce(&mut BoxWriter<'_>) -> Result<()>,
{
    write_box(buf, b.box_type(), |w| {
        w.put(&FullBoxHeader::from_box(b))?;
        f(w)
    })
}

/// `count` が示すエントリー数がペイロードに収まるかを確認する
///
/// 壊れたファイルで巨大なメモリ確保が走らないようにするためのもの
fn check_entry_count(count: u32, entry_size: usize, remaining: usize) -> Result<usize> {
    let count = count as usize;
    if count.saturating_mul(entry_size) > remaining {
        return Err(Error::invalid_data(format!(
            "Entry count {count} exceeds the box payload ({remaining} bytes remaining)"
        )));
    }
    Ok(count)
}

/// [ISO/IEC 14496-12] MovieBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MoovBox {
    pub mvhd_box: MvhdBox,
    pub trak_boxes: Vec<TrakBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MoovBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"moov");

    /// フラグメント化された MP4 であることを示す `mvex` ボックスの種別
    pub const MVEX_TYPE: BoxType = BoxType::Normal(*b"mvex");

    /// `mvex` ボックスを含んでいるかどうか（フラグメント化された MP4 かどうか）を判定する
    pub fn is_fragmented(&self) -> bool {
        self.unknown_boxes
            .iter()
            .any(|b| b.box_type == Self::MVEX_TYPE)
    }
}

impl Encode for MoovBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_box(buf, Self::TYPE, |w| {
            w.put(&self.mvhd_box)?;
            for b in &self.trak_boxes {
                w.put(b)?;
            }
            for b in &self.unknown_boxes {
                w.put(b)?;
            }
            Ok(())
        })
    }
}

impl Decode for MoovBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let mut mvhd_box = None;
            let mut trak_boxes = Vec::new();
            let (unknown_boxes, size) = decode_children(buf, Self::TYPE, |ty, payload, offset| {
                match ty {
                    MvhdBox::TYPE if mvhd_box.is_none() => {
                        mvhd_box = Some(MvhdBox::decode_at(payload, offset)?);
                    }
                    TrakBox::TYPE => trak_boxes.push(TrakBox::decode_at(payload, offset)?),
                    _ => return Ok(false),
                }
                Ok(true)
            })?;

            Ok((
                Self {
                    mvhd_box: check_mandatory_box(mvhd_box, "mvhd", "moov")?,
                    trak_boxes,
                    unknown_boxes,
                },
                size,
            ))
        })
    }
}

impl BaseBox for MoovBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// [ISO/IEC 14496-12] MovieHeaderBox class (親: [`MoovBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MvhdBox {
    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub timescale: NonZeroU32,
    pub duration: u64,
    pub rate: FixedPointNumber<i16, u16>,
    pub volume: FixedPointNumber<i8, u8>,
    pub matrix: [i32; 9],
    pub next_track_id: u32,
}

impl MvhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mvhd");

    /// [`MvhdBox::rate`] のデフォルト値（通常の再生速度）
    pub const DEFAULT_RATE: FixedPointNumber<i16, u16> = FixedPointNumber::new(1, 0);

    /// [`MvhdBox::volume`] のデフォルト値（最大音量）
    pub const DEFAULT_VOLUME: FixedPointNumber<i8, u8> = FixedPointNumber::new(1, 0);

    /// [`MvhdBox::matrix`] のデフォルト値
    pub const DEFAULT_MATRIX: [i32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];
}

impl Encode for MvhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            if self.full_box_version() == 1 {
                w.put(&self.creation_time.as_secs())?;
                w.put(&self.modification_time.as_secs())?;
                w.put(&self.timescale)?;
                w.put(&self.duration)?;
            } else {
                w.put(&(self.creation_time.as_secs() as u32))?;
                w.put(&(self.modification_time.as_secs() as u32))?;
                w.put(&self.timescale)?;
                w.put(&(self.duration as u32))?;
            }
            w.put(&self.rate)?;
            w.put(&self.volume)?;
            w.put(&[0u8; 2 + 4 * 2])?;
            w.put(&self.matrix)?;
            w.put(&[0u8; 4 * 6])?;
            w.put(&self.next_track_id)?;
            Ok(())
        })
    }
}

impl Decode for MvhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |full_header, payload, offset| {
            let mut this = Self {
                creation_time: Mp4FileTime::default(),
                modification_time: Mp4FileTime::default(),
                timescale: NonZeroU32::MIN,
                duration: 0,
                rate: Self::DEFAULT_RATE,
                volume: Self::DEFAULT_VOLUME,
                matrix: Self::DEFAULT_MATRIX,
                next_track_id: 0,
            };

            if full_header.version == 1 {
                this.creation_time = u64::decode_at(payload, offset).map(Mp4FileTime::from_secs)?;
                this.modification_time =
                    u64::decode_at(payload, offset).map(Mp4FileTime::from_secs)?;
                this.timescale = NonZeroU32::decode_at(payload, offset)?;
                this.duration = u64::decode_at(payload, offset)?;
            } else {
                this.creation_time =
                    u32::decode_at(payload, offset).map(|v| Mp4FileTime::from_secs(v as u64))?;
                this.modification_time =
                    u32::decode_at(payload, offset).map(|v| Mp4FileTime::from_secs(v as u64))?;
                this.timescale = NonZeroU32::decode_at(payload, offset)?;
                this.duration = u32::decode_at(payload, offset).map(|v| v as u64)?;
            }

            this.rate = FixedPointNumber::decode_at(payload, offset)?;
            this.volume = FixedPointNumber::decode_at(payload, offset)?;
            let _ = <[u8; 2 + 4 * 2]>::decode_at(payload, offset)?;
            this.matrix = <[i32; 9]>::decode_at(payload, offset)?;
            let _ = <[u8; 4 * 6]>::decode_at(payload, offset)?;
            this.next_track_id = u32::decode_at(payload, offset)?;
            Ok(this)
        })
    }
}

impl BaseBox for MvhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for MvhdBox {
    fn full_box_version(&self) -> u8 {
        if self.creation_time.as_secs() > u32::MAX as u64
            || self.modification_time.as_secs() > u32::MAX as u64
            || self.duration > u32::MAX as u64
        {
            1
        } else {
            0
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackBox class (親: [`MoovBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrakBox {
    pub tkhd_box: TkhdBox,
    pub edts_box: Option<EdtsBox>,
    pub mdia_box: MdiaBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl TrakBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"trak");

    /// トラック ID を返す
    pub fn track_id(&self) -> u32 {
        self.tkhd_box.track_id
    }

    /// メディアのタイムスケールを返す
    pub fn timescale(&self) -> NonZeroU32 {
        self.mdia_box.mdhd_box.timescale
    }

    /// 映像トラックかどうかを判定する
    pub fn is_video(&self) -> bool {
        self.mdia_box.hdlr_box.handler_type == HdlrBox::HANDLER_TYPE_VIDE
    }

    /// 音声トラックかどうかを判定する
    pub fn is_audio(&self) -> bool {
        self.mdia_box.hdlr_box.handler_type == HdlrBox::HANDLER_TYPE_SOUN
    }

    /// サンプルテーブルへの参照を返す
    pub fn stbl_box(&self) -> &StblBox {
        &self.mdia_box.minf_box.stbl_box
    }

    /// サンプルテーブルへの可変参照を返す
    pub fn stbl_box_mut(&mut self) -> &mut StblBox {
        &mut self.mdia_box.minf_box.stbl_box
    }
}

impl Encode for TrakBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_box(buf, Self::TYPE, |w| {
            w.put(&self.tkhd_box)?;
            if let Some(b) = &self.edts_box {
                w.put(b)?;
            }
            w.put(&self.mdia_box)?;
            for b in &self.unknown_boxes {
                w.put(b)?;
            }
            Ok(())
        })
    }
}

impl Decode for TrakBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let mut tkhd_box = None;
            let mut edts_box = None;
            let mut mdia_box = None;
            let (unknown_boxes, size) = decode_children(buf, Self::TYPE, |ty, payload, offset| {
                match ty {
                    TkhdBox::TYPE if tkhd_box.is_none() => {
                        tkhd_box = Some(TkhdBox::decode_at(payload, offset)?);
                    }
                    EdtsBox::TYPE if edts_box.is_none() => {
                        edts_box = Some(EdtsBox::decode_at(payload, offset)?);
                    }
                    MdiaBox::TYPE if mdia_box.is_none() => {
                        mdia_box = Some(MdiaBox::decode_at(payload, offset)?);
                    }
                    _ => return Ok(false),
                }
                Ok(true)
            })?;

            Ok((
                Self {
                    tkhd_box: check_mandatory_box(tkhd_box, "tkhd", "trak")?,
                    edts_box,
                    mdia_box: check_mandatory_box(mdia_box, "mdia", "trak")?,
                    unknown_boxes,
                },
                size,
            ))
        })
    }
}

impl BaseBox for TrakBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// [ISO/IEC 14496-12] TrackHeaderBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TkhdBox {
    pub flag_track_enabled: bool,
    pub flag_track_in_movie: bool,
    pub flag_track_in_preview: bool,
    pub flag_track_size_is_aspect_ratio: bool,

    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub track_id: u32,
    pub duration: u64,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: FixedPointNumber<i8, u8>,
    pub matrix: [i32; 9],
    pub width: FixedPointNumber<i16, u16>,
    pub height: FixedPointNumber<i16, u16>,
}

impl TkhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tkhd");

    /// [`TkhdBox::matrix`] のデフォルト値
    pub const DEFAULT_MATRIX: [i32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];
}

impl Encode for TkhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            if self.full_box_version() == 1 {
                w.put(&self.creation_time.as_secs())?;
                w.put(&self.modification_time.as_secs())?;
                w.put(&self.track_id)?;
                w.put(&[0u8; 4])?;
                w.put(&self.duration)?;
            } else {
                w.put(&(self.creation_time.as_secs() as u32))?;
                w.put(&(self.modification_time.as_secs() as u32))?;
                w.put(&self.track_id)?;
                w.put(&[0u8; 4])?;
                w.put(&(self.duration as u32))?;
            }
            w.put(&[0u8; 4 * 2])?;
            w.put(&self.layer)?;
            w.put(&self.alternate_group)?;
            w.put(&self.volume)?;
            w.put(&[0u8; 2])?;
            w.put(&self.matrix)?;
            w.put(&self.width)?;
            w.put(&self.height)?;
            Ok(())
        })
    }
}

impl Decode for TkhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |full_header, payload, offset| {
            let (creation_time, modification_time, track_id, duration);
            if full_header.version == 1 {
                creation_time = u64::decode_at(payload, offset).map(Mp4FileTime::from_secs)?;
                modification_time = u64::decode_at(payload, offset).map(Mp4FileTime::from_secs)?;
                track_id = u32::decode_at(payload, offset)?;
                let _ = <[u8; 4]>::decode_at(payload, offset)?;
                duration = u64::decode_at(payload, offset)?;
            } else {
                creation_time =
                    u32::decode_at(payload, offset).map(|v| Mp4FileTime::from_secs(v as u64))?;
                modification_time =
                    u32::decode_at(payload, offset).map(|v| Mp4FileTime::from_secs(v as u64))?;
                track_id = u32::decode_at(payload, offset)?;
                let _ = <[u8; 4]>::decode_at(payload, offset)?;
                duration = u32::decode_at(payload, offset).map(|v| v as u64)?;
            }

            let _ = <[u8; 4 * 2]>::decode_at(payload, offset)?;
            Ok(Self {
                flag_track_enabled: full_header.flags.is_set(0),
                flag_track_in_movie: full_header.flags.is_set(1),
                flag_track_in_preview: full_header.flags.is_set(2),
                flag_track_size_is_aspect_ratio: full_header.flags.is_set(3),
                creation_time,
                modification_time,
                track_id,
                duration,
                layer: i16::decode_at(payload, offset)?,
                alternate_group: i16::decode_at(payload, offset)?,
                volume: {
                    let volume = FixedPointNumber::decode_at(payload, offset)?;
                    let _ = <[u8; 2]>::decode_at(payload, offset)?;
                    volume
                },
                matrix: <[i32; 9]>::decode_at(payload, offset)?,
                width: FixedPointNumber::decode_at(payload, offset)?,
                height: FixedPointNumber::decode_at(payload, offset)?,
            })
        })
    }
}

impl BaseBox for TkhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for TkhdBox {
    fn full_box_version(&self) -> u8 {
        if self.creation_time.as_secs() > u32::MAX as u64
            || self.modification_time.as_secs() > u32::MAX as u64
            || self.duration > u32::MAX as u64
        {
            1
        } else {
            0
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::from_flags([
            (0, self.flag_track_enabled),
            (1, self.flag_track_in_movie),
            (2, self.flag_track_in_preview),
            (3, self.flag_track_size_is_aspect_ratio),
        ])
    }
}

/// [ISO/IEC 14496-12] EditBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EdtsBox {
    pub elst_box: Option<ElstBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl EdtsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"edts");
}

impl Encode for EdtsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_box(buf, Self::TYPE, |w| {
            if let Some(b) = &self.elst_box {
                w.put(b)?;
            }
            for b in &self.unknown_boxes {
                w.put(b)?;
            }
            Ok(())
        })
    }
}

impl Decode for EdtsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let mut elst_box = None;
            let (unknown_boxes, size) = decode_children(buf, Self::TYPE, |ty, payload, offset| {
                match ty {
                    ElstBox::TYPE if elst_box.is_none() => {
                        elst_box = Some(ElstBox::decode_at(payload, offset)?);
                    }
                    _ => return Ok(false),
                }
                Ok(true)
            })?;

            Ok((
                Self {
                    elst_box,
                    unknown_boxes,
                },
                size,
            ))
        })
    }
}

impl BaseBox for EdtsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// [`ElstBox`] に含まれるエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ElstEntry {
    pub edit_duration: u64,
    pub media_time: i64,
    pub media_rate: FixedPointNumber<i16, i16>,
}

impl ElstEntry {
    /// 空編集（指定尺だけ何も再生しない区間）を表す `media_time` の値
    pub const EMPTY_EDIT_MEDIA_TIME: i64 = -1;
}

/// [ISO/IEC 14496-12] EditListBox class (親: [`EdtsBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ElstBox {
    pub entries: Vec<ElstEntry>,
}

impl ElstBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"elst");
}

impl Encode for ElstBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            let version = self.full_box_version();
            w.put(&(self.entries.len() as u32))?;
            for entry in &self.entries {
                if version == 1 {
                    w.put(&entry.edit_duration)?;
                    w.put(&entry.media_time)?;
                } else {
                    w.put(&(entry.edit_duration as u32))?;
                    w.put(&(entry.media_time as i32))?;
                }
                w.put(&entry.media_rate)?;
            }
            Ok(())
        })
    }
}

impl Decode for ElstBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |full_header, payload, offset| {
            let entry_size = if full_header.version == 1 { 20 } else { 12 };
            let count = u32::decode_at(payload, offset)?;
            let count = check_entry_count(count, entry_size, payload.len() - *offset)?;

            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let (edit_duration, media_time) = if full_header.version == 1 {
                    (
                        u64::decode_at(payload, offset)?,
                        i64::decode_at(payload, offset)?,
                    )
                } else {
                    (
                        u32::decode_at(payload, offset)? as u64,
                        i32::decode_at(payload, offset)? as i64,
                    )
                };
                let media_rate = FixedPointNumber::decode_at(payload, offset)?;
                entries.push(ElstEntry {
                    edit_duration,
                    media_time,
                    media_rate,
                });
            }
            Ok(Self { entries })
        })
    }
}

impl BaseBox for ElstBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for ElstBox {
    fn full_box_version(&self) -> u8 {
        let large = self.entries.iter().any(|x| {
            u32::try_from(x.edit_duration).is_err() || i32::try_from(x.media_time).is_err()
        });
        if large { 1 } else { 0 }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] MediaBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdiaBox {
    pub mdhd_box: MdhdBox,
    pub hdlr_box: HdlrBox,
    pub minf_box: MinfBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MdiaBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdia");
}

impl Encode for MdiaBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_box(buf, Self::TYPE, |w| {
            w.put(&self.mdhd_box)?;
            w.put(&self.hdlr_box)?;
            w.put(&self.minf_box)?;
            for b in &self.unknown_boxes {
                w.put(b)?;
            }
            Ok(())
        })
    }
}

impl Decode for MdiaBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let mut mdhd_box = None;
            let mut hdlr_box = None;
            let mut minf_box = None;
            let (unknown_boxes, size) = decode_children(buf, Self::TYPE, |ty, payload, offset| {
                match ty {
                    MdhdBox::TYPE if mdhd_box.is_none() => {
                        mdhd_box = Some(MdhdBox::decode_at(payload, offset)?);
                    }
                    HdlrBox::TYPE if hdlr_box.is_none() => {
                        hdlr_box = Some(HdlrBox::decode_at(payload, offset)?);
                    }
                    MinfBox::TYPE if minf_box.is_none() => {
                        minf_box = Some(MinfBox::decode_at(payload, offset)?);
                    }
                    _ => return Ok(false),
                }
                Ok(true)
            })?;

            Ok((
                Self {
                    mdhd_box: check_mandatory_box(mdhd_box, "mdhd", "mdia")?,
                    hdlr_box: check_mandatory_box(hdlr_box, "hdlr", "mdia")?,
                    minf_box: check_mandatory_box(minf_box, "minf", "mdia")?,
                    unknown_boxes,
                },
                size,
            ))
        })
    }
}

impl BaseBox for MdiaBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// [ISO/IEC 14496-12] MediaHeaderBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdhdBox {
    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub timescale: NonZeroU32,
    pub duration: u64,

    /// ISO-639-2/T language code
    pub language: [u8; 3],
}

impl MdhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdhd");

    /// 未定義を表す言語コード
    pub const LANGUAGE_UNDEFINED: [u8; 3] = *b"und";
}

impl Encode for MdhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            if self.full_box_version() == 1 {
                w.put(&self.creation_time.as_secs())?;
                w.put(&self.modification_time.as_secs())?;
                w.put(&self.timescale)?;
                w.put(&self.duration)?;
            } else {
                w.put(&(self.creation_time.as_secs() as u32))?;
                w.put(&(self.modification_time.as_secs() as u32))?;
                w.put(&self.timescale)?;
                w.put(&(self.duration as u32))?;
            }

            let mut language: u16 = 0;
            for l in &self.language {
                let Some(code) = l.checked_sub(0x60) else {
                    return Err(Error::invalid_input(format!(
                        "Invalid language code: {:?}",
                        self.language
                    )));
                };
                language = (language << 5) | code as u16;
            }
            w.put(&language)?;
            w.put(&[0u8; 2])?;
            Ok(())
        })
    }
}

impl Decode for MdhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |full_header, payload, offset| {
            let (creation_time, modification_time, timescale, duration);
            if full_header.version == 1 {
                creation_time = u64::decode_at(payload, offset).map(Mp4FileTime::from_secs)?;
                modification_time = u64::decode_at(payload, offset).map(Mp4FileTime::from_secs)?;
                timescale = NonZeroU32::decode_at(payload, offset)?;
                duration = u64::decode_at(payload, offset)?;
            } else {
                creation_time =
                    u32::decode_at(payload, offset).map(|v| Mp4FileTime::from_secs(v as u64))?;
                modification_time =
                    u32::decode_at(payload, offset).map(|v| Mp4FileTime::from_secs(v as u64))?;
                timescale = NonZeroU32::decode_at(payload, offset)?;
                duration = u32::decode_at(payload, offset).map(|v| v as u64)?;
            }

            let language = u16::decode_at(payload, offset)?;
            let language = [
                ((language >> 10) & 0b11111) as u8 + 0x60,
                ((language >> 5) & 0b11111) as u8 + 0x60,
                (language & 0b11111) as u8 + 0x60,
            ];
            let _ = <[u8; 2]>::decode_at(payload, offset)?;

            Ok(Self {
                creation_time,
                modification_time,
                timescale,
                duration,
                language,
            })
        })
    }
}

impl BaseBox for MdhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for MdhdBox {
    fn full_box_version(&self) -> u8 {
        if self.creation_time.as_secs() > u32::MAX as u64
            || self.modification_time.as_secs() > u32::MAX as u64
            || self.duration > u32::MAX as u64
        {
            1
        } else {
            0
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] HandlerBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct HdlrBox {
    pub handler_type: [u8; 4],

    /// ハンドラ名
    ///
    /// 中身が UTF-8 ではなかったり、null 終端ではない MP4 ファイルも普通に存在するため、
    /// ここでは単なるバイト列として扱っている
    pub name: Vec<u8>,
}

impl HdlrBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"hdlr");

    /// 音声用のハンドラー種別
    pub const HANDLER_TYPE_SOUN: [u8; 4] = *b"soun";

    /// 映像用のハンドラー種別
    pub const HANDLER_TYPE_VIDE: [u8; 4] = *b"vide";
}

impl Encode for HdlrBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            w.put(&[0u8; 4])?;
            w.put(&self.handler_type)?;
            w.put(&[0u8; 4 * 3])?;
            w.put(&self.name)?;
            Ok(())
        })
    }
}

impl Decode for HdlrBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let _ = <[u8; 4]>::decode_at(payload, offset)?;
            let handler_type = <[u8; 4]>::decode_at(payload, offset)?;
            let _ = <[u8; 4 * 3]>::decode_at(payload, offset)?;
            let name = payload[*offset..].to_vec();
            *offset = payload.len();
            Ok(Self { handler_type, name })
        })
    }
}

impl BaseBox for HdlrBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for HdlrBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] MediaInformationBox class (親: [`MdiaBox`])
///
/// `vmhd` / `smhd` / `dinf` などのボックスは [`UnknownBox`] として保持され、
/// エンコード時には [`StblBox`] よりも前に書き出される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MinfBox {
    pub stbl_box: StblBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MinfBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"minf");
}

impl Encode for MinfBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_box(buf, Self::TYPE, |w| {
            for b in &self.unknown_boxes {
                w.put(b)?;
            }
            w.put(&self.stbl_box)?;
            Ok(())
        })
    }
}

impl Decode for MinfBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let mut stbl_box = None;
            let (unknown_boxes, size) = decode_children(buf, Self::TYPE, |ty, payload, offset| {
                match ty {
                    StblBox::TYPE if stbl_box.is_none() => {
                        stbl_box = Some(StblBox::decode_at(payload, offset)?);
                    }
                    _ => return Ok(false),
                }
                Ok(true)
            })?;

            Ok((
                Self {
                    stbl_box: check_mandatory_box(stbl_box, "stbl", "minf")?,
                    unknown_boxes,
                },
                size,
            ))
        })
    }
}

impl BaseBox for MinfBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// [ISO/IEC 14496-12] SampleTableBox class (親: [`MinfBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StblBox {
    pub stsd_box: StsdBox,
    pub stts_box: SttsBox,
    pub ctts_box: Option<CttsBox>,
    pub stss_box: Option<StssBox>,
    pub sdtp_box: Option<SdtpBox>,
    pub stsc_box: StscBox,
    pub stsz_box: StszBox,
    pub stco_or_co64_box: Either<StcoBox, Co64Box>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl StblBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stbl");

    /// チャンクオフセットの一覧を 64 ビット値として返す
    pub fn chunk_offsets(&self) -> Vec<u64> {
        match &self.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.iter().map(|&v| v as u64).collect(),
            Either::B(b) => b.chunk_offsets.clone(),
        }
    }
}

impl Encode for StblBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_box(buf, Self::TYPE, |w| {
            w.put(&self.stsd_box)?;
            w.put(&self.stts_box)?;
            if let Some(b) = &self.ctts_box {
                w.put(b)?;
            }
            if let Some(b) = &self.stss_box {
                w.put(b)?;
            }
            if let Some(b) = &self.sdtp_box {
                w.put(b)?;
            }
            w.put(&self.stsc_box)?;
            w.put(&self.stsz_box)?;
            w.put(&self.stco_or_co64_box)?;
            for b in &self.unknown_boxes {
                w.put(b)?;
            }
            Ok(())
        })
    }
}

impl Decode for StblBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let mut stsd_box = None;
            let mut stts_box = None;
            let mut ctts_box = None;
            let mut stss_box = None;
            let mut sdtp_box = None;
            let mut stsc_box = None;
            let mut stsz_box = None;
            let mut stco_box = None;
            let mut co64_box = None;
            let (unknown_boxes, size) = decode_children(buf, Self::TYPE, |ty, payload, offset| {
                match ty {
                    StsdBox::TYPE if stsd_box.is_none() => {
                        stsd_box = Some(StsdBox::decode_at(payload, offset)?);
                    }
                    SttsBox::TYPE if stts_box.is_none() => {
                        stts_box = Some(SttsBox::decode_at(payload, offset)?);
                    }
                    CttsBox::TYPE if ctts_box.is_none() => {
                        ctts_box = Some(CttsBox::decode_at(payload, offset)?);
                    }
                    StssBox::TYPE if stss_box.is_none() => {
                        stss_box = Some(StssBox::decode_at(payload, offset)?);
                    }
                    SdtpBox::TYPE if sdtp_box.is_none() => {
                        sdtp_box = Some(SdtpBox::decode_at(payload, offset)?);
                    }
                    StscBox::TYPE if stsc_box.is_none() => {
                        stsc_box = Some(StscBox::decode_at(payload, offset)?);
                    }
                    StszBox::TYPE if stsz_box.is_none() => {
                        stsz_box = Some(StszBox::decode_at(payload, offset)?);
                    }
                    StcoBox::TYPE if stco_box.is_none() => {
                        stco_box = Some(StcoBox::decode_at(payload, offset)?);
                    }
                    Co64Box::TYPE if co64_box.is_none() => {
                        co64_box = Some(Co64Box::decode_at(payload, offset)?);
                    }
                    _ => return Ok(false),
                }
                Ok(true)
            })?;

            Ok((
                Self {
                    stsd_box: check_mandatory_box(stsd_box, "stsd", "stbl")?,
                    stts_box: check_mandatory_box(stts_box, "stts", "stbl")?,
                    ctts_box,
                    stss_box,
                    sdtp_box,
                    stsc_box: check_mandatory_box(stsc_box, "stsc", "stbl")?,
                    stsz_box: check_mandatory_box(stsz_box, "stsz", "stbl")?,
                    stco_or_co64_box: check_mandatory_box(
                        stco_box.map(Either::A).or(co64_box.map(Either::B)),
                        "stco' or 'co64",
                        "stbl",
                    )?,
                    unknown_boxes,
                },
                size,
            ))
        })
    }
}

impl BaseBox for StblBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// [ISO/IEC 14496-12] SampleDescriptionBox class (親: [`StblBox`])
///
/// サンプルエントリーの中身は解釈せず、バイト列のまま保持する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StsdBox {
    pub entries: Vec<UnknownBox>,
}

impl StsdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsd");
}

impl Encode for StsdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            w.put(&(self.entries.len() as u32))?;
            for b in &self.entries {
                w.put(b)?;
            }
            Ok(())
        })
    }
}

impl Decode for StsdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let entry_count = u32::decode_at(payload, offset)?;
            let entry_count = check_entry_count(entry_count, 8, payload.len() - *offset)?;

            let mut entries = Vec::with_capacity(entry_count);
            for _ in 0..entry_count {
                entries.push(UnknownBox::decode_at(payload, offset)?);
            }
            Ok(Self { entries })
        })
    }
}

impl BaseBox for StsdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for StsdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`SttsBox`] が保持するエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// [ISO/IEC 14496-12] TimeToSampleBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsBox {
    pub entries: Vec<SttsEntry>,
}

impl SttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stts");

    /// サンプル群の尺を走査するイテレーターを受け取って、対応する [`SttsBox`] インスタンスを作成する
    pub fn from_sample_deltas<I>(sample_deltas: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut entries = Vec::<SttsEntry>::new();
        for sample_delta in sample_deltas {
            if let Some(last) = entries.last_mut()
                && last.sample_delta == sample_delta
            {
                last.sample_count += 1;
                continue;
            }
            entries.push(SttsEntry {
                sample_count: 1,
                sample_delta,
            });
        }
        Self { entries }
    }

    /// エントリー群が表すサンプルの総数を返す
    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }

    /// エントリー群が表す尺の合計を返す
    pub fn total_duration(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.sample_count as u64 * e.sample_delta as u64)
            .sum()
    }
}

impl Encode for SttsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            w.put(&(self.entries.len() as u32))?;
            for entry in &self.entries {
                w.put(&entry.sample_count)?;
                w.put(&entry.sample_delta)?;
            }
            Ok(())
        })
    }
}

impl Decode for SttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let count = u32::decode_at(payload, offset)?;
            let count = check_entry_count(count, 8, payload.len() - *offset)?;

            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(SttsEntry {
                    sample_count: u32::decode_at(payload, offset)?,
                    sample_delta: u32::decode_at(payload, offset)?,
                });
            }
            Ok(Self { entries })
        })
    }
}

impl BaseBox for SttsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for SttsBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`CttsBox`] が保持するエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CttsEntry {
    pub sample_count: u32,
    pub sample_offset: i32,
}

/// [ISO/IEC 14496-12] CompositionOffsetBox class (親: [`StblBox`])
///
/// バージョン 0 の符号なしオフセットも [`i32`] としてビット列のまま保持する。
/// オフセットの符号の解釈は [`CttsBox::version`] で決まるので、デコード時のバージョンがそのままエンコードに使われる
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CttsBox {
    /// 0 ならオフセットは符号なし、1 なら符号あり
    pub version: u8,
    pub entries: Vec<CttsEntry>,
}

impl CttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ctts");

    /// エントリー群が表すサンプルの総数を返す
    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }

    /// オフセット群を受け取って、負の値を含む場合にだけバージョン 1 となる [`CttsBox`] インスタンスを作成する
    pub fn from_entries(entries: Vec<CttsEntry>) -> Self {
        let version = u8::from(entries.iter().any(|e| e.sample_offset < 0));
        Self { version, entries }
    }
}

impl Encode for CttsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            w.put(&(self.entries.len() as u32))?;
            for entry in &self.entries {
                w.put(&entry.sample_count)?;
                w.put(&entry.sample_offset)?;
            }
            Ok(())
        })
    }
}

impl Decode for CttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |full_header, payload, offset| {
            if full_header.version > 1 {
                return Err(Error::unsupported(format!(
                    "Unsupported 'ctts' version: {}",
                    full_header.version
                )));
            }
            let count = u32::decode_at(payload, offset)?;
            let count = check_entry_count(count, 8, payload.len() - *offset)?;

            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(CttsEntry {
                    sample_count: u32::decode_at(payload, offset)?,
                    // バージョン 0 と 1 はビット列としては同じで、符号の解釈だけが異なる
                    sample_offset: i32::decode_at(payload, offset)?,
                });
            }
            Ok(Self {
                version: full_header.version,
                entries,
            })
        })
    }
}

impl BaseBox for CttsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for CttsBox {
    fn full_box_version(&self) -> u8 {
        self.version
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`StscBox`] が保持するエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscEntry {
    pub first_chunk: NonZeroU32,
    pub sample_per_chunk: u32,
    pub sample_description_index: NonZeroU32,
}

/// [ISO/IEC 14496-12] SampleToChunkBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscBox {
    pub entries: Vec<StscEntry>,
}

impl StscBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsc");
}

impl Encode for StscBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            w.put(&(self.entries.len() as u32))?;
            for entry in &self.entries {
                w.put(&entry.first_chunk)?;
                w.put(&entry.sample_per_chunk)?;
                w.put(&entry.sample_description_index)?;
            }
            Ok(())
        })
    }
}

impl Decode for StscBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let count = u32::decode_at(payload, offset)?;
            let count = check_entry_count(count, 12, payload.len() - *offset)?;

            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(StscEntry {
                    first_chunk: NonZeroU32::decode_at(payload, offset)?,
                    sample_per_chunk: u32::decode_at(payload, offset)?,
                    sample_description_index: NonZeroU32::decode_at(payload, offset)?,
                });
            }
            Ok(Self { entries })
        })
    }
}

impl BaseBox for StscBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for StscBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] SampleSizeBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StszBox {
    Fixed {
        sample_size: NonZeroU32,
        sample_count: u32,
    },
    Variable {
        entry_sizes: Vec<u32>,
    },
}

impl StszBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsz");

    /// 宣言されているサンプル数を返す
    pub fn sample_count(&self) -> u32 {
        match self {
            StszBox::Fixed { sample_count, .. } => *sample_count,
            StszBox::Variable { entry_sizes } => entry_sizes.len() as u32,
        }
    }
}

impl Encode for StszBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            match self {
                StszBox::Fixed {
                    sample_size,
                    sample_count,
                } => {
                    w.put(&sample_size.get())?;
                    w.put(sample_count)?;
                }
                StszBox::Variable { entry_sizes } => {
                    w.put(&0u32)?;
                    w.put(&(entry_sizes.len() as u32))?;
                    for size in entry_sizes {
                        w.put(size)?;
                    }
                }
            }
            Ok(())
        })
    }
}

impl Decode for StszBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let sample_size = u32::decode_at(payload, offset)?;
            let sample_count = u32::decode_at(payload, offset)?;

            if let Some(sample_size) = NonZeroU32::new(sample_size) {
                return Ok(Self::Fixed {
                    sample_size,
                    sample_count,
                });
            }

            let count = check_entry_count(sample_count, 4, payload.len() - *offset)?;
            let mut entry_sizes = Vec::with_capacity(count);
            for _ in 0..count {
                entry_sizes.push(u32::decode_at(payload, offset)?);
            }
            Ok(Self::Variable { entry_sizes })
        })
    }
}

impl BaseBox for StszBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for StszBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] ChunkOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StcoBox {
    pub chunk_offsets: Vec<u32>,
}

impl StcoBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stco");
}

impl Encode for StcoBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            w.put(&(self.chunk_offsets.len() as u32))?;
            for chunk_offset in &self.chunk_offsets {
                w.put(chunk_offset)?;
            }
            Ok(())
        })
    }
}

impl Decode for StcoBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let count = u32::decode_at(payload, offset)?;
            let count = check_entry_count(count, 4, payload.len() - *offset)?;

            let mut chunk_offsets = Vec::with_capacity(count);
            for _ in 0..count {
                chunk_offsets.push(u32::decode_at(payload, offset)?);
            }
            Ok(Self { chunk_offsets })
        })
    }
}

impl BaseBox for StcoBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for StcoBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] ChunkLargeOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Co64Box {
    pub chunk_offsets: Vec<u64>,
}

impl Co64Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"co64");
}

impl Encode for Co64Box {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            w.put(&(self.chunk_offsets.len() as u32))?;
            for chunk_offset in &self.chunk_offsets {
                w.put(chunk_offset)?;
            }
            Ok(())
        })
    }
}

impl Decode for Co64Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let count = u32::decode_at(payload, offset)?;
            let count = check_entry_count(count, 8, payload.len() - *offset)?;

            let mut chunk_offsets = Vec::with_capacity(count);
            for _ in 0..count {
                chunk_offsets.push(u64::decode_at(payload, offset)?);
            }
            Ok(Self { chunk_offsets })
        })
    }
}

impl BaseBox for Co64Box {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for Co64Box {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] SyncSampleBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StssBox {
    pub sample_numbers: Vec<NonZeroU32>,
}

impl StssBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stss");
}

impl Encode for StssBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            w.put(&(self.sample_numbers.len() as u32))?;
            for sample_number in &self.sample_numbers {
                w.put(sample_number)?;
            }
            Ok(())
        })
    }
}

impl Decode for StssBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let count = u32::decode_at(payload, offset)?;
            let count = check_entry_count(count, 4, payload.len() - *offset)?;

            let mut sample_numbers = Vec::with_capacity(count);
            for _ in 0..count {
                sample_numbers.push(NonZeroU32::decode_at(payload, offset)?);
            }
            Ok(Self { sample_numbers })
        })
    }
}

impl BaseBox for StssBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for StssBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`SdtpBox`] が保持するエントリー（サンプルごとの依存関係フラグ）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SdtpEntry {
    pub is_leading: Uint<u8, 2, 6>,
    pub sample_depends_on: Uint<u8, 2, 4>,
    pub sample_is_depended_on: Uint<u8, 2, 2>,
    pub sample_has_redundancy: Uint<u8, 2>,
}

impl SdtpEntry {
    /// 1 バイトのフラグ値から [`SdtpEntry`] を作成する
    pub fn from_byte(b: u8) -> Self {
        Self {
            is_leading: Uint::from_bits(b),
            sample_depends_on: Uint::from_bits(b),
            sample_is_depended_on: Uint::from_bits(b),
            sample_has_redundancy: Uint::from_bits(b),
        }
    }

    /// このエントリーに対応する 1 バイトのフラグ値を返す
    pub fn to_byte(self) -> u8 {
        self.is_leading.to_bits()
            | self.sample_depends_on.to_bits()
            | self.sample_is_depended_on.to_bits()
            | self.sample_has_redundancy.to_bits()
    }
}

/// [ISO/IEC 14496-12] SampleDependencyTypeBox class (親: [`StblBox`])
///
/// エントリー数はボックス内には記録されず、ペイロードの残りバイト数から決まる
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SdtpBox {
    pub entries: Vec<SdtpEntry>,
}

impl SdtpBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"sdtp");
}

impl Encode for SdtpBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        write_full_box(buf, self, |w| {
            for entry in &self.entries {
                w.put(&entry.to_byte())?;
            }
            Ok(())
        })
    }
}

impl Decode for SdtpBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_full_box(buf, Self::TYPE, |_full_header, payload, offset| {
            let entries = payload[*offset..]
                .iter()
                .copied()
                .map(SdtpEntry::from_byte)
                .collect();
            *offset = payload.len();
            Ok(Self { entries })
        })
    }
}

impl BaseBox for SdtpBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

impl FullBox for SdtpBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}
