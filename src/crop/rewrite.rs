use crate::{
    Either, Encode, Mp4File,
    boxes::{ElstBox, MdatBox, MoovBox, RootBox},
};

use super::{BytePlan, CropError, TerminalSample, TrackBoundary, terminal::rescale};

/// 出力ファイルでの `mdat` ペイロードの開始位置を求める
///
/// 先頭の `mdat` より前に書き出されるボックスを実際にエンコードしたサイズから計算する
pub fn media_data_start(file: &Mp4File) -> Result<u64, CropError> {
    let mut position = file.ftyp_box.encode_to_vec()?.len() as u64;
    for b in &file.boxes {
        match b {
            RootBox::Mdat(_) => return Ok(position + MdatBox::HEADER_SIZE),
            RootBox::Moov(b) => position += b.encode_to_vec()?.len() as u64,
            RootBox::Unknown(b) => position += b.encode_to_vec()?.len() as u64,
        }
    }
    Err(CropError::MissingMdat {
        reason: "no 'mdat' box in input".to_owned(),
    })
}

/// チャンクオフセットを、計画した詰め直し後の値に書き換える
///
/// 計画上のオフセットは元ファイルの最初のチャンク位置 (`base_offset`) を起点としているので、
/// 出力での `mdat` ペイロード開始位置 `payload_start` との差分を全エントリーに一律に加える。
/// `stco` と `co64` の種別は入力のまま維持される。
pub fn rewrite_chunk_offsets(
    moov_box: &mut MoovBox,
    plan: &BytePlan,
    payload_start: u64,
) -> Result<(), CropError> {
    let delta = payload_start as i128 - plan.base_offset as i128;
    tracing::debug!(delta = delta as i64, payload_start, "rewriting chunk offsets");

    for (trak_box, offsets) in moov_box.trak_boxes.iter_mut().zip(&plan.chunk_offsets) {
        let track_id = trak_box.track_id();
        let shifted = offsets
            .iter()
            .map(|&offset| {
                u64::try_from(offset as i128 + delta).map_err(|_| CropError::Internal {
                    reason: format!("chunk offset {offset} of track {track_id} moved before 0"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let stbl_box = trak_box.stbl_box_mut();
        let current_len = match &stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.len(),
            Either::B(b) => b.chunk_offsets.len(),
        };
        if current_len != shifted.len() {
            return Err(CropError::Internal {
                reason: format!(
                    "track {track_id} has {current_len} chunks, but {} offsets were planned",
                    shifted.len()
                ),
            });
        }

        match &mut stbl_box.stco_or_co64_box {
            Either::A(b) => {
                b.chunk_offsets = shifted
                    .into_iter()
                    .map(|offset| {
                        u32::try_from(offset)
                            .map_err(|_| CropError::ChunkOffsetOverflow { track_id, offset })
                    })
                    .collect::<Result<_, _>>()?;
            }
            Either::B(b) => b.chunk_offsets = shifted,
        }
    }
    Ok(())
}

/// ムービー、トラック、メディアの尺と編集リストを、切り詰め後の内容に合わせて更新する
///
/// どのトラックからもサンプルが削られない場合は何も変更しない。
/// 編集リストは末尾のエントリーから削った尺の分だけ短くし、尺を使い切ったエントリーは削除する
/// （最後の一つは尺 0 として残す）。
pub fn rewrite_durations(
    moov_box: &mut MoovBox,
    terminal: &TerminalSample,
    boundaries: &[TrackBoundary],
) {
    if !boundaries.iter().any(TrackBoundary::is_trimmed) {
        tracing::debug!("no samples removed, durations are left unchanged");
        return;
    }

    let movie_timescale = moov_box.mvhd_box.timescale;
    moov_box.mvhd_box.duration =
        rescale(terminal.end_time, movie_timescale.get(), terminal.timescale);

    for (trak_box, boundary) in moov_box.trak_boxes.iter_mut().zip(boundaries) {
        if !boundary.is_trimmed() {
            continue;
        }

        let mdhd_box = &mut trak_box.mdia_box.mdhd_box;
        let trimmed_media = mdhd_box.duration.saturating_sub(boundary.end_time);
        mdhd_box.duration = boundary.end_time;

        let trimmed = rescale(trimmed_media, movie_timescale.get(), boundary.timescale);
        trak_box.tkhd_box.duration = trak_box.tkhd_box.duration.saturating_sub(trimmed);
        if let Some(elst_box) = trak_box
            .edts_box
            .as_mut()
            .and_then(|b| b.elst_box.as_mut())
        {
            shorten_edit_list(elst_box, trimmed);
        }

        tracing::debug!(
            track_id = boundary.track_id,
            media_duration = boundary.end_time,
            track_duration = trak_box.tkhd_box.duration,
            "updated track duration"
        );
    }
}

fn shorten_edit_list(elst_box: &mut ElstBox, mut trimmed: u64) {
    while trimmed > 0 {
        let len = elst_box.entries.len();
        let Some(last) = elst_box.entries.last_mut() else {
            break;
        };
        if last.edit_duration > trimmed {
            last.edit_duration -= trimmed;
            break;
        }
        trimmed -= last.edit_duration;
        if len == 1 {
            last.edit_duration = 0;
            break;
        }
        elst_box.entries.pop();
    }
}
