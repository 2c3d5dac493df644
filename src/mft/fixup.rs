use byteorder::{ByteOrder, LittleEndian};

use super::errors::{ErrorKind, MftError};
use super::record::MftRecordHeader;

/// Применяет массив update sequence (fixup) к только что прочитанной
/// многосекторной записи. После успешного применения последние два байта
/// каждого сектора восстановлены из массива и внутренним смещениям
/// записи можно доверять.
pub fn apply_fixups(
    data: &mut [u8],
    header: &MftRecordHeader,
    bytes_per_sector: u16,
) -> Result<(), MftError> {
    let bps = bytes_per_sector as usize;
    if bps == 0 || data.len() % bps != 0 {
        return Err(MftError::new(
            ErrorKind::RecordSizeMisaligned,
            format!("размер записи {} не кратен сектору {}", data.len(), bps),
        ));
    }

    let usa_offset = header.update_sequence_offset as usize;
    let usa_count = header.update_sequence_count as usize;
    if usa_count < 2 {
        return Err(MftError::new(
            ErrorKind::FixupArrayTruncated,
            format!("usa_count {} меньше минимума", usa_count),
        )
        .at_offset(6));
    }
    if usa_offset + usa_count * 2 > data.len() {
        return Err(MftError::new(
            ErrorKind::FixupArrayTruncated,
            format!("массив USA {}..{} выходит за запись {}", usa_offset, usa_offset + usa_count * 2, data.len()),
        )
        .at_offset(4));
    }
    // usa_count включает сентинел: записей ровно столько, сколько секторов
    if (usa_count - 1) * bps > data.len() {
        return Err(MftError::new(
            ErrorKind::FixupArrayTruncated,
            format!("массив USA описывает {} секторов, в записи {}", usa_count - 1, data.len() / bps),
        )
        .at_offset(6));
    }

    let sentinel = LittleEndian::read_u16(&data[usa_offset..usa_offset + 2]);

    for i in 1..usa_count {
        let sector_tail = i * bps - 2;
        let stored = LittleEndian::read_u16(&data[sector_tail..sector_tail + 2]);
        if stored != sentinel {
            return Err(MftError::new(
                ErrorKind::BadSentinel,
                format!("сектор {}: ожидался сентинел {:#06X}, найден {:#06X}", i, sentinel, stored),
            )
            .at_offset(sector_tail as u64));
        }

        let replacement = LittleEndian::read_u16(&data[usa_offset + i * 2..usa_offset + i * 2 + 2]);
        LittleEndian::write_u16(&mut data[sector_tail..sector_tail + 2], replacement);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_record(usa_offset: u16, usa_count: u16, sentinel: u16, replacements: &[u16]) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(b"FILE");
        LittleEndian::write_u16(&mut buf[4..6], usa_offset);
        LittleEndian::write_u16(&mut buf[6..8], usa_count);
        LittleEndian::write_u16(&mut buf[20..22], 56);
        LittleEndian::write_u32(&mut buf[24..28], 1024);
        LittleEndian::write_u32(&mut buf[28..32], 1024);

        let off = usa_offset as usize;
        LittleEndian::write_u16(&mut buf[off..off + 2], sentinel);
        for (i, r) in replacements.iter().enumerate() {
            LittleEndian::write_u16(&mut buf[off + 2 + i * 2..off + 4 + i * 2], *r);
        }
        // На хвосты секторов ложится сентинел, как на диске
        for i in 1..=replacements.len() {
            let tail = i * 512 - 2;
            LittleEndian::write_u16(&mut buf[tail..tail + 2], sentinel);
        }
        buf
    }

    fn header_of(buf: &[u8]) -> MftRecordHeader {
        MftRecordHeader::parse(buf).unwrap()
    }

    #[test]
    fn restores_sector_tails() {
        // usa_offset=48, count=3, сентинел 0x1234, замены [0xAABB, 0xCCDD]
        let mut buf = build_record(48, 3, 0x1234, &[0xAABB, 0xCCDD]);
        buf[509] = 0x5A;
        buf[1021] = 0xA5;
        let header = header_of(&buf);

        apply_fixups(&mut buf, &header, 512).unwrap();

        assert_eq!(LittleEndian::read_u16(&buf[510..512]), 0xAABB);
        assert_eq!(LittleEndian::read_u16(&buf[1022..1024]), 0xCCDD);
        // соседние байты не тронуты
        assert_eq!(buf[509], 0x5A);
        assert_eq!(buf[1021], 0xA5);
    }

    #[test]
    fn rejects_sentinel_mismatch() {
        let mut buf = build_record(48, 3, 0x1234, &[0xAABB, 0xCCDD]);
        LittleEndian::write_u16(&mut buf[1022..1024], 0x9999); // порванная запись
        let header = header_of(&buf);

        let err = apply_fixups(&mut buf, &header, 512).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadSentinel);
        assert_eq!(err.offset, Some(1022));
    }

    #[test]
    fn rejects_misaligned_record() {
        let mut buf = build_record(48, 3, 0x1234, &[0xAABB, 0xCCDD]);
        buf.truncate(1000);
        let header = header_of(&buf);
        let err = apply_fixups(&mut buf, &header, 512).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecordSizeMisaligned);
    }

    #[test]
    fn rejects_truncated_usa() {
        let mut buf = build_record(48, 3, 0x1234, &[0xAABB, 0xCCDD]);
        LittleEndian::write_u16(&mut buf[4..6], 1020); // массив не помещается
        let header = header_of(&buf);
        let err = apply_fixups(&mut buf, &header, 512).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FixupArrayTruncated);
    }

    #[test]
    fn rejects_usa_describing_more_sectors_than_record() {
        let mut buf = build_record(48, 3, 0x1234, &[0xAABB, 0xCCDD]);
        LittleEndian::write_u16(&mut buf[6..8], 4); // секторов всего два
        let header = header_of(&buf);
        let err = apply_fixups(&mut buf, &header, 512).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FixupArrayTruncated);
    }
}
