use byteorder::{ByteOrder, LittleEndian};

use super::attributes::AttributeIter;
use super::errors::{ErrorKind, MftError};

pub const RECORD_FLAG_IN_USE: u16 = 0x01;
pub const RECORD_FLAG_DIRECTORY: u16 = 0x02;

/// Минимальный размер заголовка записи MFT.
pub const RECORD_HEADER_LEN: usize = 48;

/// 64-битная файловая ссылка: 48 бит индекса записи + 16 бит sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileReference {
    pub record_index: u64,
    pub sequence_number: u16,
}

impl FileReference {
    pub fn from_raw(raw: u64) -> Self {
        Self {
            record_index: raw & 0x0000_FFFF_FFFF_FFFF,
            sequence_number: (raw >> 48) as u16,
        }
    }

    pub fn to_raw(self) -> u64 {
        ((self.sequence_number as u64) << 48) | (self.record_index & 0x0000_FFFF_FFFF_FFFF)
    }

    pub fn is_null(self) -> bool {
        self.to_raw() == 0
    }
}

#[derive(Debug, Clone)]
pub struct MftRecordHeader {
    pub signature: String, // "FILE", "BAAD" или "INDX"
    pub update_sequence_offset: u16,
    pub update_sequence_count: u16,
    pub logfile_sequence_number: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub first_attribute_offset: u16,
    pub flags: u16,
    pub real_size: u32,
    pub allocated_size: u32,
    pub base_record_reference: FileReference,
    pub next_attribute_id: u16,
    pub record_number: u32,
}

impl MftRecordHeader {
    pub fn parse(data: &[u8]) -> Result<Self, MftError> {
        if data.len() < RECORD_HEADER_LEN {
            return Err(MftError::new(
                ErrorKind::BadMagic,
                format!("запись короче заголовка: {} байт", data.len()),
            )
            .at_offset(0));
        }

        let sig = String::from_utf8_lossy(&data[0..4]).into_owned();
        if sig != "FILE" && sig != "BAAD" && sig != "INDX" {
            return Err(MftError::new(
                ErrorKind::BadMagic,
                format!("неизвестная сигнатура: {:?}", &data[0..4]),
            )
            .at_offset(0));
        }

        Ok(Self {
            signature: sig,
            update_sequence_offset: LittleEndian::read_u16(&data[4..6]),
            update_sequence_count: LittleEndian::read_u16(&data[6..8]),
            logfile_sequence_number: LittleEndian::read_u64(&data[8..16]),
            sequence_number: LittleEndian::read_u16(&data[16..18]),
            hard_link_count: LittleEndian::read_u16(&data[18..20]),
            first_attribute_offset: LittleEndian::read_u16(&data[20..22]),
            flags: LittleEndian::read_u16(&data[22..24]),
            real_size: LittleEndian::read_u32(&data[24..28]),
            allocated_size: LittleEndian::read_u32(&data[28..32]),
            base_record_reference: FileReference::from_raw(LittleEndian::read_u64(&data[32..40])),
            next_attribute_id: LittleEndian::read_u16(&data[40..42]),
            record_number: LittleEndian::read_u32(&data[44..48]),
        })
    }

    /// Границы заголовка относительно полного размера записи.
    pub fn validate(&self, record_size: usize) -> Result<(), MftError> {
        if self.real_size as usize > record_size || self.real_size > self.allocated_size {
            return Err(MftError::new(
                ErrorKind::BadMagic,
                format!(
                    "real_size {} вне границ (allocated {}, запись {})",
                    self.real_size, self.allocated_size, record_size
                ),
            )
            .at_offset(24));
        }
        if (self.real_size as usize) < RECORD_HEADER_LEN {
            return Err(MftError::new(
                ErrorKind::BadMagic,
                format!("real_size {} меньше заголовка", self.real_size),
            )
            .at_offset(24));
        }
        let first_attr = self.first_attribute_offset as usize;
        if first_attr < RECORD_HEADER_LEN || first_attr >= self.real_size as usize {
            return Err(MftError::new(
                ErrorKind::BadMagic,
                format!("first_attribute_offset {} вне [{}, {})", first_attr, RECORD_HEADER_LEN, self.real_size),
            )
            .at_offset(20));
        }
        let usa_end = self.update_sequence_offset as usize + 2 * self.update_sequence_count as usize;
        if usa_end > self.real_size as usize {
            return Err(MftError::new(
                ErrorKind::FixupArrayTruncated,
                format!("массив USA ({}..{}) выходит за real_size {}", self.update_sequence_offset, usa_end, self.real_size),
            )
            .at_offset(4));
        }
        Ok(())
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & RECORD_FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & RECORD_FLAG_DIRECTORY != 0
    }

    pub fn is_base_record(&self) -> bool {
        self.base_record_reference.is_null()
    }

    pub fn file_reference(&self) -> FileReference {
        FileReference {
            record_index: self.record_number as u64,
            sequence_number: self.sequence_number,
        }
    }
}

/// Одна запись MFT: буфер уже после fixup, заголовок разобран.
/// Walker отдает записи по значению; все view на атрибуты живут
/// не дольше этого буфера.
#[derive(Debug)]
pub struct MftRecord {
    pub index: u64,
    pub header: MftRecordHeader,
    pub buffer: Vec<u8>,
}

impl MftRecord {
    pub fn attributes(&self) -> AttributeIter<'_> {
        AttributeIter::new(&self.buffer, &self.header, Some(self.index))
    }

    /// Терминатор 0xFFFFFFFF стоит сразу за first_attribute_offset:
    /// атрибутов нет, но запись корректна.
    pub fn has_empty_attribute_list(&self) -> bool {
        let off = self.header.first_attribute_offset as usize;
        match self.buffer.get(off..off + 4) {
            Some(w) => LittleEndian::read_u32(w) == super::attributes::ATTR_END,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(sig: &[u8; 4]) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(sig);
        LittleEndian::write_u16(&mut buf[4..6], 48); // usa offset
        LittleEndian::write_u16(&mut buf[6..8], 3); // usa count
        LittleEndian::write_u64(&mut buf[8..16], 77);
        LittleEndian::write_u16(&mut buf[16..18], 2); // seq
        LittleEndian::write_u16(&mut buf[18..20], 1); // links
        LittleEndian::write_u16(&mut buf[20..22], 56); // first attr
        LittleEndian::write_u16(&mut buf[22..24], RECORD_FLAG_IN_USE);
        LittleEndian::write_u32(&mut buf[24..28], 416); // real
        LittleEndian::write_u32(&mut buf[28..32], 1024); // allocated
        LittleEndian::write_u64(&mut buf[32..40], 0); // base ref
        LittleEndian::write_u16(&mut buf[40..42], 5); // next attr id
        LittleEndian::write_u32(&mut buf[44..48], 12); // record number
        buf
    }

    #[test]
    fn parses_file_header() {
        let buf = build_header(b"FILE");
        let h = MftRecordHeader::parse(&buf).unwrap();
        assert_eq!(h.signature, "FILE");
        assert_eq!(h.update_sequence_offset, 48);
        assert_eq!(h.update_sequence_count, 3);
        assert_eq!(h.logfile_sequence_number, 77);
        assert_eq!(h.first_attribute_offset, 56);
        assert_eq!(h.real_size, 416);
        assert_eq!(h.record_number, 12);
        assert!(h.is_in_use());
        assert!(!h.is_directory());
        assert!(h.is_base_record());
        h.validate(1024).unwrap();
    }

    #[test]
    fn rejects_garbage_signature() {
        let buf = build_header(b"XXXX");
        let err = MftRecordHeader::parse(&buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadMagic);
    }

    #[test]
    fn validate_rejects_oversized_real_size() {
        let mut buf = build_header(b"FILE");
        LittleEndian::write_u32(&mut buf[24..28], 2048);
        let h = MftRecordHeader::parse(&buf).unwrap();
        assert!(h.validate(1024).is_err());
    }

    #[test]
    fn validate_rejects_attr_offset_inside_header() {
        let mut buf = build_header(b"FILE");
        LittleEndian::write_u16(&mut buf[20..22], 16);
        let h = MftRecordHeader::parse(&buf).unwrap();
        assert!(h.validate(1024).is_err());
    }

    #[test]
    fn validate_rejects_usa_past_real_size() {
        let mut buf = build_header(b"FILE");
        LittleEndian::write_u16(&mut buf[6..8], 400);
        let h = MftRecordHeader::parse(&buf).unwrap();
        let err = h.validate(1024).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FixupArrayTruncated);
    }

    #[test]
    fn file_reference_roundtrip() {
        // split(join(i, s)) == (i, s) для i < 2^48, s < 2^16
        let cases = [
            (0u64, 0u16),
            (5, 5),
            (0x0000_FFFF_FFFF_FFFF, 0xFFFF),
            (0x1234_5678_9ABC, 0x00FF),
        ];
        for (idx, seq) in cases {
            let reference = FileReference { record_index: idx, sequence_number: seq };
            let back = FileReference::from_raw(reference.to_raw());
            assert_eq!(back.record_index, idx);
            assert_eq!(back.sequence_number, seq);
        }
    }

    #[test]
    fn file_reference_from_raw_splits_fields() {
        let r = FileReference::from_raw(0x0002_0000_0000_000C);
        assert_eq!(r.record_index, 12);
        assert_eq!(r.sequence_number, 2);
    }
}
