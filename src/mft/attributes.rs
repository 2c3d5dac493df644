use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use super::errors::{ErrorKind, MftError};
use super::lazy::RunReader;
use super::record::{FileReference, MftRecordHeader};
use super::runlist::{self, DataRun};
use super::utils::filetime_to_datetime;

pub const ATTR_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_FILE_NAME: u32 = 0x30;
pub const ATTR_SECURITY_DESCRIPTOR: u32 = 0x50;
pub const ATTR_VOLUME_NAME: u32 = 0x60;
pub const ATTR_VOLUME_INFORMATION: u32 = 0x70;
pub const ATTR_DATA: u32 = 0x80;
pub const ATTR_INDEX_ROOT: u32 = 0x90;
pub const ATTR_INDEX_ALLOCATION: u32 = 0xA0;
pub const ATTR_BITMAP: u32 = 0xB0;
pub const ATTR_REPARSE_POINT: u32 = 0xC0;
pub const ATTR_EA_INFORMATION: u32 = 0xD0;
pub const ATTR_EA: u32 = 0xE0;
pub const ATTR_LOGGED_UTILITY_STREAM: u32 = 0x100;
/// Терминатор списка атрибутов.
pub const ATTR_END: u32 = 0xFFFF_FFFF;

pub const ATTR_FLAG_COMPRESSED: u16 = 0x0001;
pub const ATTR_FLAG_ENCRYPTED: u16 = 0x4000;
pub const ATTR_FLAG_SPARSE: u16 = 0x8000;

/// Минимальная длина заголовка атрибута (резидентная форма).
pub const MIN_ATTR_LEN: usize = 24;

#[derive(Debug, Clone)]
pub struct AttributeHeader {
    pub type_id: u32,
    pub length: u32,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub attribute_id: u16,
}

#[derive(Debug, Clone)]
pub struct ResidentHeader {
    pub content_size: u32,
    pub content_offset: u16,
    pub indexed: u8,
}

#[derive(Debug, Clone)]
pub struct NonResidentHeader {
    pub start_vcn: u64,
    pub end_vcn: u64,
    pub run_list_offset: u16,
    pub compression_unit_exp: u16,
    pub allocated_size: u64,
    pub actual_size: u64,
    pub initialized_size: u64,
}

#[derive(Debug, Clone)]
pub enum AttributeForm {
    Resident(ResidentHeader),
    NonResident(NonResidentHeader),
}

/// Типизированное содержимое резидентного атрибута; неизвестные типы
/// сохраняются как непрозрачные байты, а не ошибка.
#[derive(Debug)]
pub enum AttributeContent<'a> {
    StandardInformation(StandardInformation),
    FileName(FileNameAttribute),
    Data(&'a [u8]),
    Opaque(&'a [u8]),
    NonResident { actual_size: u64 },
}

/// Материализация содержимого: резидентное - срез внутри записи,
/// нерезидентное - ленивый читатель, ограниченный лимитом.
#[derive(Debug)]
pub enum ContentView<'a> {
    Resident(&'a [u8]),
    NonResident(RunReader),
}

/// View одного атрибута поверх буфера записи.
#[derive(Debug)]
pub struct Attribute<'a> {
    pub header: AttributeHeader,
    pub form: AttributeForm,
    raw: &'a [u8],
    offset_in_record: usize,
    record_index: Option<u64>,
}

impl<'a> Attribute<'a> {
    fn err(&self, kind: ErrorKind, detail: impl Into<String>, rel_offset: usize) -> MftError {
        let mut e = MftError::new(kind, detail)
            .with_attr(self.header.type_id)
            .at_offset((self.offset_in_record + rel_offset) as u64);
        if let Some(rec) = self.record_index {
            e = e.with_record(rec);
        }
        e
    }

    fn parse(
        raw: &'a [u8],
        offset_in_record: usize,
        record_index: Option<u64>,
    ) -> Result<Self, MftError> {
        let type_id = LittleEndian::read_u32(&raw[0..4]);
        let length = LittleEndian::read_u32(&raw[4..8]);
        let non_resident_flag = raw[8];
        let header = AttributeHeader {
            type_id,
            length,
            name_length: raw[9],
            name_offset: LittleEndian::read_u16(&raw[10..12]),
            flags: LittleEndian::read_u16(&raw[12..14]),
            attribute_id: LittleEndian::read_u16(&raw[14..16]),
        };

        let ctx_err = |kind: ErrorKind, detail: String, rel: usize| {
            let mut e = MftError::new(kind, detail)
                .with_attr(type_id)
                .at_offset((offset_in_record + rel) as u64);
            if let Some(rec) = record_index {
                e = e.with_record(rec);
            }
            e
        };

        let form = match non_resident_flag {
            0 => AttributeForm::Resident(ResidentHeader {
                content_size: LittleEndian::read_u32(&raw[16..20]),
                content_offset: LittleEndian::read_u16(&raw[20..22]),
                indexed: raw[22],
            }),
            1 => {
                if raw.len() < 64 {
                    return Err(ctx_err(
                        ErrorKind::MalformedAttributeList,
                        format!("нерезидентный атрибут короче хвоста: {} байт", raw.len()),
                        4,
                    ));
                }
                AttributeForm::NonResident(NonResidentHeader {
                    start_vcn: LittleEndian::read_u64(&raw[16..24]),
                    end_vcn: LittleEndian::read_u64(&raw[24..32]),
                    run_list_offset: LittleEndian::read_u16(&raw[32..34]),
                    compression_unit_exp: LittleEndian::read_u16(&raw[34..36]),
                    allocated_size: LittleEndian::read_u64(&raw[40..48]),
                    actual_size: LittleEndian::read_u64(&raw[48..56]),
                    initialized_size: LittleEndian::read_u64(&raw[56..64]),
                })
            }
            other => {
                return Err(ctx_err(
                    ErrorKind::MalformedAttributeList,
                    format!("некорректный флаг резидентности: {}", other),
                    8,
                ))
            }
        };

        Ok(Self { header, form, raw, offset_in_record, record_index })
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.form, AttributeForm::Resident(_))
    }

    pub fn has_name(&self) -> bool {
        self.header.name_length > 0
    }

    /// Имя атрибута (UTF-16 внутри записи), lossy-конвертация.
    pub fn name(&self) -> Option<String> {
        if self.header.name_length == 0 {
            return None;
        }
        let start = self.header.name_offset as usize;
        let end = start + self.header.name_length as usize * 2;
        let bytes = self.raw.get(start..end)?;
        let mut units = Vec::with_capacity(self.header.name_length as usize);
        for c in bytes.chunks_exact(2) {
            units.push(LittleEndian::read_u16(c));
        }
        Some(String::from_utf16_lossy(&units))
    }

    /// Байты резидентного содержимого.
    pub fn resident_content(&self) -> Result<&'a [u8], MftError> {
        let res = match &self.form {
            AttributeForm::Resident(r) => r,
            AttributeForm::NonResident(_) => {
                return Err(self.err(
                    ErrorKind::ResidentContentOutOfBounds,
                    "атрибут нерезидентный".to_string(),
                    8,
                ))
            }
        };
        let start = res.content_offset as usize;
        let end = start
            .checked_add(res.content_size as usize)
            .ok_or_else(|| self.err(ErrorKind::OffsetOverflow, "переполнение границ содержимого".to_string(), 16))?;
        self.raw.get(start..end).ok_or_else(|| {
            self.err(
                ErrorKind::ResidentContentOutOfBounds,
                format!("содержимое {}..{} за пределами атрибута {}", start, end, self.raw.len()),
                16,
            )
        })
    }

    /// Тегированный разбор содержимого по коду типа.
    pub fn typed_content(&self) -> Result<AttributeContent<'a>, MftError> {
        if let AttributeForm::NonResident(nr) = &self.form {
            return Ok(AttributeContent::NonResident { actual_size: nr.actual_size });
        }
        let content = self.resident_content()?;
        Ok(match self.header.type_id {
            ATTR_STANDARD_INFORMATION => {
                AttributeContent::StandardInformation(self.parse_standard_information(content)?)
            }
            ATTR_FILE_NAME => AttributeContent::FileName(self.parse_file_name(content)?),
            ATTR_DATA => AttributeContent::Data(content),
            _ => AttributeContent::Opaque(content),
        })
    }

    pub fn as_standard_information(&self) -> Result<StandardInformation, MftError> {
        if self.header.type_id != ATTR_STANDARD_INFORMATION {
            return Err(self.err(
                ErrorKind::UnknownAttributeType,
                format!("ожидался $STANDARD_INFORMATION, тип {:#X}", self.header.type_id),
                0,
            ));
        }
        self.parse_standard_information(self.resident_content()?)
    }

    pub fn as_file_name(&self) -> Result<FileNameAttribute, MftError> {
        if self.header.type_id != ATTR_FILE_NAME {
            return Err(self.err(
                ErrorKind::UnknownAttributeType,
                format!("ожидался $FILE_NAME, тип {:#X}", self.header.type_id),
                0,
            ));
        }
        self.parse_file_name(self.resident_content()?)
    }

    fn parse_standard_information(&self, data: &[u8]) -> Result<StandardInformation, MftError> {
        if data.len() < 48 {
            return Err(self.err(
                ErrorKind::ResidentContentOutOfBounds,
                format!("$STANDARD_INFORMATION короче 48 байт: {}", data.len()),
                16,
            ));
        }
        let u32_at = |off: usize| -> u32 {
            if off + 4 <= data.len() { LittleEndian::read_u32(&data[off..off + 4]) } else { 0 }
        };
        let u64_at = |off: usize| -> u64 {
            if off + 8 <= data.len() { LittleEndian::read_u64(&data[off..off + 8]) } else { 0 }
        };
        Ok(StandardInformation {
            creation_time: filetime_to_datetime(LittleEndian::read_u64(&data[0..8])),
            modified_time: filetime_to_datetime(LittleEndian::read_u64(&data[8..16])),
            mft_modified_time: filetime_to_datetime(LittleEndian::read_u64(&data[16..24])),
            accessed_time: filetime_to_datetime(LittleEndian::read_u64(&data[24..32])),
            file_attributes: u32_at(32),
            max_versions: u32_at(36),
            version: u32_at(40),
            class_id: u32_at(44),
            owner_id: u32_at(48),
            security_id: u32_at(52),
            quota_charged: u64_at(56),
            usn: u64_at(64),
        })
    }

    fn parse_file_name(&self, data: &[u8]) -> Result<FileNameAttribute, MftError> {
        // 66 байт фиксированной части до имени
        if data.len() < 66 {
            return Err(self.err(
                ErrorKind::ResidentContentOutOfBounds,
                format!("$FILE_NAME короче 66 байт: {}", data.len()),
                16,
            ));
        }
        let name_length = data[64] as usize;
        let name_end = 66 + name_length * 2;
        if data.len() < name_end {
            return Err(self.err(
                ErrorKind::ResidentContentOutOfBounds,
                format!("имя {} code units не помещается в {} байт", name_length, data.len()),
                16 + 64,
            ));
        }
        let mut units = Vec::with_capacity(name_length);
        for c in data[66..name_end].chunks_exact(2) {
            units.push(LittleEndian::read_u16(c));
        }

        Ok(FileNameAttribute {
            parent_reference: FileReference::from_raw(LittleEndian::read_u64(&data[0..8])),
            creation_time: filetime_to_datetime(LittleEndian::read_u64(&data[8..16])),
            modified_time: filetime_to_datetime(LittleEndian::read_u64(&data[16..24])),
            mft_modified_time: filetime_to_datetime(LittleEndian::read_u64(&data[24..32])),
            accessed_time: filetime_to_datetime(LittleEndian::read_u64(&data[32..40])),
            allocated_size: LittleEndian::read_u64(&data[40..48]),
            real_size: LittleEndian::read_u64(&data[48..56]),
            flags: LittleEndian::read_u32(&data[56..60]),
            reparse_tag: LittleEndian::read_u32(&data[60..64]),
            name_namespace: data[65],
            name: String::from_utf16_lossy(&units),
        })
    }

    /// Декодированный runlist нерезидентного атрибута с проверкой
    /// покрытия VCN-диапазона.
    pub fn run_list(&self) -> Result<Vec<DataRun>, MftError> {
        let nr = match &self.form {
            AttributeForm::NonResident(nr) => nr,
            AttributeForm::Resident(_) => {
                return Err(self.err(
                    ErrorKind::RunListHeaderInvalid,
                    "runlist у резидентного атрибута".to_string(),
                    8,
                ))
            }
        };
        let off = nr.run_list_offset as usize;
        if off < 64 || off >= self.raw.len() {
            return Err(self.err(
                ErrorKind::RunListHeaderInvalid,
                format!("смещение runlist {} вне атрибута {}", off, self.raw.len()),
                32,
            ));
        }
        let runs = runlist::decode_runs(&self.raw[off..], nr.start_vcn).map_err(|e| {
            let mut e = e.with_attr(self.header.type_id);
            if let Some(rec) = self.record_index {
                e = e.with_record(rec);
            }
            e
        })?;
        runlist::check_vcn_coverage(&runs, nr.start_vcn, nr.end_vcn).map_err(|e| {
            let mut e = e.with_attr(self.header.type_id);
            if let Some(rec) = self.record_index {
                e = e.with_record(rec);
            }
            e
        })?;
        Ok(runs)
    }

    /// Содержимое атрибута, ограниченное `limit` байтами.
    pub fn content(&self, limit: u64, bytes_per_cluster: u64) -> Result<ContentView<'a>, MftError> {
        match &self.form {
            AttributeForm::Resident(_) => {
                let bytes = self.resident_content()?;
                let take = (limit as usize).min(bytes.len());
                Ok(ContentView::Resident(&bytes[..take]))
            }
            AttributeForm::NonResident(nr) => {
                if self.header.flags & (ATTR_FLAG_COMPRESSED | ATTR_FLAG_ENCRYPTED) != 0 {
                    return Err(self.err(
                        ErrorKind::Unsupported,
                        format!("сжатый/шифрованный атрибут (флаги {:#06X})", self.header.flags),
                        12,
                    ));
                }
                let runs = self.run_list()?;
                let bound = limit.min(nr.actual_size);
                Ok(ContentView::NonResident(RunReader::new(runs, bytes_per_cluster, bound)))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StandardInformation {
    pub creation_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
    pub mft_modified_time: DateTime<Utc>,
    pub accessed_time: DateTime<Utc>,
    pub file_attributes: u32,
    pub max_versions: u32,
    pub version: u32,
    pub class_id: u32,
    pub owner_id: u32,
    pub security_id: u32,
    pub quota_charged: u64,
    pub usn: u64,
}

#[derive(Debug, Clone)]
pub struct FileNameAttribute {
    pub parent_reference: FileReference,
    pub creation_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
    pub mft_modified_time: DateTime<Utc>,
    pub accessed_time: DateTime<Utc>,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub reparse_tag: u32,
    pub name_namespace: u8,
    pub name: String,
}

/// Запись $ATTRIBUTE_LIST: куда (в какую запись MFT) вынесен атрибут.
#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub type_id: u32,
    pub entry_length: u16,
    pub name_length: u8,
    pub name_offset: u8,
    pub start_vcn: u64,
    pub base_reference: FileReference,
    pub attribute_id: u16,
}

pub const MIN_ATTRIBUTE_LIST_ENTRY: usize = 26;

pub fn parse_attribute_list(data: &[u8]) -> Result<Vec<AttributeListEntry>, MftError> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos + MIN_ATTRIBUTE_LIST_ENTRY <= data.len() {
        let type_id = LittleEndian::read_u32(&data[pos..pos + 4]);
        if type_id == 0 {
            break;
        }
        let entry_length = LittleEndian::read_u16(&data[pos + 4..pos + 6]);
        let entry_len = entry_length as usize;
        if entry_len < MIN_ATTRIBUTE_LIST_ENTRY || pos + entry_len > data.len() {
            return Err(MftError::new(
                ErrorKind::MalformedAttributeList,
                format!("запись $ATTRIBUTE_LIST длиной {} на смещении {}", entry_len, pos),
            )
            .with_attr(ATTR_ATTRIBUTE_LIST)
            .at_offset(pos as u64 + 4));
        }

        let name_length = data[pos + 6];
        let name_offset = data[pos + 7];
        if name_offset as usize + name_length as usize * 2 > entry_len {
            return Err(MftError::new(
                ErrorKind::MalformedAttributeList,
                format!("имя UTF-16 выходит за запись списка (смещение {})", pos),
            )
            .with_attr(ATTR_ATTRIBUTE_LIST)
            .at_offset(pos as u64 + 7));
        }

        entries.push(AttributeListEntry {
            type_id,
            entry_length,
            name_length,
            name_offset,
            start_vcn: LittleEndian::read_u64(&data[pos + 8..pos + 16]),
            base_reference: FileReference::from_raw(LittleEndian::read_u64(&data[pos + 16..pos + 24])),
            attribute_id: LittleEndian::read_u16(&data[pos + 24..pos + 26]),
        });
        pos += entry_len;
    }

    Ok(entries)
}

/// Итератор по потоку атрибутов уже исправленной (fixup) записи.
pub struct AttributeIter<'a> {
    record: &'a [u8],
    offset: usize,
    used_end: usize,
    max_attrs: usize,
    yielded: usize,
    record_index: Option<u64>,
    done: bool,
}

impl<'a> AttributeIter<'a> {
    pub fn new(record: &'a [u8], header: &MftRecordHeader, record_index: Option<u64>) -> Self {
        Self {
            record,
            offset: header.first_attribute_offset as usize,
            used_end: (header.real_size as usize).min(record.len()),
            max_attrs: header.next_attribute_id.saturating_sub(1) as usize,
            yielded: 0,
            record_index,
            done: false,
        }
    }

    fn malformed(&self, detail: String, offset: usize) -> MftError {
        let mut e = MftError::new(ErrorKind::MalformedAttributeList, detail).at_offset(offset as u64);
        if let Some(rec) = self.record_index {
            e = e.with_record(rec);
        }
        e
    }
}

impl<'a> Iterator for AttributeIter<'a> {
    type Item = Result<Attribute<'a>, MftError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // count ограничен next_attribute_id - 1 и сентинелом, что раньше
        if self.yielded >= self.max_attrs {
            self.done = true;
            return None;
        }
        if self.offset + 4 > self.used_end {
            self.done = true;
            return Some(Err(self.malformed(
                format!("поток атрибутов дошел до used_size {} без терминатора", self.used_end),
                self.offset,
            )));
        }

        let type_id = LittleEndian::read_u32(&self.record[self.offset..self.offset + 4]);
        if type_id == ATTR_END {
            self.done = true;
            return None;
        }

        if self.offset + 8 > self.used_end {
            self.done = true;
            return Some(Err(self.malformed(
                "заголовок атрибута обрезан".to_string(),
                self.offset,
            )));
        }

        let length = LittleEndian::read_u32(&self.record[self.offset + 4..self.offset + 8]) as usize;
        if length < MIN_ATTR_LEN || length % 8 != 0 {
            self.done = true;
            return Some(Err(self.malformed(
                format!("длина атрибута {} (тип {:#X})", length, type_id),
                self.offset + 4,
            )));
        }
        let end = match self.offset.checked_add(length) {
            Some(e) if e <= self.used_end => e,
            _ => {
                self.done = true;
                return Some(Err(self.malformed(
                    format!("атрибут {:#X} длиной {} выходит за used_size {}", type_id, length, self.used_end),
                    self.offset + 4,
                )));
            }
        };

        let raw = &self.record[self.offset..end];
        let parsed = Attribute::parse(raw, self.offset, self.record_index);
        if parsed.is_err() {
            self.done = true;
        }
        self.offset = end;
        self.yielded += 1;
        Some(parsed)
    }
}
