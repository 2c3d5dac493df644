use std::collections::BTreeSet;
use std::io::{Read, Seek, SeekFrom};

use super::attributes::{
    parse_attribute_list, AttributeForm, ATTR_ATTRIBUTE_LIST, ATTR_DATA,
};
use super::boot::NtfsBootSector;
use super::errors::{ErrorKind, MftError};
use super::fixup::apply_fixups;
use super::lazy::RunReader;
use super::record::{FileReference, MftRecord, MftRecordHeader};
use super::runlist::DataRun;

/// Потолок на материализацию нерезидентного $ATTRIBUTE_LIST.
const MAX_ATTRIBUTE_LIST_BYTES: u64 = 1024 * 1024;

/// Последовательный обход MFT. Владеет устройством эксклюзивно:
/// два walker'а поверх одного дескриптора не поддерживаются.
#[derive(Debug)]
pub struct MftWalker<R> {
    dev: R,
    boot: NtfsBootSector,
    record_size: usize,
    mft_data: RunReader,
    next_index: u64,
    total_records: u64,
    pub skipped_baad: u64,
    pub skipped_unused: u64,
    pub skipped_extension: u64,
}

impl<R: Read + Seek> MftWalker<R> {
    /// Бутстрап циклической самоссылки $MFT: одно абсолютное чтение
    /// записи 0 по mft_lcn * bytes_per_cluster, из нее runlist $DATA,
    /// дальше все чтения MFT идут через этот runlist.
    pub fn new(mut dev: R, boot: NtfsBootSector) -> Result<Self, MftError> {
        let record_size = boot.file_record_size_bytes()? as usize;
        let bps = boot.bytes_per_sector;
        let bpc = boot.bytes_per_cluster();

        let mft_offset = boot.mft_byte_offset()?;
        let mut buf = vec![0u8; record_size];
        dev.seek(SeekFrom::Start(mft_offset))
            .map_err(|e| MftError::from(e).with_record(0).at_offset(mft_offset))?;
        dev.read_exact(&mut buf)
            .map_err(|e| MftError::from(e).with_record(0).at_offset(mft_offset))?;

        let header = MftRecordHeader::parse(&buf).map_err(|e| e.with_record(0))?;
        if header.signature != "FILE" {
            return Err(MftError::new(
                ErrorKind::BadMagic,
                format!("запись 0 имеет сигнатуру {:?}", header.signature),
            )
            .with_record(0)
            .at_offset(0));
        }
        header.validate(record_size).map_err(|e| e.with_record(0))?;
        apply_fixups(&mut buf, &header, bps).map_err(|e| e.with_record(0))?;
        if header.record_number != 0 {
            return Err(MftError::new(
                ErrorKind::BadMagic,
                format!("по адресу $MFT лежит запись {}", header.record_number),
            )
            .with_record(0)
            .at_offset(44));
        }

        let record0 = MftRecord { index: 0, header, buffer: buf };

        // Невымянный $DATA записи 0 и записи его $ATTRIBUTE_LIST
        let mut base_runs: Vec<DataRun> = Vec::new();
        let mut actual_size: u64 = 0;
        let mut list_entries = Vec::new();

        for attr in record0.attributes() {
            let attr = attr.map_err(|e| e.with_record(0))?;
            match attr.header.type_id {
                ATTR_DATA if !attr.has_name() => {
                    let nr = match &attr.form {
                        AttributeForm::NonResident(nr) => nr,
                        AttributeForm::Resident(_) => {
                            return Err(MftError::new(
                                ErrorKind::Unsupported,
                                "резидентный $DATA у $MFT".to_string(),
                            )
                            .with_record(0)
                            .with_attr(ATTR_DATA))
                        }
                    };
                    if nr.start_vcn == 0 {
                        actual_size = nr.actual_size;
                    }
                    base_runs.extend(attr.run_list()?);
                }
                ATTR_ATTRIBUTE_LIST => {
                    let bytes = match &attr.form {
                        AttributeForm::Resident(_) => attr.resident_content()?.to_vec(),
                        AttributeForm::NonResident(nr) => {
                            // список атрибутов сам лежит в кластерах
                            let runs = attr.run_list()?;
                            let bound = nr.actual_size.min(MAX_ATTRIBUTE_LIST_BYTES);
                            let mut reader = RunReader::new(runs, bpc, bound);
                            let status = reader.ensure_loaded(&mut dev, bound)?;
                            if !status.is_satisfied() {
                                return Err(MftError::new(
                                    ErrorKind::TruncatedRead,
                                    "нерезидентный $ATTRIBUTE_LIST не дочитан".to_string(),
                                )
                                .with_record(0)
                                .with_attr(ATTR_ATTRIBUTE_LIST));
                            }
                            reader.loaded()[..bound as usize].to_vec()
                        }
                    };
                    list_entries = parse_attribute_list(&bytes).map_err(|e| e.with_record(0))?;
                }
                _ => {}
            }
        }

        if base_runs.is_empty() {
            return Err(MftError::new(
                ErrorKind::MalformedAttributeList,
                "у записи 0 нет нерезидентного $DATA".to_string(),
            )
            .with_record(0)
            .with_attr(ATTR_DATA));
        }

        // $DATA, вынесенный в записи-расширения, дочитываем через базовые runs
        let mut all_runs = base_runs.clone();
        let mut base_reader = RunReader::new(base_runs, bpc, u64::MAX);
        for entry in &list_entries {
            if entry.type_id != ATTR_DATA || entry.name_length != 0 || entry.start_vcn == 0 {
                continue;
            }
            let target = entry.base_reference;
            if target.record_index == 0 {
                continue;
            }

            let rec_offset = target
                .record_index
                .checked_mul(record_size as u64)
                .ok_or_else(|| {
                    MftError::new(ErrorKind::OffsetOverflow, "переполнение смещения записи-расширения")
                        .with_record(target.record_index)
                })?;
            let rec_end = rec_offset.checked_add(record_size as u64).ok_or_else(|| {
                MftError::new(ErrorKind::OffsetOverflow, "переполнение смещения записи-расширения")
                    .with_record(target.record_index)
            })?;
            let status = base_reader.ensure_loaded(&mut dev, rec_end)?;
            if !status.is_satisfied() {
                return Err(MftError::new(
                    ErrorKind::TruncatedRead,
                    "запись-расширение за пределами базовых runs".to_string(),
                )
                .with_record(target.record_index));
            }
            let mut ext_buf = base_reader
                .slice(rec_offset, record_size)
                .ok_or_else(|| {
                    MftError::new(
                        ErrorKind::TruncatedRead,
                        "запись-расширение за загруженным префиксом".to_string(),
                    )
                    .with_record(target.record_index)
                })?
                .to_vec();

            let ext_header = MftRecordHeader::parse(&ext_buf)
                .map_err(|e| e.with_record(target.record_index))?;
            ext_header
                .validate(record_size)
                .map_err(|e| e.with_record(target.record_index))?;
            if ext_header.sequence_number != target.sequence_number {
                return Err(MftError::new(
                    ErrorKind::MalformedAttributeList,
                    format!(
                        "устаревшая ссылка: ожидался sequence {}, найден {}",
                        target.sequence_number, ext_header.sequence_number
                    ),
                )
                .with_record(target.record_index)
                .with_attr(ATTR_ATTRIBUTE_LIST));
            }
            apply_fixups(&mut ext_buf, &ext_header, bps)
                .map_err(|e| e.with_record(target.record_index))?;

            let ext_record = MftRecord {
                index: target.record_index,
                header: ext_header,
                buffer: ext_buf,
            };
            for attr in ext_record.attributes() {
                let attr = attr.map_err(|e| e.with_record(target.record_index))?;
                if attr.header.type_id != ATTR_DATA || attr.has_name() {
                    continue;
                }
                if let AttributeForm::NonResident(nr) = &attr.form {
                    if nr.start_vcn == entry.start_vcn {
                        all_runs.extend(attr.run_list()?);
                    }
                }
            }
        }

        all_runs.sort_by_key(|r| r.vcn_start);
        validate_mft_runs(&all_runs)?;

        let mft_data = RunReader::new(all_runs, bpc, actual_size);
        let total_records = actual_size / record_size as u64;

        Ok(Self {
            dev,
            boot,
            record_size,
            mft_data,
            next_index: 0,
            total_records,
            skipped_baad: 0,
            skipped_unused: 0,
            skipped_extension: 0,
        })
    }

    pub fn boot(&self) -> &NtfsBootSector {
        &self.boot
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Индекс следующей еще не прочитанной записи.
    pub fn position(&self) -> u64 {
        self.next_index
    }

    /// Следующая запись FILE со взведенным IN_USE. BAAD, свободные и
    /// записи-расширения пропускаются и считаются. None - $DATA исчерпан.
    pub fn next_record(&mut self) -> Result<Option<MftRecord>, MftError> {
        loop {
            let index = self.next_index;
            if index >= self.total_records {
                return Ok(None);
            }

            let buf = match self.load_record_buffer(index)? {
                Some(buf) => buf,
                None => return Ok(None),
            };
            self.next_index += 1;

            let header = MftRecordHeader::parse(&buf).map_err(|e| e.with_record(index))?;
            if header.signature == "BAAD" {
                self.skipped_baad += 1;
                continue;
            }
            if header.signature != "FILE" {
                return Err(MftError::new(
                    ErrorKind::BadMagic,
                    format!("сигнатура {:?} внутри MFT", header.signature),
                )
                .with_record(index)
                .at_offset(0));
            }
            header.validate(self.record_size).map_err(|e| e.with_record(index))?;

            let mut buf = buf;
            apply_fixups(&mut buf, &header, self.boot.bytes_per_sector)
                .map_err(|e| e.with_record(index))?;

            if !header.is_in_use() {
                self.skipped_unused += 1;
                continue;
            }
            if !header.is_base_record() {
                self.skipped_extension += 1;
                continue;
            }

            return Ok(Some(MftRecord { index, header, buffer: buf }));
        }
    }

    /// Произвольный доступ к записи (для расширений); запись
    /// возвращается после fixup, без фильтра IN_USE.
    pub fn fetch_record(&mut self, index: u64) -> Result<MftRecord, MftError> {
        if index >= self.total_records {
            return Err(MftError::new(
                ErrorKind::TruncatedRead,
                format!("запись {} за концом MFT ({})", index, self.total_records),
            )
            .with_record(index));
        }
        let buf = self.load_record_buffer(index)?.ok_or_else(|| {
            MftError::new(ErrorKind::TruncatedRead, "запись за загруженным префиксом".to_string())
                .with_record(index)
        })?;

        let header = MftRecordHeader::parse(&buf).map_err(|e| e.with_record(index))?;
        if header.signature != "FILE" {
            return Err(MftError::new(
                ErrorKind::BadMagic,
                format!("сигнатура {:?}", header.signature),
            )
            .with_record(index)
            .at_offset(0));
        }
        header.validate(self.record_size).map_err(|e| e.with_record(index))?;
        let mut buf = buf;
        apply_fixups(&mut buf, &header, self.boot.bytes_per_sector)
            .map_err(|e| e.with_record(index))?;
        Ok(MftRecord { index, header, buffer: buf })
    }

    /// Запись-расширение по файловой ссылке с проверкой sequence number.
    pub fn fetch_extension(&mut self, reference: FileReference) -> Result<MftRecord, MftError> {
        let record = self.fetch_record(reference.record_index)?;
        if record.header.sequence_number != reference.sequence_number {
            return Err(MftError::new(
                ErrorKind::MalformedAttributeList,
                format!(
                    "устаревшая ссылка: ожидался sequence {}, найден {}",
                    reference.sequence_number, record.header.sequence_number
                ),
            )
            .with_record(reference.record_index));
        }
        Ok(record)
    }

    /// Записи-расширения, на которые ссылается $ATTRIBUTE_LIST базовой
    /// записи. Содержимое нерезидентного списка дочитывается лениво.
    pub fn gather_extensions(&mut self, record: &MftRecord) -> Result<Vec<MftRecord>, MftError> {
        let mut targets: BTreeSet<u64> = BTreeSet::new();

        for attr in record.attributes() {
            let attr = attr.map_err(|e| e.with_record(record.index))?;
            if attr.header.type_id != ATTR_ATTRIBUTE_LIST {
                continue;
            }
            let bytes = match &attr.form {
                AttributeForm::Resident(_) => attr.resident_content()?.to_vec(),
                AttributeForm::NonResident(nr) => {
                    let runs = attr.run_list()?;
                    let bound = nr.actual_size.min(MAX_ATTRIBUTE_LIST_BYTES);
                    let mut reader = RunReader::new(runs, self.boot.bytes_per_cluster(), bound);
                    let status = reader.ensure_loaded(&mut self.dev, bound)?;
                    if !status.is_satisfied() {
                        return Err(MftError::new(
                            ErrorKind::TruncatedRead,
                            "нерезидентный $ATTRIBUTE_LIST не дочитан".to_string(),
                        )
                        .with_record(record.index)
                        .with_attr(ATTR_ATTRIBUTE_LIST));
                    }
                    reader.loaded()[..bound as usize].to_vec()
                }
            };
            for entry in parse_attribute_list(&bytes).map_err(|e| e.with_record(record.index))? {
                let idx = entry.base_reference.record_index;
                if idx != record.index && idx != 0 && idx < self.total_records {
                    targets.insert(entry.base_reference.to_raw());
                }
            }
        }

        let mut extensions = Vec::with_capacity(targets.len());
        for raw in targets {
            extensions.push(self.fetch_extension(FileReference::from_raw(raw))?);
        }
        Ok(extensions)
    }

    fn load_record_buffer(&mut self, index: u64) -> Result<Option<Vec<u8>>, MftError> {
        let offset = index * self.record_size as u64;
        let end = offset + self.record_size as u64;
        let status = self.mft_data.ensure_loaded(&mut self.dev, end)?;
        if !status.is_satisfied() {
            // runs кончились: граница потока, если не начата сама запись
            if self.mft_data.loaded_bytes() <= offset {
                return Ok(None);
            }
            return Err(MftError::new(
                ErrorKind::TruncatedRead,
                format!("запись {} оборвана на {} байтах", index, self.mft_data.loaded_bytes() - offset),
            )
            .with_record(index));
        }
        Ok(self.mft_data.slice(offset, self.record_size).map(|s| s.to_vec()))
    }
}

/// Слитый runlist $MFT обязан начинаться с VCN 0 и идти без дыр
/// и перекрытий.
fn validate_mft_runs(runs: &[DataRun]) -> Result<(), MftError> {
    let mut expected: u64 = 0;
    for run in runs {
        if run.vcn_start != expected {
            return Err(MftError::new(
                ErrorKind::RunListInconsistency,
                format!("VCN {}: ожидался {}", run.vcn_start, expected),
            )
            .with_record(0)
            .with_attr(ATTR_DATA));
        }
        expected = expected.checked_add(run.length).ok_or_else(|| {
            MftError::new(ErrorKind::OffsetOverflow, "переполнение суммы VCN".to_string())
                .with_record(0)
        })?;
    }
    Ok(())
}
