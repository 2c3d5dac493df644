use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};

use crate::cli::Cli;
use crate::mft::attributes::{
    AttributeForm, FileNameAttribute, StandardInformation, ATTR_ATTRIBUTE_LIST, ATTR_DATA,
    ATTR_FILE_NAME, ATTR_STANDARD_INFORMATION,
};
use crate::mft::errors::MftError;
use crate::mft::path_builder::PathBuilder;
use crate::mft::record::{FileReference, MftRecord};
use crate::mft::volume::open_volume;
use crate::mft::walker::MftWalker;
use crate::models::{RecordEntry, VolumeMeta};
use crate::output::JsonlWriter;

fn open_walker(image: &str) -> Result<MftWalker<BufReader<File>>, MftError> {
    let file = File::open(image)?;
    let volume = open_volume(BufReader::new(file))?;
    volume.mft_walker()
}

fn extract_human_readable(data: &[u8]) -> String {
    let lossy = String::from_utf8_lossy(data);
    lossy
        .chars()
        .filter(|c| (!c.is_control() || *c == '\n' || *c == '\t' || *c == '\r') && *c != '\u{FFFD}')
        .collect()
}

#[derive(Default)]
struct RecordScan {
    si: Option<StandardInformation>,
    best_name: Option<FileNameAttribute>,
    data_unnamed_size: Option<u64>,
    has_ads: bool,
    has_attribute_list: bool,
    content_data: Option<String>,
}

/// Разбор атрибутов записи вместе с ее записями-расширениями.
fn scan_record<R: Read + Seek>(
    walker: &mut MftWalker<R>,
    record: &MftRecord,
    include_data: bool,
) -> Result<RecordScan, MftError> {
    let mut scan = RecordScan::default();
    let extensions = walker.gather_extensions(record)?;

    for rec in std::iter::once(record).chain(extensions.iter()) {
        for attr in rec.attributes() {
            let attr = attr?;
            match attr.header.type_id {
                ATTR_STANDARD_INFORMATION => {
                    scan.si = Some(attr.as_standard_information()?);
                }
                ATTR_FILE_NAME => {
                    let candidate = attr.as_file_name()?;
                    // Win32 (1) и Win32+DOS (3) приоритетнее DOS/POSIX имен
                    let current_prio = match scan.best_name.as_ref() {
                        Some(f) if f.name_namespace == 1 || f.name_namespace == 3 => 2,
                        Some(_) => 1,
                        None => 0,
                    };
                    if candidate.name_namespace == 1
                        || candidate.name_namespace == 3
                        || current_prio == 0
                    {
                        scan.best_name = Some(candidate);
                    }
                }
                ATTR_ATTRIBUTE_LIST => {
                    scan.has_attribute_list = true;
                }
                ATTR_DATA => {
                    if attr.has_name() {
                        scan.has_ads = true;
                    } else {
                        match &attr.form {
                            AttributeForm::Resident(_) => {
                                let content = attr.resident_content()?;
                                scan.data_unnamed_size = Some(content.len() as u64);
                                if include_data {
                                    scan.content_data = Some(extract_human_readable(content));
                                }
                            }
                            AttributeForm::NonResident(nr) => {
                                scan.data_unnamed_size = Some(nr.actual_size);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(scan)
}

fn build_entry(
    record: &MftRecord,
    scan: &RecordScan,
    path_builder: &PathBuilder,
    source: &str,
) -> RecordEntry {
    let parent = scan
        .best_name
        .as_ref()
        .map(|f| f.parent_reference)
        .unwrap_or(FileReference { record_index: 0, sequence_number: 0 });
    let file_name = scan
        .best_name
        .as_ref()
        .map(|f| f.name.clone())
        .unwrap_or_default();
    let name_namespace = scan.best_name.as_ref().map(|f| f.name_namespace).unwrap_or(0);

    let parent_path = path_builder.get_parent_path(parent);
    let full_path = if file_name.is_empty() {
        parent_path.clone()
    } else if parent_path == "\\" {
        format!("\\{}", file_name)
    } else {
        format!("{}\\{}", parent_path, file_name)
    };

    let is_dir = record.header.is_directory();
    let extension = if is_dir || !file_name.contains('.') {
        None
    } else {
        file_name.rsplit('.').next().map(|ext| ext.to_string())
    };

    let file_size = scan
        .data_unnamed_size
        .or_else(|| scan.best_name.as_ref().map(|f| f.real_size))
        .unwrap_or(0);

    let si = scan.si.as_ref();
    let fname = scan.best_name.as_ref();

    RecordEntry {
        entry_number: record.index,
        sequence_number: record.header.sequence_number,
        parent_entry_number: parent.record_index,
        parent_sequence_number: parent.sequence_number,
        in_use: record.header.is_in_use(),
        is_directory: is_dir,
        parent_path,
        file_name,
        name_namespace,
        extension,
        full_path,
        file_size,
        hard_link_count: record.header.hard_link_count,
        created0x10: si.map(|s| s.creation_time.to_rfc3339()),
        created0x30: fname.map(|f| f.creation_time.to_rfc3339()),
        last_modified0x10: si.map(|s| s.modified_time.to_rfc3339()),
        last_modified0x30: fname.map(|f| f.modified_time.to_rfc3339()),
        last_record_change0x10: si.map(|s| s.mft_modified_time.to_rfc3339()),
        last_record_change0x30: fname.map(|f| f.mft_modified_time.to_rfc3339()),
        last_access0x10: si.map(|s| s.accessed_time.to_rfc3339()),
        last_access0x30: fname.map(|f| f.accessed_time.to_rfc3339()),
        logfile_sequence_number: record.header.logfile_sequence_number,
        security_id: si.map(|s| s.security_id).unwrap_or(0),
        si_flags: si.map(|s| s.file_attributes).unwrap_or(0),
        usn: si.map(|s| s.usn).unwrap_or(0),
        has_ads: scan.has_ads,
        has_attribute_list: scan.has_attribute_list,
        empty_attribute_list: record.has_empty_attribute_list(),
        content_data: scan.content_data.clone(),
        signature: record.header.signature.clone(),
        base_record_reference: record.header.base_record_reference.to_raw(),
        real_size: record.header.real_size,
        allocated_size: record.header.allocated_size,
        source_file: source.to_string(),
    }
}

pub fn run(cli: &Cli) -> i32 {
    println!("[*] Запуск обхода MFT");
    println!(" -> Источник: {}", cli.image);
    if let Some(out) = &cli.out_json {
        println!(" -> Выходной файл: {}", out);
    }

    let mut walker = match open_walker(&cli.image) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("[!] {}", e);
            return 1;
        }
    };

    let boot = walker.boot().clone();
    let record_size = walker.record_size();
    println!("[+] Метаданные тома:");
    println!("    bytes_per_sector: {}", boot.bytes_per_sector);
    println!("    sectors_per_cluster: {}", boot.sectors_per_cluster);
    println!("    bytes_per_cluster: {}", boot.bytes_per_cluster());
    println!("    mft_lcn: {}", boot.mft_lcn);
    println!("    mft_record_size: {}", record_size);
    println!("    volume_serial_number: {:#X}", boot.volume_serial_number);

    let limit = cli.limit.unwrap_or(u64::MAX);
    let mut error_count: u64 = 0;

    // Проход 1: имена и parent-ссылки для дерева путей
    println!("[*] Проход 1: построение дерева путей...");
    let mut path_builder = PathBuilder::new();
    path_builder.reserve(walker.total_records() as usize);

    let mut seen: u64 = 0;
    loop {
        if seen >= limit {
            break;
        }
        match walker.next_record() {
            Ok(Some(record)) => {
                seen += 1;
                match scan_record(&mut walker, &record, false) {
                    Ok(scan) => {
                        if let Some(fname) = scan.best_name {
                            path_builder.add_entry(
                                record.index,
                                record.header.sequence_number,
                                fname.parent_reference,
                                fname.name,
                            );
                        }
                    }
                    Err(e) => {
                        error_count += 1;
                        eprintln!("[!] {}", e);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                // walker останавливается на первой своей ошибке
                eprintln!("[!] {}", e);
                return 1;
            }
        }
    }

    // Проход 2: полный разбор и экспорт
    println!("[*] Проход 2: разбор атрибутов и экспорт...");
    let mut walker = match open_walker(&cli.image) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("[!] {}", e);
            return 1;
        }
    };

    let mut writer = match &cli.out_json {
        Some(out) => match File::create(out) {
            Ok(f) => Some(JsonlWriter::new(BufWriter::new(f))),
            Err(e) => {
                eprintln!("[!] Не удалось создать {}: {}", out, e);
                return 1;
            }
        },
        None => None,
    };

    let mut exported: u64 = 0;
    let mut walker_failed = false;
    let mut seen: u64 = 0;
    loop {
        if seen >= limit {
            break;
        }
        match walker.next_record() {
            Ok(Some(record)) => {
                seen += 1;
                match scan_record(&mut walker, &record, cli.data) {
                    Ok(scan) => {
                        if let Some(w) = writer.as_mut() {
                            let entry = build_entry(&record, &scan, &path_builder, &cli.image);
                            if let Err(e) = w.write(&entry) {
                                eprintln!("[!] Ошибка записи JSONL: {}", e);
                                return 1;
                            }
                        }
                        exported += 1;
                    }
                    // ошибка на записи: строка диагностики, вывод по записи подавлен
                    Err(e) => {
                        error_count += 1;
                        eprintln!("[!] {}", e);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("[!] {}", e);
                error_count += 1;
                walker_failed = true;
                break;
            }
        }
    }

    if let Some(w) = writer.as_mut() {
        if let Err(e) = w.flush() {
            eprintln!("[!] Ошибка записи JSONL: {}", e);
            return 1;
        }
    }

    if let Some(out) = &cli.out_json {
        let meta = VolumeMeta {
            bytes_per_sector: boot.bytes_per_sector,
            sectors_per_cluster: boot.sectors_per_cluster,
            bytes_per_cluster: boot.bytes_per_cluster(),
            media_descriptor: boot.media_descriptor,
            total_sectors: boot.total_sectors,
            mft_lcn: boot.mft_lcn,
            mft_mirror_lcn: boot.mft_mirror_lcn,
            mft_record_size: record_size as u32,
            volume_serial_number: boot.volume_serial_number,
            source: cli.image.clone(),
        };
        if let Ok(mut f) = File::create(format!("{}.meta.json", out)) {
            let _ = serde_json::to_writer_pretty(&mut f, &meta);
            let _ = f.write_all(b"\n");
        }
    }

    println!(
        "[+] Обработано записей: {} (BAAD: {}, свободных: {}, расширений: {})",
        exported, walker.skipped_baad, walker.skipped_unused, walker.skipped_extension
    );
    if error_count > 0 || walker_failed {
        println!("[!] Ошибок ядра: {}", error_count);
        return 1;
    }
    0
}
