use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordEntry {
    pub entry_number: u64,
    pub sequence_number: u16,

    pub parent_entry_number: u64,
    pub parent_sequence_number: u16,

    pub in_use: bool,
    pub is_directory: bool,

    pub parent_path: String,
    pub file_name: String,
    pub name_namespace: u8,
    pub extension: Option<String>,

    #[serde(rename = "Full_Path")]
    pub full_path: String,

    pub file_size: u64,
    pub hard_link_count: u16,

    pub created0x10: Option<String>,
    pub created0x30: Option<String>,
    pub last_modified0x10: Option<String>,
    pub last_modified0x30: Option<String>,
    pub last_record_change0x10: Option<String>,
    pub last_record_change0x30: Option<String>,
    pub last_access0x10: Option<String>,
    pub last_access0x30: Option<String>,

    pub logfile_sequence_number: u64,
    pub security_id: u32,
    pub si_flags: u32,
    pub usn: u64,

    pub has_ads: bool,
    pub has_attribute_list: bool,
    pub empty_attribute_list: bool,

    pub content_data: Option<String>,

    pub signature: String,
    pub base_record_reference: u64,
    pub real_size: u32,
    pub allocated_size: u32,

    pub source_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMeta {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub bytes_per_cluster: u64,
    pub media_descriptor: u8,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mft_mirror_lcn: u64,
    pub mft_record_size: u32,
    pub volume_serial_number: u64,
    pub source: String,
}
