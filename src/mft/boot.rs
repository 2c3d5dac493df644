use byteorder::{ByteOrder, LittleEndian};

use super::errors::{ErrorKind, MftError};

fn bad_boot(detail: impl Into<String>, offset: u64) -> MftError {
    MftError::new(ErrorKind::BadBootSector, detail).at_offset(offset)
}

#[derive(Debug, Clone)]
pub struct NtfsBootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub media_descriptor: u8,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mft_mirror_lcn: u64,
    pub clusters_per_file_record_segment: i8,
    pub clusters_per_index_buffer: i8,
    pub volume_serial_number: u64,
}

impl NtfsBootSector {
    pub fn parse(vbr: &[u8]) -> Result<Self, MftError> {
        if vbr.len() < 512 {
            return Err(bad_boot(format!("VBR короче сектора: {} байт", vbr.len()), 0));
        }

        if &vbr[3..11] != b"NTFS    " {
            return Err(bad_boot("системный идентификатор не \"NTFS    \"", 3));
        }

        let bytes_per_sector = LittleEndian::read_u16(&vbr[11..13]);
        if !bytes_per_sector.is_power_of_two() || !(256..=4096).contains(&bytes_per_sector) {
            return Err(bad_boot(format!("некорректный bytes_per_sector: {}", bytes_per_sector), 11));
        }

        let sectors_per_cluster = vbr[13];
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            return Err(bad_boot(format!("некорректный sectors_per_cluster: {}", sectors_per_cluster), 13));
        }

        let media_descriptor = vbr[21];
        let total_sectors = LittleEndian::read_u64(&vbr[40..48]);
        let mft_lcn = LittleEndian::read_u64(&vbr[48..56]);
        let mft_mirror_lcn = LittleEndian::read_u64(&vbr[56..64]);

        if mft_lcn == 0 {
            return Err(bad_boot("mft_lcn равен 0", 48));
        }

        let boot = Self {
            bytes_per_sector,
            sectors_per_cluster,
            media_descriptor,
            total_sectors,
            mft_lcn,
            mft_mirror_lcn,
            clusters_per_file_record_segment: vbr[64] as i8,
            clusters_per_index_buffer: vbr[68] as i8,
            volume_serial_number: LittleEndian::read_u64(&vbr[72..80]),
        };

        // Размер записи проверяем сразу, чтобы битый VBR не дожил до walker'а
        boot.file_record_size_bytes()?;

        Ok(boot)
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Размер записи MFT: положительное значение - в кластерах,
    /// отрицательное - степень двойки в байтах (2^|v|).
    pub fn file_record_size_bytes(&self) -> Result<u32, MftError> {
        let v = self.clusters_per_file_record_segment;
        if v == 0 {
            return Err(bad_boot("clusters_per_file_record_segment равен 0", 64));
        }

        let size = if v > 0 {
            (self.bytes_per_cluster() as u32).saturating_mul(v as u32)
        } else {
            let pow = (-(v as i32)) as u32;
            if pow > 31 {
                return Err(bad_boot(format!("показатель размера записи вне диапазона: {}", v), 64));
            }
            1u32 << pow
        };

        if size < self.bytes_per_sector as u32 || !size.is_power_of_two() {
            return Err(bad_boot(format!("некорректный размер записи MFT: {}", size), 64));
        }

        Ok(size)
    }

    /// Абсолютное байтовое смещение начала $MFT.
    pub fn mft_byte_offset(&self) -> Result<u64, MftError> {
        self.mft_lcn
            .checked_mul(self.bytes_per_cluster())
            .ok_or_else(|| {
                MftError::new(ErrorKind::OffsetOverflow, "переполнение mft_lcn * bytes_per_cluster")
                    .at_offset(48)
            })
    }
}
