use std::io::{Read, Seek, SeekFrom};

use super::boot::NtfsBootSector;
use super::errors::MftError;
use super::walker::MftWalker;

/// Открытый NTFS-том: источник байтов с разобранным boot-сектором.
#[derive(Debug)]
pub struct Volume<R> {
    reader: R,
    boot: NtfsBootSector,
}

/// Читает boot-сектор с нулевого смещения источника.
pub fn open_volume<R: Read + Seek>(mut reader: R) -> Result<Volume<R>, MftError> {
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|e| MftError::from(e).at_offset(0))?;
    let mut vbr = [0u8; 512];
    reader
        .read_exact(&mut vbr)
        .map_err(|e| MftError::from(e).at_offset(0))?;
    let boot = NtfsBootSector::parse(&vbr)?;
    Ok(Volume { reader, boot })
}

impl<R: Read + Seek> Volume<R> {
    pub fn boot(&self) -> &NtfsBootSector {
        &self.boot
    }

    /// Walker первичной MFT. Том потребляется: дескриптор устройства
    /// эксклюзивно переходит walker'у на все время его жизни.
    pub fn mft_walker(self) -> Result<MftWalker<R>, MftError> {
        MftWalker::new(self.reader, self.boot)
    }
}
