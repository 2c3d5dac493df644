use std::io::{Read, Seek, SeekFrom};

use super::errors::{ErrorKind, MftError};
use super::runlist::DataRun;

/// Итог ensure_loaded: запрос покрыт ровно, с избытком (кластерное
/// выравнивание) или недобран - runs закончились раньше.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Exact,
    Over(u64),
    Short(u64),
}

impl LoadStatus {
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, LoadStatus::Short(_))
    }
}

/// Ленивый читатель нерезидентного содержимого: держит декодированный
/// runlist и растущий буфер непрерывного логического префикса.
/// Устройством не владеет - его передает вызывающий на каждый запрос,
/// позиция seek между вызовами не предполагается сохраненной.
#[derive(Debug)]
pub struct RunReader {
    runs: Vec<DataRun>,
    bytes_per_cluster: u64,
    total_bytes: u64,
    buf: Vec<u8>,
    loaded_bytes: u64,
}

impl RunReader {
    /// `limit` ограничивает логический размер (обычно actual_size атрибута).
    pub fn new(runs: Vec<DataRun>, bytes_per_cluster: u64, limit: u64) -> Self {
        let run_bytes: u128 = runs
            .iter()
            .map(|r| r.length as u128 * bytes_per_cluster as u128)
            .sum();
        let total_bytes = (limit as u128).min(run_bytes) as u64;
        Self {
            runs,
            bytes_per_cluster,
            total_bytes,
            buf: Vec::new(),
            loaded_bytes: 0,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn loaded_bytes(&self) -> u64 {
        self.loaded_bytes
    }

    /// Уже загруженный префикс.
    pub fn loaded(&self) -> &[u8] {
        &self.buf
    }

    /// Срез логического диапазона, если он уже загружен.
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let start = offset as usize;
        self.buf.get(start..start + len)
    }

    /// Догружает префикс до `up_to` логических байт. Уже загруженная
    /// часть не перечитывается; чтения идут кластерами, разреженные
    /// runs материализуются нулями без I/O.
    pub fn ensure_loaded<R: Read + Seek>(
        &mut self,
        dev: &mut R,
        up_to: u64,
    ) -> Result<LoadStatus, MftError> {
        if self.loaded_bytes >= up_to {
            return Ok(self.status(up_to));
        }

        let bpc = self.bytes_per_cluster;
        let goal = up_to.min(self.total_bytes);
        // округляем цель вверх до кластера, но не дальше логического конца
        let aligned_goal = goal
            .checked_add(bpc - 1)
            .map(|g| g / bpc * bpc)
            .unwrap_or(self.total_bytes)
            .min(self.total_bytes);

        for run in &self.runs {
            if self.loaded_bytes >= aligned_goal {
                break;
            }

            let run_lo = run
                .vcn_start
                .checked_mul(bpc)
                .ok_or_else(|| MftError::new(ErrorKind::OffsetOverflow, "переполнение vcn_start * bpc"))?;
            let run_bytes = run
                .length
                .checked_mul(bpc)
                .ok_or_else(|| MftError::new(ErrorKind::OffsetOverflow, "переполнение length * bpc"))?;
            let run_hi = run_lo
                .checked_add(run_bytes)
                .ok_or_else(|| MftError::new(ErrorKind::OffsetOverflow, "переполнение границы run"))?;

            if run_hi <= self.loaded_bytes {
                continue; // целиком ниже загруженного префикса
            }
            if run_lo > self.loaded_bytes {
                return Err(MftError::new(
                    ErrorKind::RunListInconsistency,
                    format!("дыра VCN: префикс {} байт, run начинается с {}", self.loaded_bytes, run_lo),
                ));
            }

            let start_in_run = self.loaded_bytes - run_lo;
            let want = (aligned_goal - self.loaded_bytes).min(run_bytes - start_in_run);
            let old_len = self.buf.len();
            self.buf.resize(old_len + want as usize, 0);

            if !run.is_sparse {
                let phys = run
                    .lcn
                    .checked_mul(bpc)
                    .and_then(|p| p.checked_add(start_in_run))
                    .ok_or_else(|| {
                        MftError::new(ErrorKind::OffsetOverflow, "переполнение физического смещения")
                    })?;
                dev.seek(SeekFrom::Start(phys))
                    .map_err(|e| MftError::from(e).at_offset(phys))?;
                dev.read_exact(&mut self.buf[old_len..])
                    .map_err(|e| MftError::from(e).at_offset(phys))?;
            }

            self.loaded_bytes += want;
        }

        Ok(self.status(up_to))
    }

    fn status(&self, up_to: u64) -> LoadStatus {
        if self.loaded_bytes >= up_to {
            if self.loaded_bytes == up_to {
                LoadStatus::Exact
            } else {
                LoadStatus::Over(self.loaded_bytes - up_to)
            }
        } else {
            LoadStatus::Short(up_to - self.loaded_bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    const BPC: u64 = 16;

    /// Устройство, считающее обращения, для проверки идемпотентности.
    struct CountingDev {
        inner: Cursor<Vec<u8>>,
        reads: usize,
    }

    impl Read for CountingDev {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            self.inner.read(buf)
        }
    }

    impl Seek for CountingDev {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn device() -> CountingDev {
        // 8 кластеров по 16 байт, кластер k заполнен байтом k
        let mut bytes = Vec::new();
        for k in 0u8..8 {
            bytes.extend(std::iter::repeat(k).take(BPC as usize));
        }
        CountingDev { inner: Cursor::new(bytes), reads: 0 }
    }

    fn run(vcn: u64, len: u64, lcn: u64) -> DataRun {
        DataRun { vcn_start: vcn, length: len, lcn, is_sparse: false }
    }

    fn sparse(vcn: u64, len: u64) -> DataRun {
        DataRun { vcn_start: vcn, length: len, lcn: 0, is_sparse: true }
    }

    #[test]
    fn assembles_fragmented_and_sparse_extents() {
        // кластеры 2,3 + дыра в 1 кластер + кластер 1
        let runs = vec![run(0, 2, 2), sparse(2, 1), run(3, 1, 1)];
        let mut reader = RunReader::new(runs, BPC, u64::MAX);
        let mut dev = device();

        let status = reader.ensure_loaded(&mut dev, 64).unwrap();
        assert_eq!(status, LoadStatus::Exact);

        let mut expected = Vec::new();
        expected.extend(std::iter::repeat(2u8).take(16));
        expected.extend(std::iter::repeat(3u8).take(16));
        expected.extend(std::iter::repeat(0u8).take(16));
        expected.extend(std::iter::repeat(1u8).take(16));
        assert_eq!(reader.loaded(), &expected[..]);
    }

    #[test]
    fn already_loaded_prefix_is_not_reread() {
        let runs = vec![run(0, 4, 2)];
        let mut reader = RunReader::new(runs, BPC, u64::MAX);
        let mut dev = device();

        reader.ensure_loaded(&mut dev, 32).unwrap();
        let reads_after_first = dev.reads;
        assert!(reads_after_first > 0);

        // повторный запрос в пределах префикса не трогает устройство
        reader.ensure_loaded(&mut dev, 32).unwrap();
        reader.ensure_loaded(&mut dev, 10).unwrap();
        assert_eq!(dev.reads, reads_after_first);

        // расширение докупает только хвост
        reader.ensure_loaded(&mut dev, 64).unwrap();
        assert!(dev.reads > reads_after_first);
        assert_eq!(reader.loaded_bytes(), 64);
    }

    #[test]
    fn sparse_only_range_needs_no_io() {
        let runs = vec![sparse(0, 2)];
        let mut reader = RunReader::new(runs, BPC, u64::MAX);
        let mut dev = device();

        let status = reader.ensure_loaded(&mut dev, 32).unwrap();
        assert_eq!(status, LoadStatus::Exact);
        assert_eq!(dev.reads, 0);
        assert!(reader.loaded().iter().all(|&b| b == 0));
    }

    #[test]
    fn request_rounds_up_to_cluster() {
        let runs = vec![run(0, 2, 2)];
        let mut reader = RunReader::new(runs, BPC, u64::MAX);
        let mut dev = device();

        let status = reader.ensure_loaded(&mut dev, 10).unwrap();
        assert_eq!(status, LoadStatus::Over(6));
        assert_eq!(reader.loaded_bytes(), 16);
    }

    #[test]
    fn exhausted_runs_report_shortfall() {
        let runs = vec![run(0, 2, 2)];
        let mut reader = RunReader::new(runs, BPC, u64::MAX);
        let mut dev = device();

        let status = reader.ensure_loaded(&mut dev, 100).unwrap();
        assert_eq!(status, LoadStatus::Short(68));
        assert_eq!(reader.loaded_bytes(), 32);
        assert!(!status.is_satisfied());
    }

    #[test]
    fn limit_caps_logical_size() {
        let runs = vec![run(0, 4, 2)];
        let reader = RunReader::new(runs, BPC, 40);
        assert_eq!(reader.total_bytes(), 40);
    }

    #[test]
    fn limit_allows_partial_tail_cluster() {
        let runs = vec![run(0, 4, 2)];
        let mut reader = RunReader::new(runs, BPC, 40);
        let mut dev = device();

        let status = reader.ensure_loaded(&mut dev, 100).unwrap();
        assert_eq!(status, LoadStatus::Short(60));
        assert_eq!(reader.loaded_bytes(), 40);
        assert_eq!(reader.loaded().len(), 40);
    }

    #[test]
    fn vcn_hole_is_inconsistency() {
        let runs = vec![run(0, 1, 2), run(4, 1, 3)];
        let mut reader = RunReader::new(runs, BPC, u64::MAX);
        let mut dev = device();

        let err = reader.ensure_loaded(&mut dev, 80).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RunListInconsistency);
    }

    #[test]
    fn device_eof_is_truncated_read() {
        // run указывает за конец устройства
        let runs = vec![run(0, 2, 100)];
        let mut reader = RunReader::new(runs, BPC, u64::MAX);
        let mut dev = device();

        let err = reader.ensure_loaded(&mut dev, 32).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TruncatedRead);
    }

    #[test]
    fn slice_of_loaded_range() {
        let runs = vec![run(0, 2, 2)];
        let mut reader = RunReader::new(runs, BPC, u64::MAX);
        let mut dev = device();
        reader.ensure_loaded(&mut dev, 32).unwrap();

        assert_eq!(reader.slice(16, 4), Some(&[3u8, 3, 3, 3][..]));
        assert_eq!(reader.slice(30, 8), None);
    }
}
