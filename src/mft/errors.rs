use std::fmt;
use std::io;

/// Закрытый набор видов ошибок ядра парсера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadBootSector,
    BadMagic,
    BadSentinel,
    FixupArrayTruncated,
    RecordSizeMisaligned,
    MalformedAttributeList,
    UnknownAttributeType,
    ResidentContentOutOfBounds,
    RunListHeaderInvalid,
    RunListInconsistency,
    OffsetOverflow,
    TruncatedRead,
    IoError,
    Unsupported,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadBootSector => "BadBootSector",
            ErrorKind::BadMagic => "BadMagic",
            ErrorKind::BadSentinel => "BadSentinel",
            ErrorKind::FixupArrayTruncated => "FixupArrayTruncated",
            ErrorKind::RecordSizeMisaligned => "RecordSizeMisaligned",
            ErrorKind::MalformedAttributeList => "MalformedAttributeList",
            ErrorKind::UnknownAttributeType => "UnknownAttributeType",
            ErrorKind::ResidentContentOutOfBounds => "ResidentContentOutOfBounds",
            ErrorKind::RunListHeaderInvalid => "RunListHeaderInvalid",
            ErrorKind::RunListInconsistency => "RunListInconsistency",
            ErrorKind::OffsetOverflow => "OffsetOverflow",
            ErrorKind::TruncatedRead => "TruncatedRead",
            ErrorKind::IoError => "IoError",
            ErrorKind::Unsupported => "Unsupported",
        }
    }
}

/// Ошибка ядра с контекстом: номер записи MFT, код типа атрибута и
/// смещение поля-нарушителя (внутри записи либо абсолютное - где что известно).
#[derive(Debug)]
pub struct MftError {
    pub kind: ErrorKind,
    pub record: Option<u64>,
    pub attr_type: Option<u32>,
    pub offset: Option<u64>,
    pub detail: String,
    pub source: Option<io::Error>,
}

impl MftError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            record: None,
            attr_type: None,
            offset: None,
            detail: detail.into(),
            source: None,
        }
    }

    pub fn with_record(mut self, record: u64) -> Self {
        self.record.get_or_insert(record);
        self
    }

    pub fn with_attr(mut self, attr_type: u32) -> Self {
        self.attr_type.get_or_insert(attr_type);
        self
    }

    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset.get_or_insert(offset);
        self
    }
}

impl fmt::Display for MftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(rec) = self.record {
            write!(f, " запись={}", rec)?;
        }
        if let Some(at) = self.attr_type {
            write!(f, " атрибут={:#X}", at)?;
        }
        if let Some(off) = self.offset {
            write!(f, " смещение={}", off)?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        if let Some(ref src) = self.source {
            write!(f, " ({})", src)?;
        }
        Ok(())
    }
}

impl std::error::Error for MftError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for MftError {
    fn from(e: io::Error) -> Self {
        let kind = if e.kind() == io::ErrorKind::UnexpectedEof {
            ErrorKind::TruncatedRead
        } else {
            ErrorKind::IoError
        };
        Self {
            kind,
            record: None,
            attr_type: None,
            offset: None,
            detail: String::new(),
            source: Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = MftError::new(ErrorKind::BadSentinel, "несовпадение USN")
            .with_record(5)
            .with_attr(0x80)
            .at_offset(510);
        let s = e.to_string();
        assert!(s.starts_with("BadSentinel"));
        assert!(s.contains("запись=5"));
        assert!(s.contains("атрибут=0x80"));
        assert!(s.contains("смещение=510"));
    }

    #[test]
    fn eof_maps_to_truncated_read() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let e: MftError = io_err.into();
        assert_eq!(e.kind, ErrorKind::TruncatedRead);

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let e: MftError = io_err.into();
        assert_eq!(e.kind, ErrorKind::IoError);
    }

    #[test]
    fn context_is_not_overwritten() {
        let e = MftError::new(ErrorKind::BadMagic, "")
            .with_record(1)
            .with_record(2);
        assert_eq!(e.record, Some(1));
    }
}
