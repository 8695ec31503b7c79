//! Error taxonomy shared by the whole pipeline.
//!
//! Every failure is a [`KanziError`]: a coarse [`ErrorKind`] plus a
//! human-readable message.  The kind drives the process exit code of the
//! command-line driver; the message is what the user sees.

use std::fmt;

/// Coarse failure categories, one per user-visible outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required configuration entry is absent.
    MissingParam,
    /// A configuration entry is present but out of range or malformed.
    InvalidParam,
    /// The input is not a container stream (bad magic).
    InvalidFile,
    /// The stream was produced by a newer, unsupported format version.
    StreamVersion,
    /// The declared block size is outside the supported range.
    BlockSize,
    /// A bitstream could not be constructed.
    CreateBitstream,
    /// A compressed stream wrapper could not be constructed.
    CreateStream,
    /// An entropy encoder could not be constructed.
    CreateCompressor,
    /// An entropy decoder could not be constructed.
    CreateDecompressor,
    /// A transform or codec name is recognized but cannot be instantiated.
    CreateCodec,
    /// A transform or codec identifier is unknown.
    InvalidCodec,
    /// Opening an existing file failed.
    OpenFile,
    /// Reading from the underlying byte stream failed.
    ReadFile,
    /// Writing to the underlying byte stream failed.
    WriteFile,
    /// Creating an output file failed.
    CreateFile,
    /// The output path names a directory.
    OutputIsDir,
    /// The output file exists and overwrite was not forced.
    OverwriteFile,
    /// A per-block transform or entropy step failed.
    ProcessBlock,
    /// A block or header checksum did not match.
    CrcCheck,
    /// Anything that escaped the categories above.
    Unknown,
}

impl ErrorKind {
    /// Stable identifier string, also used by the CLI in verbose output.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::MissingParam => "MISSING_PARAM",
            ErrorKind::InvalidParam => "INVALID_PARAM",
            ErrorKind::InvalidFile => "INVALID_FILE",
            ErrorKind::StreamVersion => "STREAM_VERSION",
            ErrorKind::BlockSize => "BLOCK_SIZE",
            ErrorKind::CreateBitstream => "CREATE_BITSTREAM",
            ErrorKind::CreateStream => "CREATE_STREAM",
            ErrorKind::CreateCompressor => "CREATE_COMPRESSOR",
            ErrorKind::CreateDecompressor => "CREATE_DECOMPRESSOR",
            ErrorKind::CreateCodec => "CREATE_CODEC",
            ErrorKind::InvalidCodec => "INVALID_CODEC",
            ErrorKind::OpenFile => "OPEN_FILE",
            ErrorKind::ReadFile => "READ_FILE",
            ErrorKind::WriteFile => "WRITE_FILE",
            ErrorKind::CreateFile => "CREATE_FILE",
            ErrorKind::OutputIsDir => "OUTPUT_IS_DIR",
            ErrorKind::OverwriteFile => "OVERWRITE_FILE",
            ErrorKind::ProcessBlock => "PROCESS_BLOCK",
            ErrorKind::CrcCheck => "CRC_CHECK",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Process exit code used by the command-line driver.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::MissingParam => 1,
            ErrorKind::InvalidParam => 2,
            ErrorKind::InvalidFile => 3,
            ErrorKind::StreamVersion => 4,
            ErrorKind::BlockSize => 5,
            ErrorKind::CreateBitstream => 6,
            ErrorKind::CreateStream => 7,
            ErrorKind::CreateCompressor => 8,
            ErrorKind::CreateDecompressor => 9,
            ErrorKind::CreateCodec => 10,
            ErrorKind::InvalidCodec => 11,
            ErrorKind::OpenFile => 12,
            ErrorKind::ReadFile => 13,
            ErrorKind::WriteFile => 14,
            ErrorKind::CreateFile => 15,
            ErrorKind::OutputIsDir => 16,
            ErrorKind::OverwriteFile => 17,
            ErrorKind::ProcessBlock => 18,
            ErrorKind::CrcCheck => 19,
            ErrorKind::Unknown => 127,
        }
    }
}

/// The error type used in results for all library functionality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KanziError {
    pub kind: ErrorKind,
    pub message: String,
}

impl KanziError {
    pub fn new<S: AsRef<str>>(kind: ErrorKind, message: S) -> Self {
        KanziError {
            kind,
            message: message.as_ref().to_string(),
        }
    }

    pub(crate) fn invalid_param<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::InvalidParam, message)
    }

    pub(crate) fn invalid_file<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::InvalidFile, message)
    }

    pub(crate) fn block_size<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::BlockSize, message)
    }

    pub(crate) fn process_block<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::ProcessBlock, message)
    }

    pub(crate) fn crc_check<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::CrcCheck, message)
    }
}

impl fmt::Display for KanziError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for KanziError {}

pub type KanziResult<T> = std::result::Result<T, KanziError>;

impl From<KanziError> for std::io::Error {
    fn from(e: KanziError) -> Self {
        let io_kind = match e.kind {
            ErrorKind::InvalidFile
            | ErrorKind::StreamVersion
            | ErrorKind::BlockSize
            | ErrorKind::CrcCheck => std::io::ErrorKind::InvalidData,
            ErrorKind::MissingParam | ErrorKind::InvalidParam => {
                std::io::ErrorKind::InvalidInput
            }
            ErrorKind::ReadFile => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(io_kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ErrorKind::MissingParam.name(), "MISSING_PARAM");
        assert_eq!(ErrorKind::CrcCheck.name(), "CRC_CHECK");
        assert_eq!(ErrorKind::Unknown.name(), "UNKNOWN");
    }

    #[test]
    fn exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::MissingParam,
            ErrorKind::InvalidParam,
            ErrorKind::InvalidFile,
            ErrorKind::StreamVersion,
            ErrorKind::BlockSize,
            ErrorKind::CreateBitstream,
            ErrorKind::CreateStream,
            ErrorKind::CreateCompressor,
            ErrorKind::CreateDecompressor,
            ErrorKind::CreateCodec,
            ErrorKind::InvalidCodec,
            ErrorKind::OpenFile,
            ErrorKind::ReadFile,
            ErrorKind::WriteFile,
            ErrorKind::CreateFile,
            ErrorKind::OutputIsDir,
            ErrorKind::OverwriteFile,
            ErrorKind::ProcessBlock,
            ErrorKind::CrcCheck,
            ErrorKind::Unknown,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let e = KanziError::invalid_param("jobs must be in [1..64]");
        assert_eq!(e.to_string(), "INVALID_PARAM: jobs must be in [1..64]");
    }
}
