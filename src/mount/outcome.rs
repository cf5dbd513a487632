//! Classification of `mount_all` return codes.

use std::fmt;

/// Return codes of the mount subsystem's mount-all primitive
pub mod codes {
    pub const FAIL: i32 = -1;
    pub const NOT_ENCRYPTABLE: i32 = 0;
    pub const NOT_ENCRYPTED: i32 = 1;
    pub const MIGHT_BE_ENCRYPTED: i32 = 2;
    pub const NEEDS_ENCRYPTION: i32 = 3;
    pub const NEEDS_RECOVERY: i32 = 4;
    pub const FILE_ENCRYPTED: i32 = 5;
    pub const IS_METADATA_ENCRYPTED: i32 = 6;
    pub const NEEDS_METADATA_ENCRYPTION: i32 = 7;
}

/// What a mount-all pass left the data partition in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountOutcome {
    NeedsEncryption,
    MightBeEncrypted,
    NotEncrypted,
    NotEncryptable,
    NeedsRecovery,
    FileEncrypted,
    MetadataEncrypted,
    NeedsMetadataEncryption,
    /// Positive code outside the known set
    UnexpectedPositive(i32),
    /// Negative code
    ClassificationError(i32),
}

impl MountOutcome {
    /// Classify a raw return code. Total over `i32`.
    pub const fn from_code(code: i32) -> Self {
        match code {
            codes::NEEDS_ENCRYPTION => Self::NeedsEncryption,
            codes::MIGHT_BE_ENCRYPTED => Self::MightBeEncrypted,
            codes::NOT_ENCRYPTED => Self::NotEncrypted,
            codes::NOT_ENCRYPTABLE => Self::NotEncryptable,
            codes::NEEDS_RECOVERY => Self::NeedsRecovery,
            codes::FILE_ENCRYPTED => Self::FileEncrypted,
            codes::IS_METADATA_ENCRYPTED => Self::MetadataEncrypted,
            codes::NEEDS_METADATA_ENCRYPTION => Self::NeedsMetadataEncryption,
            c if c > 0 => Self::UnexpectedPositive(c),
            c => Self::ClassificationError(c),
        }
    }

    /// Every recognised outcome paired with its code
    pub const KNOWN: [(i32, MountOutcome); 8] = [
        (codes::NOT_ENCRYPTABLE, Self::NotEncryptable),
        (codes::NOT_ENCRYPTED, Self::NotEncrypted),
        (codes::MIGHT_BE_ENCRYPTED, Self::MightBeEncrypted),
        (codes::NEEDS_ENCRYPTION, Self::NeedsEncryption),
        (codes::NEEDS_RECOVERY, Self::NeedsRecovery),
        (codes::FILE_ENCRYPTED, Self::FileEncrypted),
        (codes::IS_METADATA_ENCRYPTED, Self::MetadataEncrypted),
        (codes::NEEDS_METADATA_ENCRYPTION, Self::NeedsMetadataEncryption),
    ];

    /// Returns true for outcomes that only occur with full-disk encryption,
    /// which cannot be re-entered through `remount_userdata`
    pub const fn is_block_encryption(self) -> bool {
        matches!(self, Self::NeedsEncryption | Self::MightBeEncrypted)
    }

    /// Returns true for the file/metadata encryption family
    pub const fn is_file_encryption(self) -> bool {
        matches!(
            self,
            Self::FileEncrypted | Self::MetadataEncrypted | Self::NeedsMetadataEncryption
        )
    }

    /// Returns false for the two error outcomes
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::UnexpectedPositive(_) | Self::ClassificationError(_))
    }
}

impl fmt::Display for MountOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeedsEncryption => write!(f, "needs encryption"),
            Self::MightBeEncrypted => write!(f, "might be encrypted"),
            Self::NotEncrypted => write!(f, "not encrypted"),
            Self::NotEncryptable => write!(f, "not encryptable"),
            Self::NeedsRecovery => write!(f, "needs recovery"),
            Self::FileEncrypted => write!(f, "file encrypted"),
            Self::MetadataEncrypted => write!(f, "metadata encrypted"),
            Self::NeedsMetadataEncryption => write!(f, "needs metadata encryption"),
            Self::UnexpectedPositive(code) => write!(f, "unexpected code {}", code),
            Self::ClassificationError(code) => write!(f, "error code {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip() {
        for (code, outcome) in MountOutcome::KNOWN {
            assert_eq!(MountOutcome::from_code(code), outcome);
            assert!(outcome.is_known());
        }
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(MountOutcome::from_code(8), MountOutcome::UnexpectedPositive(8));
        assert_eq!(MountOutcome::from_code(codes::FAIL), MountOutcome::ClassificationError(-1));
        assert_eq!(
            MountOutcome::from_code(i32::MIN),
            MountOutcome::ClassificationError(i32::MIN)
        );
        assert!(!MountOutcome::from_code(42).is_known());
    }

    #[test]
    fn test_families_are_disjoint() {
        for (_, outcome) in MountOutcome::KNOWN {
            assert!(!(outcome.is_block_encryption() && outcome.is_file_encryption()));
        }
        assert!(MountOutcome::MetadataEncrypted.is_file_encryption());
        assert!(MountOutcome::MightBeEncrypted.is_block_encryption());
    }
}
