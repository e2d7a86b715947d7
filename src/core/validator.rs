use std::fmt;
use serde::Serialize;
use thiserror::Error;
use super::types::{FileDescriptor, UploadPolicy};

/// A reason a candidate file is not admissible.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Violation {
    #[error("exceeds size limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("type not allowed")]
    TypeNotAllowed { mime_type: String },
}

/// A file refused at submission, with every violation it hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub name: String,
    pub violations: Vec<Violation>,
}

impl Rejection {
    /// The first violation, which is what callers usually surface.
    pub fn reason(&self) -> String {
        self.violations
            .first()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason())
    }
}

/// Check a candidate file against the policy. Size comes before type.
pub fn validate(file: &FileDescriptor, policy: &UploadPolicy) -> Vec<Violation> {
    let mut violations = Vec::new();

    if file.size > policy.max_file_size {
        violations.push(Violation::TooLarge {
            size: file.size,
            limit: policy.max_file_size,
        });
    }

    if !policy.allows_type(&file.mime_type) {
        violations.push(Violation::TypeNotAllowed {
            mime_type: file.mime_type.clone(),
        });
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FileSource;

    fn png_policy() -> UploadPolicy {
        UploadPolicy {
            max_file_size: 10_000_000,
            allowed_types: ["image/png".to_string()].into_iter().collect(),
            max_concurrent_uploads: 2,
            auto_compress: false,
        }
    }

    fn file(size: usize, mime_type: &str) -> FileDescriptor {
        FileDescriptor::from_bytes("f", mime_type, vec![0u8; size])
    }

    #[test]
    fn admissible_file_has_no_violations() {
        assert!(validate(&file(1_000, "image/png"), &png_policy()).is_empty());
    }

    #[test]
    fn size_at_limit_is_allowed() {
        let policy = UploadPolicy {
            max_file_size: 16,
            ..png_policy()
        };
        assert!(validate(&file(16, "image/png"), &policy).is_empty());
        assert_eq!(validate(&file(17, "image/png"), &policy).len(), 1);
    }

    #[test]
    fn oversized_file_reports_raw_limit() {
        let oversized = FileDescriptor::new("big.png", 20_000_000, "image/png", FileSource::Memory(Default::default()));
        let violations = validate(&oversized, &png_policy());

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].to_string(), "exceeds size limit of 10000000");
    }

    #[test]
    fn size_violation_precedes_type_violation() {
        let file = FileDescriptor::new("big.exe", 20_000_000, "application/x-msdownload", FileSource::Memory(Default::default()));
        let violations = validate(&file, &png_policy());

        assert_eq!(violations.len(), 2);
        assert!(matches!(violations[0], Violation::TooLarge { .. }));
        assert_eq!(violations[1].to_string(), "type not allowed");
    }

    #[test]
    fn rejection_reason_is_first_violation() {
        let rejection = Rejection {
            name: "big.exe".to_string(),
            violations: validate(
                &FileDescriptor::new("big.exe", 20_000_000, "text/x", FileSource::Memory(Default::default())),
                &png_policy(),
            ),
        };

        assert_eq!(rejection.reason(), "exceeds size limit of 10000000");
        assert_eq!(rejection.to_string(), "big.exe: exceeds size limit of 10000000");
    }
}
