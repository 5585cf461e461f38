//! Form input and file upload validation.

use regex::{Regex, RegexBuilder};

/// Largest accepted upload (5 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// MIME types accepted for upload.
pub const ALLOWED_UPLOAD_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
];

const PASSWORD_SYMBOLS: &str = "@$!%*#?&";

const SQL_PATTERNS: &[&str] = &[
    r"\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|UNION|SCRIPT)\b",
    r"\b(OR|AND)\s+\d+\s*=\s*\d+",
    r"(--|/\*|\*/|;)",
    r"\b(CHAR|NCHAR|VARCHAR|NVARCHAR|EXEC|EXECUTE)\s*\(",
    r"\b(SP_|XP_)\w+",
];

/// Kind of a form input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputKind {
    #[default]
    Text,
    Email,
    Tel,
    Password,
    Number,
}

/// Why a field value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("this field is required")]
    Required,

    #[error("enter a valid email address")]
    InvalidEmail,

    #[error("enter a valid mobile number")]
    InvalidPhone,

    #[error("password must be 8-20 characters and contain letters and digits")]
    WeakPassword,

    #[error("enter a valid number")]
    InvalidNumber,

    #[error("at least {min} characters required")]
    TooShort { min: usize },

    #[error("at most {max} characters allowed")]
    TooLong { max: usize },

    #[error("input contains illegal characters")]
    IllegalCharacters,
}

/// Constraints declared on one form field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSpec {
    pub name: String,
    pub kind: InputKind,
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: InputKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }
}

/// A rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub error: ValidationError,
}

/// Validates field values against their declared constraints.
#[derive(Debug, Clone)]
pub struct InputValidator {
    email: Regex,
    phone: Regex,
    sql: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> Result<Self, regex::Error> {
        let sql = SQL_PATTERNS
            .iter()
            .map(|pattern| RegexBuilder::new(pattern).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            email: Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")?,
            phone: Regex::new(r"^1[3-9]\d{9}$")?,
            sql,
        })
    }

    /// Validate one value.
    ///
    /// Checks run in order: required, kind, length, SQL patterns. Kind
    /// checks are skipped for empty values.
    pub fn validate(&self, spec: &FieldSpec, value: &str) -> Result<(), ValidationError> {
        if spec.required && value.trim().is_empty() {
            return Err(ValidationError::Required);
        }

        if !value.is_empty() {
            match spec.kind {
                InputKind::Email if !self.is_valid_email(value) => {
                    return Err(ValidationError::InvalidEmail)
                }
                InputKind::Tel if !self.is_valid_phone(value) => {
                    return Err(ValidationError::InvalidPhone)
                }
                InputKind::Password if !is_valid_password(value) => {
                    return Err(ValidationError::WeakPassword)
                }
                InputKind::Number if !is_valid_number(value) => {
                    return Err(ValidationError::InvalidNumber)
                }
                _ => {}
            }
        }

        let length = value.chars().count();
        if let Some(min) = spec.min_length {
            if length < min {
                return Err(ValidationError::TooShort { min });
            }
        }
        if let Some(max) = spec.max_length {
            if length > max {
                return Err(ValidationError::TooLong { max });
            }
        }

        if self.contains_sql_injection(value) {
            return Err(ValidationError::IllegalCharacters);
        }
        Ok(())
    }

    /// Validate every field, collecting all failures.
    pub fn validate_form<'a, I>(&self, fields: I) -> Vec<FieldError>
    where
        I: IntoIterator<Item = (&'a FieldSpec, &'a str)>,
    {
        fields
            .into_iter()
            .filter_map(|(spec, value)| {
                self.validate(spec, value).err().map(|error| FieldError {
                    field: spec.name.clone(),
                    error,
                })
            })
            .collect()
    }

    pub fn is_valid_email(&self, value: &str) -> bool {
        self.email.is_match(value)
    }

    /// Mainland China mobile number.
    pub fn is_valid_phone(&self, value: &str) -> bool {
        self.phone.is_match(value)
    }

    pub fn contains_sql_injection(&self, value: &str) -> bool {
        self.sql.iter().any(|pattern| pattern.is_match(value))
    }
}

/// 8-20 characters from letters, digits and `@$!%*#?&`, with at least one
/// letter and one digit.
pub fn is_valid_password(value: &str) -> bool {
    let length = value.chars().count();
    (8..=20).contains(&length)
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SYMBOLS.contains(c))
        && value.chars().any(|c| c.is_ascii_alphabetic())
        && value.chars().any(|c| c.is_ascii_digit())
}

/// Finite decimal number.
pub fn is_valid_number(value: &str) -> bool {
    value
        .trim()
        .parse::<f64>()
        .map(f64::is_finite)
        .unwrap_or(false)
}

/// Metadata of a file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size,
        }
    }
}

/// Why an upload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileRejection {
    #[error("file exceeds {limit} bytes: {size}")]
    TooLarge { size: u64, limit: u64 },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("file name contains illegal characters: {0}")]
    IllegalName(String),
}

/// Upload limits.
#[derive(Debug, Clone)]
pub struct FileUploadPolicy {
    pub max_bytes: u64,
    pub allowed_types: Vec<String>,
}

impl Default for FileUploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
            allowed_types: ALLOWED_UPLOAD_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl FileUploadPolicy {
    /// Check size, then type, then name.
    pub fn validate(&self, file: &FileDescriptor) -> Result<(), FileRejection> {
        if file.size > self.max_bytes {
            return Err(FileRejection::TooLarge {
                size: file.size,
                limit: self.max_bytes,
            });
        }
        if !self.allowed_types.iter().any(|t| *t == file.mime_type) {
            return Err(FileRejection::UnsupportedType(file.mime_type.clone()));
        }
        let name_ok = !file.name.is_empty()
            && file
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !name_ok {
            return Err(FileRejection::IllegalName(file.name.clone()));
        }
        Ok(())
    }

    /// Validate a selection; the first rejected file rejects all of them.
    pub fn validate_all(&self, files: &[FileDescriptor]) -> Result<(), FileRejection> {
        files.iter().try_for_each(|file| self.validate(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::new().unwrap()
    }

    #[test]
    fn test_required() {
        let spec = FieldSpec::new("username", InputKind::Text).required();
        assert_eq!(validator().validate(&spec, "   "), Err(ValidationError::Required));
        assert!(validator().validate(&spec, "alice").is_ok());
    }

    #[test]
    fn test_kind_checks() {
        let v = validator();
        let email = FieldSpec::new("email", InputKind::Email);
        assert!(v.validate(&email, "a@b.co").is_ok());
        assert_eq!(v.validate(&email, "a@b"), Err(ValidationError::InvalidEmail));
        // empty optional values skip kind checks
        assert!(v.validate(&email, "").is_ok());

        let tel = FieldSpec::new("phone", InputKind::Tel);
        assert!(v.validate(&tel, "13812345678").is_ok());
        assert_eq!(v.validate(&tel, "12812345678"), Err(ValidationError::InvalidPhone));

        let number = FieldSpec::new("amount", InputKind::Number);
        assert!(v.validate(&number, "12.5").is_ok());
        assert_eq!(v.validate(&number, "12abc"), Err(ValidationError::InvalidNumber));
        assert_eq!(v.validate(&number, "inf"), Err(ValidationError::InvalidNumber));
    }

    #[test]
    fn test_password_rules() {
        assert!(is_valid_password("abc12345"));
        assert!(is_valid_password("P@ssw0rd!"));
        assert!(!is_valid_password("abcdefgh"));
        assert!(!is_valid_password("12345678"));
        assert!(!is_valid_password("ab1"));
        assert!(!is_valid_password("abc1234567890123456789"));
        assert!(!is_valid_password("abc 12345"));
    }

    #[test]
    fn test_length_limits() {
        let spec = FieldSpec::new("nickname", InputKind::Text)
            .with_min_length(2)
            .with_max_length(4);
        let v = validator();
        assert_eq!(v.validate(&spec, "a"), Err(ValidationError::TooShort { min: 2 }));
        assert_eq!(v.validate(&spec, "abcde"), Err(ValidationError::TooLong { max: 4 }));
        // counted in characters, not bytes
        assert!(v.validate(&spec, "红包").is_ok());
    }

    #[test]
    fn test_sql_injection_patterns() {
        let v = validator();
        assert!(v.contains_sql_injection("1 or 1=1"));
        assert!(v.contains_sql_injection("x'; drop table users"));
        assert!(v.contains_sql_injection("admin' --"));
        assert!(v.contains_sql_injection("char(65)"));
        assert!(v.contains_sql_injection("exec xp_cmdshell"));
        assert!(!v.contains_sql_injection("ordinary remark"));

        let spec = FieldSpec::new("remark", InputKind::Text);
        assert_eq!(
            v.validate(&spec, "union select"),
            Err(ValidationError::IllegalCharacters)
        );
    }

    #[test]
    fn test_validate_form_collects_all_errors() {
        let email = FieldSpec::new("email", InputKind::Email).required();
        let phone = FieldSpec::new("phone", InputKind::Tel);
        let name = FieldSpec::new("name", InputKind::Text);
        let errors = validator().validate_form([
            (&email, ""),
            (&phone, "123"),
            (&name, "alice"),
        ]);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "email");
        assert_eq!(errors[1].error, ValidationError::InvalidPhone);
    }

    #[test]
    fn test_file_policy() {
        let policy = FileUploadPolicy::default();
        assert!(policy
            .validate(&FileDescriptor::new("avatar.png", "image/png", 1024))
            .is_ok());
        assert!(matches!(
            policy.validate(&FileDescriptor::new("big.png", "image/png", MAX_UPLOAD_BYTES + 1)),
            Err(FileRejection::TooLarge { .. })
        ));
        assert!(matches!(
            policy.validate(&FileDescriptor::new("run.exe", "application/x-msdownload", 10)),
            Err(FileRejection::UnsupportedType(_))
        ));
        assert!(matches!(
            policy.validate(&FileDescriptor::new("../etc/passwd", "text/plain", 10)),
            Err(FileRejection::IllegalName(_))
        ));
        assert!(matches!(
            policy.validate(&FileDescriptor::new("我的.txt", "text/plain", 10)),
            Err(FileRejection::IllegalName(_))
        ));
    }

    #[test]
    fn test_first_rejected_file_rejects_selection() {
        let policy = FileUploadPolicy::default();
        let files = vec![
            FileDescriptor::new("a.txt", "text/plain", 1),
            FileDescriptor::new("b.svg", "image/svg+xml", 1),
        ];
        assert!(matches!(
            policy.validate_all(&files),
            Err(FileRejection::UnsupportedType(t)) if t == "image/svg+xml"
        ));
    }
}
