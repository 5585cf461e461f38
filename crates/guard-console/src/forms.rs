//! Form submission guard: validation, then anti-forgery token injection.

use std::collections::BTreeMap;
use std::sync::Arc;

use guard_security::{
    FieldError, FieldSpec, FileDescriptor, FileRejection, FileUploadPolicy, InputValidator,
    TokenAuthority, ValidationError,
};

/// A visible form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub spec: FieldSpec,
    pub value: String,
}

/// A form about to be submitted.
#[derive(Debug, Clone, Default)]
pub struct Form {
    pub action: String,
    pub fields: Vec<FormField>,
    pub files: Vec<FileDescriptor>,
    hidden: BTreeMap<String, String>,
}

impl Form {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, spec: FieldSpec, value: impl Into<String>) -> Self {
        self.fields.push(FormField {
            spec,
            value: value.into(),
        });
        self
    }

    pub fn with_file(mut self, file: FileDescriptor) -> Self {
        self.files.push(file);
        self
    }

    pub fn hidden(&self, name: &str) -> Option<&str> {
        self.hidden.get(name).map(String::as_str)
    }

    pub fn set_hidden(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.hidden.insert(name.into(), value.into());
    }
}

/// Why a submission was blocked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormRejection {
    #[error("{} field(s) failed validation", .0.len())]
    Invalid(Vec<FieldError>),

    #[error(transparent)]
    File(#[from] FileRejection),
}

/// Prepares forms for submission.
pub struct FormGuard {
    validator: InputValidator,
    uploads: FileUploadPolicy,
    tokens: Arc<TokenAuthority>,
    token_field: String,
}

impl FormGuard {
    pub fn new(
        validator: InputValidator,
        uploads: FileUploadPolicy,
        tokens: Arc<TokenAuthority>,
        token_field: impl Into<String>,
    ) -> Self {
        Self {
            validator,
            uploads,
            tokens,
            token_field: token_field.into(),
        }
    }

    /// Validate the form and set the token field to the current token.
    ///
    /// A rejected form is left unchanged.
    pub fn prepare(&self, form: &mut Form) -> Result<(), FormRejection> {
        let errors = self.validator.validate_form(
            form.fields
                .iter()
                .map(|field| (&field.spec, field.value.as_str())),
        );
        if !errors.is_empty() {
            tracing::warn!(action = %form.action, failed = errors.len(), "form validation failed");
            return Err(FormRejection::Invalid(errors));
        }
        if let Err(e) = self.uploads.validate_all(&form.files) {
            tracing::warn!(action = %form.action, error = %e, "upload rejected");
            return Err(e.into());
        }

        let token = self.tokens.current_token();
        form.set_hidden(self.token_field.clone(), token.as_str());
        Ok(())
    }

    /// Validate one field as the user types.
    pub fn validate_field(&self, spec: &FieldSpec, value: &str) -> Result<(), ValidationError> {
        self.validator.validate(spec, value)
    }

    /// Validate a file selection.
    pub fn validate_files(&self, files: &[FileDescriptor]) -> Result<(), FileRejection> {
        self.uploads.validate_all(files)
    }

    pub fn token_field(&self) -> &str {
        &self.token_field
    }
}

impl std::fmt::Debug for FormGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormGuard")
            .field("token_field", &self.token_field)
            .finish()
    }
}
