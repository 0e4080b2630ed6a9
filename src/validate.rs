//! Field validation for posts and board settings.
//!
//! Every check returns a field-scoped [ValidationError] instead of failing the
//! whole request, so a caller can show one message per form field. Lengths are
//! counted in UTF-16 code units everywhere in this module.

use std::fmt;

use derive_more::Display;

use once_cell::sync::Lazy;

use regex::Regex;

use serde::Serialize;

/// Maximum length of a board name.
pub const BOARD_NAME_MAX: usize = 50;
/// Maximum length of a board's default author name.
pub const DEFAULT_AUTHOR_NAME_MAX: usize = 20;
/// Maximum length of a board's local rule.
pub const LOCAL_RULE_MAX: usize = 100;
/// Maximum length of a thread title.
pub const TITLE_MAX: usize = 100;
/// Maximum length of a raw author name, trip key included.
pub const AUTHOR_NAME_MAX: usize = 100;
/// Maximum length of the mail field.
pub const MAIL_MAX: usize = 255;

static MAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("mail pattern is a valid regex")
});

static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$")
        .expect("slug pattern is a valid regex")
});

/// Length of a string in UTF-16 code units.
pub fn text_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// The field that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    #[display(fmt = "board name")]
    BoardName,
    #[display(fmt = "board slug")]
    BoardSlug,
    #[display(fmt = "default author name")]
    DefaultAuthorName,
    #[display(fmt = "local rule")]
    LocalRule,
    #[display(fmt = "max content length")]
    MaxContentLength,
    #[display(fmt = "title")]
    Title,
    #[display(fmt = "name")]
    AuthorName,
    #[display(fmt = "mail")]
    Mail,
    #[display(fmt = "content")]
    Content,
    #[display(fmt = "hash id")]
    HashId,
    #[display(fmt = "response number")]
    ResponseNumber,
    #[display(fmt = "thread id")]
    ThreadId,
    #[display(fmt = "response query")]
    ResponseQuery,
}

/// What was wrong with the field.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    #[display(fmt = "is required")]
    Empty,
    #[display(fmt = "must be at most {} characters", max)]
    TooLong { max: usize },
    #[display(fmt = "must be exactly {} characters", expected)]
    WrongLength { expected: usize },
    #[display(fmt = "must be greater than zero")]
    NotPositive,
    #[display(fmt = "contains a forbidden character '{}'", found)]
    ForbiddenCharacter { found: char },
    #[display(fmt = "is malformed")]
    Malformed,
}

/// A single field-scoped validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[display(fmt = "The {} {}", field, problem)]
pub struct ValidationError {
    pub field: Field,
    pub problem: Problem,
}

impl ValidationError {
    pub fn new(field: Field, problem: Problem) -> ValidationError {
        ValidationError { field, problem }
    }
}

impl std::error::Error for ValidationError {}

/// Every validation failure for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> ValidationErrors {
        ValidationErrors(Vec::new())
    }

    /// Record the error of `res`, handing back its value if it was ok.
    pub fn check<T>(
        &mut self,
        res: std::result::Result<T, ValidationError>,
    ) -> Option<T> {
        match res {
            Ok(value) => Some(value),
            Err(err) => {
                self.0.push(err);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// The failure for a given field, if any.
    pub fn for_field(&self, field: Field) -> Option<&ValidationError> {
        self.0.iter().find(|err| err.field == field)
    }

    /// Turn the collected failures into a result.
    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(err: ValidationError) -> ValidationErrors {
        ValidationErrors(vec![err])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

fn check_len(
    field: Field,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let len = text_len(value);

    if len < min {
        return Err(ValidationError::new(field, Problem::Empty));
    }
    if len > max {
        return Err(ValidationError::new(field, Problem::TooLong { max }));
    }

    Ok(())
}

/// A board name: at most 50 characters.
pub fn validate_board_name(value: &str) -> Result<(), ValidationError> {
    check_len(Field::BoardName, value, 0, BOARD_NAME_MAX)
}

/// A board slug: lowercase ASCII words joined by single hyphens.
pub fn validate_board_slug(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(Field::BoardSlug, Problem::Empty));
    }
    if !SLUG_PATTERN.is_match(value) {
        return Err(ValidationError::new(Field::BoardSlug, Problem::Malformed));
    }
    Ok(())
}

/// The name shown for posters who leave the name field empty.
pub fn validate_default_author_name(
    value: &str,
) -> Result<(), ValidationError> {
    check_len(Field::DefaultAuthorName, value, 1, DEFAULT_AUTHOR_NAME_MAX)
}

pub fn validate_local_rule(value: &str) -> Result<(), ValidationError> {
    check_len(Field::LocalRule, value, 1, LOCAL_RULE_MAX)
}

pub fn validate_max_content_length(value: i64) -> Result<(), ValidationError> {
    if value <= 0 {
        return Err(ValidationError::new(
            Field::MaxContentLength,
            Problem::NotPositive,
        ));
    }
    Ok(())
}

/// A validated thread title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Title(String);

impl Title {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A thread title: 1 to 100 characters, no angle brackets.
pub fn validate_title(value: &str) -> Result<Title, ValidationError> {
    check_len(Field::Title, value, 1, TITLE_MAX)?;

    if let Some(found) = value.chars().find(|c| *c == '<' || *c == '>') {
        return Err(ValidationError::new(
            Field::Title,
            Problem::ForbiddenCharacter { found },
        ));
    }

    Ok(Title(value.to_string()))
}

/// A validated mail field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Mail(String);

impl Mail {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Whether the poster asked not to bump the thread.
    pub fn is_sage(&self) -> bool {
        is_sage(&self.0)
    }
}

/// Whether a mail value is the no-bump marker, in any case.
pub fn is_sage(mail: &str) -> bool {
    mail.eq_ignore_ascii_case("sage")
}

/// The mail field: empty, `sage`, or something shaped like an address.
///
/// An absent field is treated as empty.
pub fn validate_mail(value: Option<&str>) -> Result<Mail, ValidationError> {
    let value = value.unwrap_or("");

    check_len(Field::Mail, value, 0, MAIL_MAX)?;

    if !value.is_empty() && !is_sage(value) && !MAIL_PATTERN.is_match(value) {
        return Err(ValidationError::new(Field::Mail, Problem::Malformed));
    }

    Ok(Mail(value.to_string()))
}

/// A validated response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Content(String);

impl Content {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A response body, bounded by the board's current limit.
pub fn validate_content(
    value: &str,
    max_len: usize,
) -> Result<Content, ValidationError> {
    check_len(Field::Content, value, 1, max_len)?;
    Ok(Content(value.to_string()))
}
