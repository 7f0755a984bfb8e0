//! Validation of incoming translation requests.

use std::sync::LazyLock;

use regex::Regex;

use crate::engine::RESERVED_PARAMS;
use crate::error::ValidationError;
use crate::worker::job::{EngineParams, Job};

static RE_PAGE_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d+)-(\d+)|(\d+)-|-(\d+)|(\d+))$").unwrap());
static RE_PARAM_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap());
static RE_LANGUAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{2,3}(?:[-_][A-Za-z0-9]{1,8})*$").unwrap());

const ACCEPTED_MIME: &str = "application/pdf";

/// Languages used when a request leaves them out.
#[derive(Debug, Clone)]
pub struct SubmissionDefaults {
    pub lang_in: String,
    pub lang_out: String,
}

/// A translation request as received, before validation.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRequest {
    /// Name of the uploaded file as sent by the client.
    pub filename: Option<String>,
    pub lang_in: Option<String>,
    pub lang_out: Option<String>,
    pub pages: Option<String>,
    /// Everything else, forwarded to the engine verbatim.
    pub params: EngineParams,
}

impl SubmissionRequest {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    /// Checks the request and turns it into a queued [`Job`].
    pub fn into_job(self, defaults: &SubmissionDefaults) -> Result<Job, ValidationError> {
        let raw_name = self.filename.ok_or(ValidationError::MissingFile)?;
        let filename = sanitize_filename(&raw_name)?;
        check_pdf(&filename)?;

        let lang_in = language(self.lang_in, &defaults.lang_in)?;
        let lang_out = language(self.lang_out, &defaults.lang_out)?;
        let pages = self
            .pages
            .filter(|p| !p.trim().is_empty())
            .map(|p| normalize_pages(&p))
            .transpose()?;

        for key in self.params.keys() {
            if !RE_PARAM_KEY.is_match(key) {
                return Err(ValidationError::InvalidParamKey(key.clone()));
            }
            if RESERVED_PARAMS.contains(&key.as_str()) {
                return Err(ValidationError::ReservedParam(key.clone()));
            }
        }

        Ok(Job::queued(filename, lang_in, lang_out, pages, self.params))
    }
}

/// Reduces a client-supplied name to its final path component.
pub fn sanitize_filename(raw: &str) -> Result<String, ValidationError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." || name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFilename(raw.to_string()));
    }
    Ok(name.to_string())
}

fn check_pdf(filename: &str) -> Result<(), ValidationError> {
    let has_pdf_extension = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    let mime = mime_guess::from_path(filename).first();

    match mime {
        Some(mime) if has_pdf_extension && mime.essence_str() == ACCEPTED_MIME => Ok(()),
        _ => Err(ValidationError::UnsupportedFileType(filename.to_string())),
    }
}

fn language(value: Option<String>, default: &str) -> Result<String, ValidationError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string());
    if !RE_LANGUAGE.is_match(&value) {
        return Err(ValidationError::InvalidLanguage(value));
    }
    Ok(value)
}

/// Validates a page selection like `1-3,5,8-` and strips whitespace from it.
///
/// Pages are 1-based; ranges must not run backwards.
pub fn normalize_pages(raw: &str) -> Result<String, ValidationError> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let invalid = || ValidationError::InvalidPages(raw.to_string());

    for item in compact.split(',') {
        let caps = RE_PAGE_ITEM.captures(item).ok_or_else(invalid)?;
        let numbers: Vec<u64> = caps
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<_, _>>()?;
        if numbers.contains(&0) {
            return Err(invalid());
        }
        // `N-M` is the only form with two numbers
        if let [start, end] = numbers[..] {
            if start > end {
                return Err(invalid());
            }
        }
    }
    Ok(compact)
}
