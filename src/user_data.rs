//! Boot script payload and the console sentinels derived from it.
//!
//! User data can be provided inline or via a file path; when neither is given
//! the default cloud-config is used. Its `final_message` is what makes the
//! success sentinel appear on the console.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Console text printed by cloud-init once every boot stage has completed.
pub const SUCCESS_SENTINEL: &str = "The system is finally up";
/// Console text printed by cloud-init when the user script failed.
pub const FAILURE_SENTINEL: &str = "Failed to run module scripts-user";

/// Cloud-config submitted when no custom user data is supplied.
pub const DEFAULT_USER_DATA: &str = "#cloud-config\n\
final_message: \"The system is finally up, after $UPTIME seconds\"\n";

/// Errors raised while resolving user data.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum UserDataError {
    /// Raised when both inline and file sources are provided.
    #[error("user data cannot be provided both inline and via file")]
    BothProvided,
    /// Raised when an inline payload is empty or only whitespace.
    #[error("user data must not be empty")]
    InlineEmpty,
    /// Raised when a file path is empty or only whitespace.
    #[error("user data file path must not be empty")]
    FilePathEmpty,
    /// Raised when a file resolves to empty or only whitespace.
    #[error("user data file must not be empty")]
    FileEmpty,
    /// Raised when reading the file source fails.
    #[error("failed to read user data file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Resolves user data from an inline value, a file, or the default.
///
/// Inline and file sources are mutually exclusive. Payloads are trimmed only
/// for the emptiness check; the returned text is unchanged.
///
/// # Errors
///
/// Returns [`UserDataError`] when the inputs are invalid or the file cannot be
/// read.
pub fn resolve_user_data(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<String, UserDataError> {
    if inline.is_some() && file.is_some() {
        return Err(UserDataError::BothProvided);
    }

    if let Some(payload) = inline {
        if payload.trim().is_empty() {
            return Err(UserDataError::InlineEmpty);
        }
        return Ok(payload.to_owned());
    }

    let Some(path) = file else {
        return Ok(DEFAULT_USER_DATA.to_owned());
    };
    if path.trim().is_empty() {
        return Err(UserDataError::FilePathEmpty);
    }

    let expanded = expand_tilde(path);
    let content = read_to_string_ambient(&expanded).map_err(|message| UserDataError::FileRead {
        path: expanded.clone(),
        message,
    })?;
    if content.trim().is_empty() {
        return Err(UserDataError::FileEmpty);
    }
    Ok(content)
}

/// Encodes user data the way the compute API expects it.
#[must_use]
pub fn encode_user_data(payload: &str) -> String {
    STANDARD.encode(payload)
}

/// Expands a leading `~/` using `HOME`.
fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{home}/{rest}"),
        _ => path.to_owned(),
    }
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);

    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path_buf}"))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use rstest::rstest;
    use tempfile::NamedTempFile;

    use super::*;

    #[rstest]
    fn default_payload_emits_success_sentinel() {
        assert_eq!(resolve_user_data(None, None), Ok(DEFAULT_USER_DATA.to_owned()));
        assert!(DEFAULT_USER_DATA.contains(SUCCESS_SENTINEL));
        assert!(DEFAULT_USER_DATA.starts_with("#cloud-config"));
    }

    #[rstest]
    fn inline_payload_is_returned_untouched() {
        let payload = "#!/bin/sh\necho hi\n";
        assert_eq!(resolve_user_data(Some(payload), None), Ok(payload.to_owned()));
    }

    #[rstest]
    #[case(Some("x"), Some("f"), UserDataError::BothProvided)]
    #[case(Some(" \n"), None, UserDataError::InlineEmpty)]
    #[case(None, Some("  "), UserDataError::FilePathEmpty)]
    fn rejects_bad_inputs(
        #[case] inline: Option<&str>,
        #[case] file: Option<&str>,
        #[case] expected: UserDataError,
    ) {
        assert_eq!(resolve_user_data(inline, file), Err(expected));
    }

    #[rstest]
    fn reads_payload_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "#cloud-config").expect("write");
        let path = file.path().to_str().expect("utf8 path");

        let payload = resolve_user_data(None, Some(path)).expect("resolve");
        assert_eq!(payload, "#cloud-config\n");
    }

    #[rstest]
    fn empty_file_is_rejected() {
        let file = NamedTempFile::new().expect("temp file");
        let path = file.path().to_str().expect("utf8 path");
        assert_eq!(resolve_user_data(None, Some(path)), Err(UserDataError::FileEmpty));
    }

    #[rstest]
    fn missing_file_reports_path() {
        let result = resolve_user_data(None, Some("/nonexistent/simple-stress/user-data"));
        let Err(UserDataError::FileRead { path, .. }) = result else {
            panic!("expected read failure, got {result:?}");
        };
        assert_eq!(path, "/nonexistent/simple-stress/user-data");
    }

    #[rstest]
    fn encodes_with_standard_alphabet() {
        assert_eq!(encode_user_data("#cloud-config"), "I2Nsb3VkLWNvbmZpZw==");
    }
}
