//! Line protocol spoken between the pool and its helper processes.
//!
//! The pool writes one request per line:
//!
//! ```text
//! GEN|<url>|<dest>|<frame>
//! ```
//!
//! and the helper answers each request with exactly one line, `OK` on
//! success. Anything else is a failure; the bundled helper uses `ERR <reason>`.

use std::path::{Path, PathBuf};

use crate::error::ThumbError;

pub const GEN_PREFIX: &str = "GEN|";
pub const OK_LINE: &str = "OK";
pub const ERR_PREFIX: &str = "ERR";
pub const MIN_SIZE_REASON: &str = "below minimum size";

/// A decoded `GEN` line, as seen by the helper side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenCommand {
    pub url: String,
    pub dest: PathBuf,
    pub frame: Option<String>,
}

/// Build the request line for one job, without the trailing newline.
///
/// Line breaks in the URL are percent-encoded so a hostile locator cannot
/// split the request in two. The frame tag cannot contain separators.
pub fn encode_request(url: &str, dest: &Path, frame: Option<&str>) -> String {
    let url = url.replace('\r', "%0D").replace('\n', "%0A");
    let frame = frame.unwrap_or("").replace(['|', '\r', '\n'], "_");
    format!("{GEN_PREFIX}{url}|{}|{frame}", dest.display())
}

/// Parse a request line on the helper side.
///
/// The URL is the only field that may legitimately contain `|`, so the line
/// is split from the right.
pub fn decode_request(line: &str) -> Result<GenCommand, ThumbError> {
    let body = line
        .trim_end_matches(['\r', '\n'])
        .strip_prefix(GEN_PREFIX)
        .ok_or_else(|| ThumbError::Protocol(line.to_string()))?;

    let mut fields = body.rsplitn(3, '|');
    let frame = fields.next();
    let dest = fields.next();
    let url = fields.next();

    match (url, dest, frame) {
        (Some(url), Some(dest), Some(frame)) if !url.is_empty() && !dest.is_empty() => {
            Ok(GenCommand {
                url: url.to_string(),
                dest: PathBuf::from(dest),
                frame: (!frame.is_empty()).then(|| frame.to_string()),
            })
        }
        _ => Err(ThumbError::Protocol(line.to_string())),
    }
}

/// Interpret one response line from a helper.
pub fn parse_response(line: &str) -> Result<(), ThumbError> {
    let line = line.trim();
    if line == OK_LINE {
        return Ok(());
    }

    match line.strip_prefix(ERR_PREFIX) {
        Some(reason) => {
            let reason = reason.trim();
            if reason == MIN_SIZE_REASON {
                Err(ThumbError::BelowMinimumSize)
            } else {
                Err(ThumbError::Generation(reason.to_string()))
            }
        }
        None => Err(ThumbError::Protocol(line.to_string())),
    }
}

/// Build the response line for a finished job, without the trailing newline.
pub fn encode_response(result: &Result<(), ThumbError>) -> String {
    match result {
        Ok(()) => OK_LINE.to_string(),
        Err(ThumbError::BelowMinimumSize) => format!("{ERR_PREFIX} {MIN_SIZE_REASON}"),
        Err(ThumbError::Generation(reason)) => {
            format!("{ERR_PREFIX} {}", reason.replace(['\r', '\n'], " "))
        }
        Err(err) => format!("{ERR_PREFIX} {}", err.to_string().replace(['\r', '\n'], " ")),
    }
}
