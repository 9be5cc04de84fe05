//! Trigger input parsing
//!
//! A trigger names its input with a single `path` URI. The container is the
//! scheme, authority and first path segment; everything after that is the
//! object prefix.

use url::{Position, Url};

use super::errors::{MapReduceError, MapReduceResult};
use super::types::WorkRequest;

/// Split a trigger `path` into container and prefix
pub fn parse_trigger_path(path: Option<&str>) -> MapReduceResult<WorkRequest> {
    let raw = path
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| MapReduceError::input("required query parameter 'path' not found"))?;

    let url = Url::parse(raw)
        .map_err(|e| MapReduceError::input(format!("'{}' is not a valid URI: {}", raw, e)))?;

    let mut segments = url
        .path_segments()
        .ok_or_else(|| MapReduceError::input(format!("'{}' has no path", raw)))?;

    let container_name = segments
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| MapReduceError::input(format!("'{}' does not name a container", raw)))?;
    let prefix = segments.collect::<Vec<_>>().join("/");

    let authority = &url[..Position::BeforePath];
    Ok(WorkRequest::new(
        format!("{}/{}", authority, container_name),
        prefix,
    ))
}
