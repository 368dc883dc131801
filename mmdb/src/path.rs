// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Record paths: the segment lists used to address a value inside a
//! decoded record.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// One step into a record: a map key or an array index. Negative indices
/// count from the end of the array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(i64),
    Key(String),
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{k}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        PathSegment::Key(s.to_string())
    }
}

impl From<i64> for PathSegment {
    fn from(i: i64) -> Self {
        PathSegment::Index(i)
    }
}

/// Render the first `upto` segments of a path, as carried by structural
/// error messages.
#[must_use]
pub fn render_path(segments: &[PathSegment], upto: usize) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().take(upto).enumerate() {
        if i > 0 && matches!(seg, PathSegment::Key(_)) {
            out.push('.');
        }
        out.push_str(&seg.to_string());
    }
    out
}
