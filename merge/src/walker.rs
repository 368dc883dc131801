// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Path walking over decoded records. Missing keys and out-of-range
//! indices are data, not errors; a segment of the wrong kind is a contract
//! violation and fatal.

use mmdb::path::{PathSegment, render_path};
use mmdb::value::Value;

use crate::errors::MergeError;

/// Walk `path` through `root`. Returns a borrow of the addressed value,
/// `None` when a step is absent. The empty path is the root itself.
pub fn walk<'v>(root: &'v Value, path: &[PathSegment]) -> Result<Option<&'v Value>, MergeError> {
    let mut cur = root;
    for (walked, segment) in path.iter().enumerate() {
        match (segment, cur) {
            (PathSegment::Key(key), Value::Map(_)) => match cur.get(key) {
                Some(next) => cur = next,
                None => return Ok(None),
            },
            (PathSegment::Index(index), Value::Array(items)) => {
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let rebased = if *index < 0 { len + *index } else { *index };
                if rebased < 0 || rebased >= len {
                    return Ok(None);
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    cur = &items[rebased as usize];
                }
            }
            (_, found) => {
                return Err(MergeError::StructuralDecode {
                    path: render_path(path, walked + 1),
                    found: found.kind(),
                });
            }
        }
    }
    Ok(Some(cur))
}
