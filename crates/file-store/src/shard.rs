//! File naming and directory sharding
//!
//! A stored file's name is derived from its record id and the basename of the
//! resource it caches, sanitized to word characters. With a shard length of
//! `L`, the first `L` characters of the name become a subdirectory so that no
//! single directory collects every file of a store.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Largest accepted shard length; a record id is 32 characters long
pub const MAX_SHARD_LENGTH: u32 = 32;

/// Remainder offset used once the shard covers the whole id. It skips the
/// `_` separating the id from the resource basename, which keeps the on-disk
/// layout of existing stores readable.
const FULL_ID_REMAINDER_OFFSET: usize = 33;

static NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").unwrap());

/// Location of a stored file relative to its store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardedName {
    pub subdirectory: Option<String>,
    pub file_name: String,
}

impl ShardedName {
    /// Relative location as persisted in `file_location`
    pub fn location(&self) -> String {
        match &self.subdirectory {
            Some(subdirectory) => format!("{}/{}", subdirectory, self.file_name),
            None => self.file_name.clone(),
        }
    }
}

/// Replace every run of non-word characters with a single `_`
pub fn sanitize_file_name(name: &str) -> String {
    NON_WORD_RE.replace_all(name, "_").into_owned()
}

/// Derive the sanitized file name for a record caching `resource`.
///
/// Resources without a meaningful path (empty, `/` or `/{id}`) are named by
/// the id alone, everything else becomes `{id}_{basename}`.
pub fn file_name_for(id: &str, resource: &str) -> String {
    let path = resource_path(resource);

    let name = if path.is_empty() || path == "/" || path == format!("/{}", id) {
        id.to_string()
    } else {
        let basename = path.rsplit('/').next().unwrap_or_default();
        format!("{}_{}", id, basename)
    };

    sanitize_file_name(&name)
}

/// Split `name` into a shard subdirectory and the remaining file name.
///
/// A shard length of 0 disables sharding. Names that would leave an empty
/// remainder are kept unsharded.
pub fn shard(name: &str, shard_length: u32) -> ShardedName {
    let unsharded = || ShardedName {
        subdirectory: None,
        file_name: name.to_string(),
    };

    if shard_length == 0 {
        return unsharded();
    }

    let shard_length = shard_length as usize;
    let remainder_offset = if shard_length < MAX_SHARD_LENGTH as usize {
        shard_length
    } else {
        FULL_ID_REMAINDER_OFFSET
    };

    let subdirectory = &name[..char_offset(name, shard_length)];
    let remainder = &name[char_offset(name, remainder_offset)..];

    if remainder.is_empty() {
        return unsharded();
    }

    ShardedName {
        subdirectory: Some(subdirectory.to_string()),
        file_name: remainder.to_string(),
    }
}

/// Byte offset of the `chars`-th character, clamped to the end of `s`
fn char_offset(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(offset, _)| offset)
        .unwrap_or(s.len())
}

/// Path component of a resource locator; plain strings are treated as paths
fn resource_path(resource: &str) -> String {
    match Url::parse(resource) {
        Ok(url) => url.path().to_string(),
        Err(_) => resource
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}
