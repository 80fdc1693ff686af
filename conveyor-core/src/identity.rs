// Copyright 2025 Conveyor Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Deterministic identities for collections and documents.
//!
//! An identity is the lowercase hex SHA-1 digest of the UTF-8 bytes of the
//! components joined with [`IDENTITY_SEPARATOR`]. The format is a persisted
//! contract: collections created by earlier deployments are found again only
//! if the digest is bit-for-bit identical.
//!
//! The separator is not escaped. `("a:b", "c")` and `("a", "b:c")` produce the
//! same identity, so components that may contain `:` (such as repository URLs)
//! must always be passed in the same positions.
//!
//! # Examples
//!
//! ```rust
//! use conveyor_core::identity::{identity, IDENTITY_LEN};
//!
//! let id = identity(["git", "commit", "0.12.0", "https://example.com/repo.git"]).unwrap();
//! assert_eq!(id.len(), IDENTITY_LEN);
//! assert_eq!(id, identity(["git", "commit", "0.12.0", "https://example.com/repo.git"]).unwrap());
//! ```

use crate::error::InvalidComponentError;
use serde_json::Value;
use sha1::{Digest, Sha1};

/// Separator placed between components before hashing.
pub const IDENTITY_SEPARATOR: char = ':';

/// Length of an identity in hex characters.
pub const IDENTITY_LEN: usize = 40;

/// Computes the identity of an ordered list of non-empty components.
///
/// # Errors
///
/// Returns [`InvalidComponentError`] if the list is empty or any component is
/// the empty string.
pub fn identity<I, S>(components: I) -> Result<String, InvalidComponentError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha1::new();
    let mut count = 0usize;

    for (position, component) in components.into_iter().enumerate() {
        let component = component.as_ref();
        if component.is_empty() {
            return Err(InvalidComponentError::Empty { position });
        }
        if position > 0 {
            hasher.update([IDENTITY_SEPARATOR as u8]);
        }
        hasher.update(component.as_bytes());
        count += 1;
    }

    if count == 0 {
        return Err(InvalidComponentError::NoComponents);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Computes the identity of JSON values, each of which must be a non-empty string.
///
/// # Errors
///
/// Returns [`InvalidComponentError::NotText`] for any non-string value, in
/// addition to the conditions of [`identity`].
pub fn identity_from_values(values: &[&Value]) -> Result<String, InvalidComponentError> {
    let components = values
        .iter()
        .enumerate()
        .map(|(position, value)| match value {
            Value::String(s) => Ok(s.as_str()),
            other => Err(InvalidComponentError::NotText {
                position,
                value: other.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    identity(components)
}

/// Returns whether `candidate` has the shape of an identity.
#[must_use]
pub fn is_identity(candidate: &str) -> bool {
    candidate.len() == IDENTITY_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
