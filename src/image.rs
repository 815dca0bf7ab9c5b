//! Image references accepted on the command line.
//!
//! Only official images from the `library/` namespace of Docker Hub are
//! supported, so a reference is a bare repository name with an optional tag.

use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ImageReferenceError {
    #[error("image reference is empty")]
    Empty,
    #[error("image {0:?} is not an official library image")]
    NotLibrary(String),
    #[error("image reference {0:?} contains a digest, only tags are supported")]
    Digest(String),
    #[error("invalid character {ch:?} in image reference {reference:?}")]
    InvalidCharacter { reference: String, ch: char },
    #[error("empty tag in image reference {0:?}")]
    EmptyTag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    name: String,
    tag: String,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, ImageReferenceError> {
        if reference.is_empty() {
            return Err(ImageReferenceError::Empty);
        }
        if reference.contains('@') {
            return Err(ImageReferenceError::Digest(reference.to_owned()));
        }
        if reference.contains('/') {
            return Err(ImageReferenceError::NotLibrary(reference.to_owned()));
        }

        let (name, tag) = match reference.split_once(':') {
            Some((_, "")) => return Err(ImageReferenceError::EmptyTag(reference.to_owned())),
            Some((name, tag)) => (name, tag),
            None => (reference, DEFAULT_TAG),
        };
        if name.is_empty() {
            return Err(ImageReferenceError::Empty);
        }

        let name_ok = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c);
        let tag_ok = |c: char| c.is_ascii_alphanumeric() || "._-".contains(c);
        if let Some(ch) = name.chars().find(|c| !name_ok(*c)) {
            return Err(ImageReferenceError::InvalidCharacter {
                reference: reference.to_owned(),
                ch,
            });
        }
        if let Some(ch) = tag.chars().find(|c| !tag_ok(*c)) {
            return Err(ImageReferenceError::InvalidCharacter {
                reference: reference.to_owned(),
                ch,
            });
        }

        Ok(Self {
            name: name.to_owned(),
            tag: tag.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl FromStr for ImageReference {
    type Err = ImageReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}
