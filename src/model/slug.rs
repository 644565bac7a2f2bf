use serde::{Deserialize, Serialize};
use snafu::{ensure, Snafu};

/// Slugs are strictly shorter than this many bytes.
pub const MAX_SLUG_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum SlugError {
    #[snafu(display("slug is empty"))]
    Empty,

    #[snafu(display("slug is {len} bytes long, the limit is {}", MAX_SLUG_LEN - 1))]
    TooLong { len: usize },

    #[snafu(display("slug contains `{character}`, only lowercase letters, digits and `-` are allowed"))]
    InvalidCharacter { character: char },
}

/// The identifier of an article, e.g. `go-sqlite`.
///
/// Only `[a-z0-9-]` is accepted, so a slug can be used verbatim in paths and as a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

impl TryFrom<String> for Slug {
    type Error = SlugError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ensure!(!value.is_empty(), EmptySnafu);
        ensure!(value.len() < MAX_SLUG_LEN, TooLongSnafu { len: value.len() });

        if let Some(character) = value.chars().find(|c| !is_slug_char(*c)) {
            return InvalidCharacterSnafu { character }.fail();
        }

        Ok(Self(value))
    }
}

impl std::str::FromStr for Slug {
    type Err = SlugError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::try_from(input.to_string())
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
