//! Message tags

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the kind of a framed message.
///
/// Tags below [`Tag::FIRST_USER`] are reserved: [`Tag::NONE`] never
/// appears on the wire and [`Tag::ERROR`] carries a diagnostic report.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Tag(u32);

impl Tag {
    pub const NONE: Tag = Tag(0);
    pub const ERROR: Tag = Tag(1);
    pub const FIRST_USER: u32 = 16;

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Tag(raw)
    }

    /// The `n`th application tag
    #[inline]
    pub const fn user(n: u32) -> Self {
        Tag(Self::FIRST_USER + n)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Tag::NONE => write!(f, "Tag(NONE)"),
            Tag::ERROR => write!(f, "Tag(ERROR)"),
            Tag(raw) => write!(f, "Tag({})", raw),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Tag::NONE => f.write_str("none"),
            Tag::ERROR => f.write_str("error"),
            Tag(raw) => write!(f, "{}", raw),
        }
    }
}
