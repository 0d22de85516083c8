//! Source positions and extents.
//!
//! A [`Point`] is a row/column coordinate; a [`Length`] is a full extent:
//! bytes, characters, and the point spanned. Lengths are used both as
//! absolute positions (distance from the start of the input) and as
//! relative extents (the span of a token or subtree), and support the
//! addition/subtraction rules that make row-relative columns work out.

use serde::{Deserialize, Serialize};

/// A row/column coordinate within the input. Zero-based.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    pub const ZERO: Point = Point { row: 0, column: 0 };

    pub const fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// Extend this point by an extent. Crossing a row resets the column.
    pub fn add(self, rhs: Point) -> Point {
        if rhs.row > 0 {
            Point::new(self.row + rhs.row, rhs.column)
        } else {
            Point::new(self.row, self.column + rhs.column)
        }
    }

    /// The extent from `origin` to `self`. `origin` must not be past `self`.
    pub fn sub(self, origin: Point) -> Point {
        if self.row > origin.row {
            Point::new(self.row - origin.row, self.column)
        } else {
            debug_assert!(self.column >= origin.column);
            Point::new(0, self.column - origin.column)
        }
    }
}

/// An extent of input: byte count, character count, and rows/columns spanned.
///
/// `chars` may be [`Length::UNKNOWN_CHARS`] while a token is still being
/// scanned; finished trees never carry the sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Length {
    pub bytes: u32,
    pub chars: u32,
    pub extent: Point,
}

impl Length {
    pub const ZERO: Length = Length {
        bytes: 0,
        chars: 0,
        extent: Point::ZERO,
    };

    /// Sentinel for a character count that has not been measured yet.
    pub const UNKNOWN_CHARS: u32 = u32::MAX;

    pub const fn new(bytes: u32, chars: u32, extent: Point) -> Self {
        Self {
            bytes,
            chars,
            extent,
        }
    }

    pub fn is_zero(self) -> bool {
        self.bytes == 0
    }

    pub fn has_unknown_chars(self) -> bool {
        self.chars == Self::UNKNOWN_CHARS
    }

    pub fn add(self, rhs: Length) -> Length {
        Length {
            bytes: self.bytes + rhs.bytes,
            chars: self.chars + rhs.chars,
            extent: self.extent.add(rhs.extent),
        }
    }

    /// The extent from position `origin` to position `self`.
    pub fn sub(self, origin: Length) -> Length {
        debug_assert!(self.bytes >= origin.bytes);
        Length {
            bytes: self.bytes - origin.bytes,
            chars: self.chars - origin.chars,
            extent: self.extent.sub(origin.extent),
        }
    }
}

impl std::ops::Add for Length {
    type Output = Length;

    fn add(self, rhs: Length) -> Length {
        Length::add(self, rhs)
    }
}

impl std::ops::Sub for Length {
    type Output = Length;

    fn sub(self, rhs: Length) -> Length {
        Length::sub(self, rhs)
    }
}

impl std::fmt::Display for Length {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}b ({}, {})",
            self.bytes, self.extent.row, self.extent.column
        )
    }
}
