//! Call-site capture for allocator bookkeeping.

use core::fmt;
use core::panic::Location;
use serde::Serialize;

/// Where a tracked operation was requested from.
///
/// `function` is optional because `#[track_caller]` only yields a file position;
/// the [`site!`](crate::site) macro fills it with the enclosing module path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Site {
    /// Enclosing function or module path, when known.
    pub function: Option<&'static str>,
    /// Source file.
    pub file: &'static str,
    /// Line within `file`.
    pub line: u32,
    /// Column within `line`.
    pub column: u32,
}

impl Site {
    /// Creates a site from its parts.
    pub const fn new(
        function: Option<&'static str>,
        file: &'static str,
        line: u32,
        column: u32,
    ) -> Self {
        Self {
            function,
            file,
            line,
            column,
        }
    }

    /// Captures the caller's location.
    #[track_caller]
    #[inline]
    pub fn here() -> Self {
        let loc = Location::caller();
        Self::new(None, loc.file(), loc.line(), loc.column())
    }

    /// A placeholder for operations issued without location information.
    pub const fn unknown() -> Self {
        Self::new(None, "<unknown>", 0, 0)
    }
}

impl From<&'static Location<'static>> for Site {
    fn from(loc: &'static Location<'static>) -> Self {
        Self::new(None, loc.file(), loc.line(), loc.column())
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.function {
            Some(function) => write!(f, "{function} ({}:{}:{})", self.file, self.line, self.column),
            None => write!(f, "{}:{}:{}", self.file, self.line, self.column),
        }
    }
}

/// Expands to a [`Site`] for the current source position, including the module path.
#[macro_export]
macro_rules! site {
    () => {
        $crate::alloc::Site::new(
            ::core::option::Option::Some(::core::module_path!()),
            ::core::file!(),
            ::core::line!(),
            ::core::column!(),
        )
    };
}
