//! Stable error codes for glob-import compilation.
//!
//! All codes are SCREAMING_SNAKE_CASE and stable across versions.

/// A pattern could not be parsed as a glob.
pub const GLOB_PATTERN_SYNTAX: &str = "GLOB_PATTERN_SYNTAX";

/// A matched file's transformer failed during eager inlining.
pub const GLOB_TRANSFORM: &str = "GLOB_TRANSFORM";

/// Two different files normalized to the same specifier.
pub const GLOB_RESOLUTION_CONFLICT: &str = "GLOB_RESOLUTION_CONFLICT";

/// Eager nesting revisited a module already being compiled.
pub const GLOB_CYCLE: &str = "GLOB_CYCLE";

/// The directive's arguments are not a supported literal form.
pub const GLOB_INVALID_DIRECTIVE: &str = "GLOB_INVALID_DIRECTIVE";

/// Reading a declaring module or matched file failed.
pub const GLOB_IO: &str = "GLOB_IO";
