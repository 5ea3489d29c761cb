// src/constants.rs

/// The name of the directory containing every project under the base directory.
pub const PROJECTS_DIR: &str = "Projects";

/// The file name of a project's main script (inside Projects/<name>/).
pub const MAIN_SCRIPT_FILENAME: &str = "script.project";

/// The file name of a directory-link descriptor, carrying a [Links] section.
pub const DIR_LINK_FILENAME: &str = "folder.project";

/// The file name of a project's compatibility options (inside Projects/<name>/).
pub const COMPAT_FILENAME: &str = "compat.ini";

/// The file name of the persistent script cache (inside the base directory).
pub const CACHE_FILENAME: &str = "kiln.cache.bin";

/// Engine version stamp, stored in the cache revision table.
pub const ENGINE_VERSION: &str = "030";

/// Cache format revision. Bump to invalidate caches written by older builds.
pub const CACHE_REVISION: &str = "r4";

/// Self-reference token usable in place of a script path inside statements.
pub const SELF_SCRIPT_TOKEN: &str = "%ScriptFile%";

/// Upper bound for walking a chain of link scripts. Longer chains are rejected.
pub const MAX_LINK_DEPTH: usize = 16;

/// Extension of ordinary scripts discovered under a project root.
pub const SCRIPT_EXT: &str = "script";

/// Extension of standalone link scripts.
pub const LINK_EXT: &str = "link";
