//! Build-directory cache file parsing
//!
//! The evaluator owns the cache; the core reads the generator and source
//! directory keys from it during handshake and serves the entry list to
//! the `cache` command. Format: `KEY:TYPE=VALUE` lines with `#` and `//`
//! comment lines; `<KEY>-ADVANCED` internal entries mark keys advanced.

use super::CacheEntry;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

pub const CACHE_FILE_NAME: &str = "CMakeCache.txt";

pub const GENERATOR_KEY: &str = "CMAKE_GENERATOR";
pub const EXTRA_GENERATOR_KEY: &str = "CMAKE_EXTRA_GENERATOR";
pub const HOME_DIRECTORY_KEY: &str = "CMAKE_HOME_DIRECTORY";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed cache contents.
#[derive(Debug, Clone, Default)]
pub struct CacheFile {
    pub entries: Vec<CacheEntry>,
}

impl CacheFile {
    /// Whether `build_directory` holds a cache file at all.
    pub fn exists_in(build_directory: &Path) -> bool {
        build_directory.join(CACHE_FILE_NAME).is_file()
    }

    /// Load the cache from a build directory.
    pub fn load(build_directory: &Path) -> Result<Self, CacheError> {
        let path = build_directory.join(CACHE_FILE_NAME);
        debug!("Loading cache from {:?}", path);
        let content = std::fs::read_to_string(&path)?;
        Ok(Self::parse(&content))
    }

    /// Parse cache content.
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        let mut advanced = HashSet::new();

        for line in content.lines() {
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }

            let Some(eq_pos) = line.find('=') else { continue };
            let (key_part, value) = line.split_at(eq_pos);
            let value = &value[1..];

            let (key, entry_type) = match key_part.find(':') {
                Some(colon_pos) => (&key_part[..colon_pos], &key_part[colon_pos + 1..]),
                None => (key_part, ""),
            };

            if let Some(advanced_key) = key.strip_suffix("-ADVANCED") {
                if value == "1" {
                    advanced.insert(advanced_key.to_string());
                }
                continue;
            }

            entries.push(CacheEntry {
                key: key.to_string(),
                entry_type: entry_type.to_string(),
                value: value.to_string(),
                advanced: false,
            });
        }

        for entry in &mut entries {
            entry.advanced = advanced.contains(&entry.key);
        }

        // Sorted for stable replies.
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self { entries }
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    pub fn generator(&self) -> Option<&str> {
        self.value(GENERATOR_KEY)
    }

    pub fn extra_generator(&self) -> Option<&str> {
        self.value(EXTRA_GENERATOR_KEY)
    }

    pub fn home_directory(&self) -> Option<&str> {
        self.value(HOME_DIRECTORY_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# This is the CMakeCache file.
// For build in directory: /tmp/build

CMAKE_GENERATOR:INTERNAL=Unix Makefiles
CMAKE_HOME_DIRECTORY:INTERNAL=/tmp/src
CMAKE_BUILD_TYPE:STRING=Debug
MY_OPTION:BOOL=ON
MY_OPTION-ADVANCED:INTERNAL=1
";

    #[test]
    fn test_parse_entries() {
        let cache = CacheFile::parse(SAMPLE);
        assert_eq!(cache.generator(), Some("Unix Makefiles"));
        assert_eq!(cache.home_directory(), Some("/tmp/src"));
        assert_eq!(cache.extra_generator(), None);
        assert_eq!(cache.value("CMAKE_BUILD_TYPE"), Some("Debug"));
    }

    #[test]
    fn test_advanced_marker_applied() {
        let cache = CacheFile::parse(SAMPLE);
        let option = cache
            .entries
            .iter()
            .find(|e| e.key == "MY_OPTION")
            .unwrap();
        assert!(option.advanced);
        assert_eq!(option.entry_type, "BOOL");
        assert_eq!(option.value, "ON");

        // The -ADVANCED marker itself is not an entry.
        assert!(!cache.entries.iter().any(|e| e.key.contains("-ADVANCED")));
    }

    #[test]
    fn test_comment_and_blank_lines_skipped() {
        let cache = CacheFile::parse("# c\n\n// d\nA:STRING=1\n");
        assert_eq!(cache.entries.len(), 1);
    }

    #[test]
    fn test_value_may_contain_equals() {
        let cache = CacheFile::parse("FLAGS:STRING=-DFOO=1 -DBAR=2\n");
        assert_eq!(cache.value("FLAGS"), Some("-DFOO=1 -DBAR=2"));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE_NAME), SAMPLE).unwrap();

        assert!(CacheFile::exists_in(dir.path()));
        let cache = CacheFile::load(dir.path()).unwrap();
        assert_eq!(cache.generator(), Some("Unix Makefiles"));
    }
}
