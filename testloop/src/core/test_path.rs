use std::path::{Component, Path, PathBuf};

/// Derive the conventional test path for a source file.
///
/// A `main` path segment becomes `test` (`src/main/kotlin/a/Foo.kt` ->
/// `src/test/kotlin/a/FooTest.kt`) and `Test` is appended to the file stem.
/// Paths without a `main` segment keep their directory.
pub fn test_path_for(source: &Path) -> PathBuf {
    let mut replaced = false;
    let mut out = PathBuf::new();
    if let Some(parent) = source.parent() {
        for component in parent.components() {
            match component {
                Component::Normal(name) if !replaced && name == "main" => {
                    out.push("test");
                    replaced = true;
                }
                other => out.push(other.as_os_str()),
            }
        }
    }
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match source.extension() {
        Some(ext) => format!("{stem}Test.{}", ext.to_string_lossy()),
        None => format!("{stem}Test"),
    };
    out.push(file_name);
    out
}

/// `true` when a path looks like a test file (by directory or by name).
pub fn is_test_path(path: &Path) -> bool {
    let in_test_dir = path
        .components()
        .any(|c| matches!(c, Component::Normal(name) if name == "test" || name == "tests"));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    in_test_dir || stem.ends_with("Test") || stem.starts_with("test_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_main_for_test_and_suffixes_stem() {
        assert_eq!(
            test_path_for(Path::new("app/src/main/kotlin/com/acme/Foo.kt")),
            PathBuf::from("app/src/test/kotlin/com/acme/FooTest.kt")
        );
    }

    #[test]
    fn keeps_directory_without_main_segment() {
        assert_eq!(
            test_path_for(Path::new("lib/Bar.java")),
            PathBuf::from("lib/BarTest.java")
        );
    }

    #[test]
    fn recognizes_test_paths() {
        assert!(is_test_path(Path::new("src/test/kotlin/FooTest.kt")));
        assert!(is_test_path(Path::new("pkg/test_util.py")));
        assert!(!is_test_path(Path::new("src/main/kotlin/Foo.kt")));
    }
}
