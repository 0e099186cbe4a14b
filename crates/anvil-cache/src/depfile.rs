//! Dependency list file parsing
//!
//! Compilers report the headers they actually read in one of two formats:
//! - `.txt`: one absolute path per line
//! - `.d`: a single Makefile-style `target: dep dep \` record with
//!   backslash line continuations
//!
//! Any other extension is a tooling mismatch and reported as a hard error.

use std::path::{Path, PathBuf};

use crate::error::{CacheError, CacheResult};

/// Generated header extensions that are dropped from `.txt` lists; they are
/// regenerated every build and carry no staleness signal.
const IGNORED_TXT_EXTENSIONS: [&str; 2] = ["tlh", "tli"];

/// Parse a dependency list file by extension.
///
/// Returns the declared dependency paths in file order. I/O failures are
/// surfaced so the caller can degrade them to a cache miss; an unknown
/// extension is always an error.
pub fn parse_dependency_file(path: &Path) -> CacheResult<Vec<PathBuf>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("txt") => {
            let contents =
                std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
            Ok(parse_txt(&contents))
        }
        Some("d") => {
            let contents =
                std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
            Ok(parse_makefile(&contents))
        }
        _ => Err(CacheError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Parse newline-delimited dependency lists, dropping generated headers.
fn parse_txt(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lowered = line.to_ascii_lowercase();
            !IGNORED_TXT_EXTENSIONS
                .iter()
                .any(|ext| lowered.ends_with(&format!(".{ext}")))
        })
        .map(PathBuf::from)
        .collect()
}

/// Parse a Makefile-style `.d` record.
///
/// Dependencies are everything between the first `:` and the end of the
/// record; each line may end in `\r` and a `\` continuation, both of which
/// are trimmed before splitting on whitespace.
fn parse_makefile(contents: &str) -> Vec<PathBuf> {
    let mut dependencies = Vec::new();
    let mut seen_target = false;

    for line in contents.split('\n') {
        let mut line = line.strip_suffix('\r').unwrap_or(line).trim();
        line = line.strip_suffix('\\').unwrap_or(line).trim_end();

        let fields = if seen_target {
            line
        } else {
            match line.find(':') {
                Some(colon) => {
                    seen_target = true;
                    line[colon + 1..].trim_start()
                }
                None => continue,
            }
        };

        dependencies.extend(fields.split_whitespace().map(PathBuf::from));
    }

    dependencies
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("out.o: a.h \\\n   b.h\n", &["a.h", "b.h"])]
    #[case("out.o: /inc/a.h /inc/b.h\n", &["/inc/a.h", "/inc/b.h"])]
    #[case("out.o: a.h \\\r\n b.h \\\r\n c.h\r\n", &["a.h", "b.h", "c.h"])]
    #[case("out.o:\n", &[])]
    fn makefile_records(#[case] contents: &str, #[case] expected: &[&str]) {
        let expected: Vec<PathBuf> = expected.iter().copied().map(PathBuf::from).collect();
        assert_eq!(parse_makefile(contents), expected);
    }

    #[test]
    fn txt_drops_generated_headers() {
        let parsed = parse_txt("/inc/a.h\n/gen/iface.tlh\n/gen/iface.TLI\n/inc/b.h\n");
        assert_eq!(
            parsed,
            vec![PathBuf::from("/inc/a.h"), PathBuf::from("/inc/b.h")]
        );
    }

    #[test]
    fn txt_skips_blank_lines() {
        let parsed = parse_txt("/inc/a.h\n\n  \n/inc/b.h");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn unknown_extension_is_a_hard_error() {
        let err = parse_dependency_file(Path::new("/out/main.deps")).unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedFormat { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = parse_dependency_file(Path::new("/nonexistent/main.d")).unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }

    #[test]
    fn reads_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.d");
        std::fs::write(&path, "main.o: a.h \\\n b.h\n").unwrap();
        let parsed = parse_dependency_file(&path).unwrap();
        assert_eq!(parsed, vec![PathBuf::from("a.h"), PathBuf::from("b.h")]);
    }
}
