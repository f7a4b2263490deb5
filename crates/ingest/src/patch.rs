use std::collections::BTreeMap;
use std::path::Path;

use git2::{Commit, Delta, DiffFormat, Repository};
use historian_types::{FileDiff, Result};

/// Diffs `commit` against its first parent (or the empty tree, for a root
/// commit — `git2::diff_tree_to_tree` already treats `None` as the empty
/// tree, so no magic empty-tree SHA literal is needed). Builds per-file diff
/// text rather than a single combined patch, since `CommitRecord::diffs` is
/// keyed by path.
pub fn diff_commit(
    repo: &Repository,
    commit: &Commit,
) -> Result<(Vec<String>, BTreeMap<String, FileDiff>)> {
    let new_tree = commit.tree()?;
    let old_tree = if commit.parent_count() == 0 {
        None
    } else {
        Some(commit.parent(0)?.tree()?)
    };

    let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;

    let mut files = Vec::new();
    let mut diffs: BTreeMap<String, FileDiff> = BTreeMap::new();

    for idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(idx) else {
            continue;
        };
        if delta.new_file().is_binary() || delta.old_file().is_binary() {
            continue;
        }
        let Some(path) = delta_path(&delta) else {
            continue;
        };
        let added = matches!(delta.status(), Delta::Added | Delta::Untracked);
        let deleted = matches!(delta.status(), Delta::Deleted);
        files.push(path.clone());
        diffs.insert(
            path,
            FileDiff {
                diff: String::new(),
                added,
                deleted,
            },
        );
    }

    diff.print(DiffFormat::Patch, |delta, _hunk, line| {
        if let Some(path) = delta_path(&delta) {
            if let Some(entry) = diffs.get_mut(&path) {
                if let Ok(text) = std::str::from_utf8(line.content()) {
                    match line.origin() {
                        '+' | '-' | ' ' => entry.diff.push(line.origin()),
                        _ => {}
                    }
                    entry.diff.push_str(text);
                }
            }
        }
        true
    })?;

    Ok((files, diffs))
}

fn delta_path(delta: &git2::DiffDelta) -> Option<String> {
    delta
        .new_file()
        .path()
        .or_else(|| delta.old_file().path())
        .map(|p: &Path| p.to_string_lossy().replace('\\', "/"))
}

/// Extensions of common binary families: archives, images, audio/video,
/// executables, fonts.
const BINARY_EXTENSIONS: &[&str] = &[
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war",
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd",
    // audio/video
    "mp3", "mp4", "wav", "avi", "mov", "flac", "ogg", "webm", "mkv", "m4a",
    // executables/objects
    "exe", "dll", "so", "dylib", "bin", "o", "a", "class", "wasm",
    // fonts
    "ttf", "otf", "woff", "woff2",
];

/// Leading magic bytes of common binary formats, checked when the extension
/// check is inconclusive (no extension, unrecognized, or renamed file).
const MAGIC_PREFIXES: &[&[u8]] = &[
    &[0x89, 0x50, 0x4E, 0x47], // PNG
    &[0xFF, 0xD8, 0xFF],       // JPEG
    &[0x47, 0x49, 0x46, 0x38], // GIF
    &[0x50, 0x4B, 0x03, 0x04], // ZIP/JAR
    &[0x25, 0x50, 0x44, 0x46], // PDF
    &[0x7F, 0x45, 0x4C, 0x46], // ELF
    &[0x1F, 0x8B],             // gzip
    &[0x4F, 0x67, 0x67, 0x53], // OGG
];

fn has_binary_extension(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn has_binary_magic(bytes: &[u8]) -> bool {
    MAGIC_PREFIXES.iter().any(|magic| bytes.starts_with(magic))
}

/// Extension/magic-byte denylist of common binary families, falling back to a
/// NUL-byte sniff of the first 8 KiB for anything the denylist misses
/// (SPEC_FULL.md §6).
pub fn looks_binary(path: &str, bytes: &[u8]) -> bool {
    if has_binary_extension(path) || has_binary_magic(bytes) {
        return true;
    }
    let sample = &bytes[..bytes.len().min(8192)];
    sample.contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_binary_detects_nul_byte() {
        assert!(looks_binary("notes.txt", b"hello\0world"));
        assert!(!looks_binary("notes.txt", b"hello world"));
    }

    #[test]
    fn looks_binary_empty_is_text() {
        assert!(!looks_binary("empty.txt", b""));
    }

    #[test]
    fn looks_binary_detects_denylisted_extension() {
        assert!(looks_binary("archive.zip", b"plain text content"));
        assert!(looks_binary("photo.PNG", b"plain text content"));
    }

    #[test]
    fn looks_binary_detects_magic_bytes_regardless_of_extension() {
        assert!(looks_binary("renamed.dat", &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]));
    }

    #[test]
    fn looks_binary_allows_plain_source_file() {
        assert!(!looks_binary("main.rs", b"fn main() {}"));
    }
}
