use anyhow::{Context, Result, anyhow};
use regex::Regex;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn format_seconds(value: f64) -> String {
    format!("{value:.6}")
}

/// Numeric index captured by the first group of `pattern` in the file name.
pub fn captured_index(pattern: &Regex, path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    pattern.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Files in `dir` whose names match `pattern`, ordered by the captured number.
/// A lexical sort would put `10` before `2`.
pub fn indexed_files(dir: &Path, pattern: &Regex) -> Result<Vec<(u32, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to list directory {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(index) = captured_index(pattern, &path) {
            found.push((index, path));
        }
    }
    found.sort_by_key(|(index, _)| *index);
    Ok(found)
}

/// Deterministic artifact path beside the source: `deck.pptx` -> `deck.<ext>`.
pub fn sibling_with_extension(source: &Path, extension: &str) -> Result<PathBuf> {
    let stem = file_stem(source)?;
    Ok(source.with_file_name(format!("{stem}.{extension}")))
}

pub fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Path {} has no valid file name", path.display()))
}

/// Recursive listing used in diagnostics to show what a tool actually produced.
pub fn describe_tree(dir: &Path) -> String {
    if !dir.exists() {
        return format!("{} does not exist", dir.display());
    }

    let entries: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if entry.file_type().is_dir() {
                format!("{}/", relative.display())
            } else {
                format!("{} ({} bytes)", relative.display(), size)
            }
        })
        .collect();

    if entries.is_empty() {
        format!("{} is empty", dir.display())
    } else {
        format!("contents of {}:\n{}", dir.display(), entries.join("\n"))
    }
}

/// Move a finished artifact into its final location, replacing any previous one.
/// Falls back to [`copy_into_place`] when the rename crosses filesystems.
pub fn move_into_place(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }

    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    copy_into_place(source, destination)?;
    fs::remove_file(source)
        .with_context(|| format!("Failed to remove staged file {}", source.display()))?;
    Ok(())
}

/// Copy `source` next to `destination` and rename it over the destination.
/// A failed copy leaves the previous destination untouched and no partial file behind.
pub fn copy_into_place(source: &Path, destination: &Path) -> Result<()> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let describe = || {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            destination.display()
        )
    };

    let mut staged = tempfile::NamedTempFile::new_in(parent).with_context(describe)?;
    let mut input = File::open(source).with_context(describe)?;
    io::copy(&mut input, staged.as_file_mut()).with_context(describe)?;
    staged.as_file().sync_all().with_context(describe)?;
    staged
        .persist(destination)
        .map_err(|err| err.error)
        .with_context(describe)?;
    Ok(())
}

/// Expand `~` and environment variables in configured paths.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn indexed_files_sorts_numerically() {
        let temp = tempdir().unwrap();
        for n in [10, 2, 1, 9, 11] {
            fs::write(temp.path().join(format!("page-{n}.png")), b"x").unwrap();
        }
        fs::write(temp.path().join("notes.txt"), b"x").unwrap();

        let pattern = Regex::new(r"^page-(\d+)\.png$").unwrap();
        let indices: Vec<u32> = indexed_files(temp.path(), &pattern)
            .unwrap()
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        assert_eq!(indices, vec![1, 2, 9, 10, 11]);
    }

    #[test]
    fn sibling_path_is_deterministic() {
        let source = Path::new("/decks/quarterly review.pptx");
        let first = sibling_with_extension(source, "mp4").unwrap();
        let second = sibling_with_extension(source, "mp4").unwrap();
        assert_eq!(first, PathBuf::from("/decks/quarterly review.mp4"));
        assert_eq!(first, second);
    }

    #[test]
    fn move_into_place_overwrites() {
        let temp = tempdir().unwrap();
        let staged = temp.path().join("staged.mp4");
        let dest = temp.path().join("out").join("deck.mp4");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"old").unwrap();
        fs::write(&staged, b"new").unwrap();

        move_into_place(&staged, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new");
        assert!(!staged.exists());
    }

    #[test]
    fn copy_into_place_replaces_destination_without_leftovers() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("work").join("deck.wav");
        let out = temp.path().join("out");
        let dest = out.join("deck.wav");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(&dest, b"previous").unwrap();
        fs::write(&source, b"narration").unwrap();

        copy_into_place(&source, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"narration");
        assert!(source.exists());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
    }

    #[test]
    fn failed_copy_keeps_previous_destination() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("deck.mp4");
        fs::write(&dest, b"previous").unwrap();

        let missing = temp.path().join("work").join("missing.mp4");
        assert!(copy_into_place(&missing, &dest).is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"previous");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn describe_tree_lists_files() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("deck.pdf"), b"pdf").unwrap();
        let listing = describe_tree(temp.path());
        assert!(listing.contains("deck.pdf (3 bytes)"));

        let empty = tempdir().unwrap();
        assert!(describe_tree(empty.path()).ends_with("is empty"));
    }
}
