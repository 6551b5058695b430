use log::warn;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Collect importable files under the given paths
///
/// Directories are walked recursively; plain files are taken as they are.
/// Only files whose extension is in `allowed_extensions` are returned, sorted
/// and without repeats.
pub fn discover_media<P: AsRef<Path>>(
    paths: &[P],
    allowed_extensions: &[String],
) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();

    let mut files = paths
        .par_iter()
        .map(|path| discover_in_path(path, allowed_extensions))
        .collect::<Vec<Result<Vec<PathBuf>>>>()
        .into_iter()
        .try_fold(Vec::new(), |mut acc, result| {
            acc.extend(result?);
            Ok::<_, Error>(acc)
        })?;

    files.sort();
    files.dedup();
    Ok(files)
}

fn discover_in_path(path: &Path, allowed_extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    if path.is_file() {
        return Ok(if is_media_path(path, allowed_extensions) {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", path.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_media_path(entry.path(), allowed_extensions) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Whether the path carries one of the allowed extensions (case-insensitive)
pub fn is_media_path(path: &Path, allowed_extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

// -- Tests --

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_extensions;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn create_file(dir: &Path, name: &str) -> PathBuf {
        let file_path = dir.join(name);
        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"DUMMY MEDIA DATA").unwrap();
        file_path
    }

    fn setup_test_directory() -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempdir().unwrap();
        let subdir_path = dir.path().join("holiday");
        fs::create_dir(&subdir_path).unwrap();

        let files = vec![
            create_file(dir.path(), "cat.jpg"),
            create_file(dir.path(), "dog.PNG"),
            create_file(dir.path(), "clip.mp4"),
            create_file(&subdir_path, "beach.webp"),
            create_file(&subdir_path, "sunset.tiff"),
        ];
        create_file(dir.path(), "notes.txt");
        create_file(&subdir_path, "photo.heic");

        (dir, files)
    }

    #[test]
    fn test_is_media_path() {
        let allowed = default_extensions();
        assert!(is_media_path(Path::new("a.jpg"), &allowed));
        assert!(is_media_path(Path::new("a.JPEG"), &allowed));
        assert!(is_media_path(Path::new("a.mkv"), &allowed));
        assert!(!is_media_path(Path::new("a.txt"), &allowed));
        assert!(!is_media_path(Path::new("noextension"), &allowed));
        assert!(!is_media_path(Path::new("a.jpg"), &["png".to_string()]));
    }

    #[test]
    fn test_discover_media_recursive() {
        let (dir, files) = setup_test_directory();
        let discovered = discover_media(&[dir.path()], &default_extensions()).unwrap();

        assert_eq!(discovered.len(), files.len());
        for file in &files {
            assert!(discovered.contains(file));
        }
        assert!(!discovered.contains(&dir.path().join("notes.txt")));
    }

    #[test]
    fn test_discover_media_mixed_files_and_dirs() {
        let (dir, files) = setup_test_directory();
        let single = files[0].clone();
        let subdir = dir.path().join("holiday");

        let discovered =
            discover_media(&[single.clone(), subdir.clone(), single.clone()], &default_extensions())
                .unwrap();

        assert_eq!(
            discovered,
            vec![
                single,
                subdir.join("beach.webp"),
                subdir.join("sunset.tiff")
            ]
        );
    }

    #[test]
    fn test_discover_media_missing_path() {
        let result = discover_media(&["/path/that/does/not/exist"], &default_extensions());
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }
}
