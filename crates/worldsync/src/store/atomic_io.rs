use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writes a sibling staging file, then renames it over `path`.
pub(crate) fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let staging = staging_path_for(path);
    if let Err(error) = fs::write(&staging, text.as_bytes()) {
        let _ = fs::remove_file(&staging);
        return Err(error);
    }
    swap_into_place(&staging, path)
}

fn swap_into_place(staging: &Path, target: &Path) -> io::Result<()> {
    match fs::remove_file(target) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            let _ = fs::remove_file(staging);
            return Err(error);
        }
    }

    fs::rename(staging, target).map_err(|error| {
        let _ = fs::remove_file(staging);
        error
    })
}

fn staging_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("snapshot.json");
    path.with_file_name(format!(".{file_name}.partial"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_file_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("world.json");

        write_text_atomic(&target, "first").expect("first write");
        write_text_atomic(&target, "second").expect("second write");

        assert_eq!(fs::read_to_string(&target).expect("read"), "second");
        assert!(!staging_path_for(&target).exists());
    }
}
