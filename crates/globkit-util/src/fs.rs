use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const BOM: char = '\u{feff}';

/// Read a file as text. Invalid UTF-8 becomes U+FFFD; everything else is kept verbatim.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Read module source text: like [`read_to_string_lossy`] with a leading BOM removed.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_source(path: &Path) -> io::Result<String> {
    let mut text = read_to_string_lossy(path)?;
    if text.starts_with(BOM) {
        text.drain(..BOM.len_utf8());
    }
    Ok(text)
}

fn sibling_temp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "out".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
///
/// Missing parent directories are created. Readers see either the previous
/// contents or the new ones.
///
/// # Errors
/// Returns an error if a directory, the temp file or the rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp = sibling_temp(path);
    let written = fs::File::create(&temp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp, path) {
        // Windows refuses to rename over an existing file
        if cfg!(windows) && path.exists() {
            let copied = fs::copy(&temp, path).map(|_| ());
            let _ = fs::remove_file(&temp);
            return copied;
        }
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}
