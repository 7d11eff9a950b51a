use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("folder path {0:?} contains unsupported component")]
    UnsupportedComponent(String),
}

/// Outcome of mapping a remote file name onto a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A file with this exact name is already present.
    Existing(PathBuf),
    /// Nothing occupies the name yet.
    New(PathBuf),
    /// A differently-cased file holds the name; this is the renamed target.
    CaseCollision(PathBuf),
}

/// Makes a remote display name usable as a single path component.
pub fn sanitize_name(raw: &str) -> String {
    let name = raw.replace(['/', '\\'], "-");
    match name.as_str() {
        "" => "_".to_string(),
        "." | ".." => name.replace('.', "_"),
        _ => name,
    }
}

/// Inserts `suffix` before the last extension of `file_name`.
pub fn add_before_ext(file_name: &str, suffix: &str) -> String {
    match file_name.rfind('.') {
        Some(pos) => format!("{}{suffix}{}", &file_name[..pos], &file_name[pos..]),
        None => format!("{file_name}{suffix}"),
    }
}

/// Maps a folder's `full_name` ("course files/Week 1/Slides") under the
/// course directory. The first component names the remote root and is dropped.
pub fn folder_dir_for(course_dir: &Path, full_name: &str) -> Result<PathBuf, PathError> {
    let mut out = course_dir.to_path_buf();
    let nested = full_name.split_once('/').map(|(_, rest)| rest).unwrap_or("");
    for component in Path::new(nested).components() {
        match component {
            Component::Normal(part) => out.push(sanitize_name(&part.to_string_lossy())),
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(full_name.to_string()));
            }
        }
    }
    Ok(out)
}

/// Decides where `raw_name` lives inside `dir` given the names already there.
/// `collision_suffix` is inserted before the extension when only a
/// differently-cased sibling exists.
pub fn resolve_in_listing<S: AsRef<str>>(
    dir: &Path,
    raw_name: &str,
    siblings: &[S],
    collision_suffix: &str,
) -> Resolution {
    let name = sanitize_name(raw_name);
    if siblings.iter().any(|s| s.as_ref() == name) {
        return Resolution::Existing(dir.join(name));
    }

    let lowered = name.to_lowercase();
    if siblings.iter().any(|s| s.as_ref().to_lowercase() == lowered) {
        let renamed = add_before_ext(&name, collision_suffix);
        if siblings.iter().any(|s| s.as_ref() == renamed) {
            return Resolution::Existing(dir.join(renamed));
        }
        return Resolution::CaseCollision(dir.join(renamed));
    }

    Resolution::New(dir.join(name))
}

/// Lists `dir` and resolves `raw_name` against its current entries.
pub async fn resolve_file_path(
    dir: &Path,
    raw_name: &str,
    collision_suffix: &str,
) -> io::Result<Resolution> {
    let siblings = list_names(dir).await?;
    Ok(resolve_in_listing(dir, raw_name, &siblings, collision_suffix))
}

async fn list_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}
