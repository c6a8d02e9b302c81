use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use bon::Builder;
use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use walkdir::{DirEntry, WalkDir};

use std::path::{Component, Path, PathBuf};

/// A directory added to the archive under a single root entry.
///
/// Every file below `src_dir` lands at `<root_name>/<relative path>` inside the zip.
#[derive(Clone, Debug, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct SourceFolder {
    #[builder(into)]
    src_dir: PathBuf,
    #[builder(into)]
    root_name: String,
}

impl SourceFolder {
    /// Uses the folder's own base name as root entry, so `.../_retail_/WTF` becomes `WTF/`.
    pub fn from_base_name<P: AsRef<Path>>(src_dir: P) -> Result<Self> {
        let src_dir = src_dir.as_ref();
        let root_name = src_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::configuration(format!("{:?} has no usable folder name", src_dir))
            })?;
        Ok(Self::builder().src_dir(src_dir).root_name(root_name).build())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// A single file or directory to write into the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub src: PathBuf,
    /// Name inside the zip, always `/` separated.
    pub name: String,
    pub kind: EntryKind,
}

pub trait ArchiveEntryIterable {
    fn archive_entry_iterator<'a>(&self) -> Result<DynIter<'a, Result<ArchiveEntry>>>;
}

impl ArchiveEntryIterable for SourceFolder {
    #[named]
    fn archive_entry_iterator<'a>(&self) -> Result<DynIter<'a, Result<ArchiveEntry>>> {
        if !self.src_dir.is_dir() {
            tracing::error!(
                "Source directory does not exist or is not a directory: {:?}",
                self.src_dir
            );
            return Err(Error::not_found(format!("{:?}", self.src_dir)))
                .add_fn_name(function_path!());
        }

        tracing::info!("Adding folder {:?} as {}/", self.src_dir, self.root_name);

        let src_dir = self.src_dir.clone();
        let root_name = self.root_name.clone();
        let entries = WalkDir::new(&self.src_dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &src_dir, &root_name),
                Err(e) => Some(Err(e.into())),
            })
            .map(move |res| res.add_fn_name(function_path!()));

        Ok(entries.into_dyn_iter())
    }
}

fn process_dir_entry<P: AsRef<Path>>(
    de: DirEntry,
    base_src_dir: P,
    root_name: &str,
) -> Option<Result<ArchiveEntry>> {
    let kind = if de.file_type().is_dir() {
        EntryKind::Directory
    } else if de.file_type().is_file() {
        EntryKind::File
    } else {
        tracing::trace!("Skipping {:?}, not a file or directory", de.path());
        return None;
    };

    let p = de.into_path();
    let res = match p.strip_prefix(base_src_dir.as_ref()) {
        Ok(stripped) => entry_name(root_name, stripped),
        Err(e) => Err(Error::from(std::io::Error::other(e)).add_msg(format!(
            "Stripping {:?} from {:?} failed",
            base_src_dir.as_ref(),
            p
        ))),
    };

    Some(res.map(|name| {
        tracing::trace!("Including {:?} -> {}", p, name);
        ArchiveEntry { src: p, name, kind }
    }))
}

fn entry_name(root_name: &str, relative: &Path) -> Result<String> {
    let mut name = root_name.to_string();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    Error::from(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("{:?} is not valid UTF-8", relative),
                    ))
                })?;
                name.push('/');
                name.push_str(part);
            }
            Component::CurDir => {}
            other => {
                return Err(Error::from(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("unexpected path component {:?} in {:?}", other, relative),
                )))
            }
        }
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_files(dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir.join("AddOns/Foo"))?;
        std::fs::create_dir_all(dir.join("Empty"))?;
        std::fs::write(dir.join("AddOns/Foo/Foo.toc"), "## Title: Foo")?;
        std::fs::write(dir.join("AddOns/Foo/Foo.lua"), "print('hi')")?;
        std::fs::write(dir.join("Config.wtf"), "SET a 1")?;
        Ok(())
    }

    #[test]
    fn test_entries_use_root_name() {
        let temp_dir = TempDir::new().unwrap();
        let interface = temp_dir.path().join("Interface");
        create_test_files(&interface).unwrap();

        let source = SourceFolder::from_base_name(&interface).unwrap();
        assert_eq!(source.root_name(), "Interface");

        let entries: Vec<_> = source
            .archive_entry_iterator()
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "Interface",
                "Interface/AddOns",
                "Interface/AddOns/Foo",
                "Interface/AddOns/Foo/Foo.lua",
                "Interface/AddOns/Foo/Foo.toc",
                "Interface/Config.wtf",
                "Interface/Empty",
            ]
        );
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[3].kind, EntryKind::File);
    }

    #[test]
    fn test_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let source = SourceFolder::builder()
            .src_dir(temp_dir.path().join("nope"))
            .root_name("nope")
            .build();

        let err = source.archive_entry_iterator().err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_file_as_src_dir() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("not_a_directory.txt");
        std::fs::write(&file_path, "content").unwrap();

        let source = SourceFolder::from_base_name(&file_path).unwrap();
        assert!(source.archive_entry_iterator().is_err());
    }

    #[test]
    fn test_entry_name_rejects_parent_dir() {
        assert!(entry_name("WTF", Path::new("../x")).is_err());
        assert_eq!(entry_name("WTF", Path::new("")).unwrap(), "WTF");
    }
}
