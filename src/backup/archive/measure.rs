use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use itertools::Itertools;
use rayon::prelude::*;
use std::iter::Sum;
use std::ops::Add;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursive byte and file totals of the folders about to be archived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Measurement {
    pub total_size: u64,
    pub total_files: u64,
}

impl Add for Measurement {
    type Output = Measurement;

    fn add(self, rhs: Self) -> Self::Output {
        Measurement {
            total_size: self.total_size + rhs.total_size,
            total_files: self.total_files + rhs.total_files,
        }
    }
}

impl Sum for Measurement {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Measurement::default(), Add::add)
    }
}

pub fn measure_folder<P: AsRef<Path>>(folder: P) -> Result<Measurement> {
    let mut measurement = Measurement::default();
    for entry in WalkDir::new(folder.as_ref()).follow_links(true) {
        let entry = entry?;
        if entry.file_type().is_file() {
            measurement.total_size += entry.metadata()?.len();
            measurement.total_files += 1;
        }
    }

    tracing::debug!(
        "Folder {:?}: {} files, {} bytes",
        folder.as_ref(),
        measurement.total_files,
        measurement.total_size
    );
    Ok(measurement)
}

/// Measures every folder, finishing before any archive byte is written.
pub fn measure_folders(folders: &[PathBuf]) -> Result<Measurement> {
    let measurements = folders
        .par_iter()
        .map(measure_folder)
        .collect::<Vec<_>>();

    let (measured, errors): (Vec<Measurement>, Vec<Error>) =
        measurements.into_iter().partition_result();
    convert_error_vec(errors)?;

    Ok(measured.into_iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_measure_folders() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("Interface");
        let b = dir.path().join("WTF");
        std::fs::create_dir_all(a.join("AddOns/Foo")).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("AddOns/Foo/Foo.toc"), "12345").unwrap();
        std::fs::write(a.join("AddOns/Foo/Foo.lua"), "123").unwrap();
        std::fs::write(b.join("Config.wtf"), "12").unwrap();

        let m = measure_folders(&[a, b]).unwrap();
        assert_eq!(
            m,
            Measurement {
                total_size: 10,
                total_files: 3
            }
        );
    }

    #[test]
    fn test_measure_empty_folder() {
        let dir = TempDir::new().unwrap();
        let m = measure_folders(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(m, Measurement::default());
    }

    #[test]
    fn test_measure_missing_folder_fails() {
        let dir = TempDir::new().unwrap();
        assert!(measure_folders(&[dir.path().join("missing")]).is_err());
    }

    #[test]
    fn test_measurement_sum() {
        let total: Measurement = [
            Measurement { total_size: 1, total_files: 1 },
            Measurement { total_size: 2, total_files: 3 },
        ]
        .into_iter()
        .sum();
        assert_eq!(total, Measurement { total_size: 3, total_files: 4 });
    }
}
