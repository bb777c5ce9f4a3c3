//! Unpacking of downloaded extract packages.
//!
//! NHGIS table data packages nest their files in a folder named after the
//! extract. Entries are written flat into the target directory using only
//! their file names, and the data CSV and codebook are picked out by
//! extension.

use crate::constants::codebook::{CODEBOOK_EXTENSION, DATA_EXTENSION};
use crate::error::{NhgisError, Result};
use crate::models::ExtractFiles;
use glob::glob;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Extract every file of `zip_path` into `target_dir`, flattening paths
pub fn unpack_extract(zip_path: &Path, target_dir: &Path) -> Result<ExtractFiles> {
    if !zip_path.exists() {
        return Err(NhgisError::FileNotFound {
            path: zip_path.to_path_buf(),
        });
    }

    fs::create_dir_all(target_dir)?;
    let mut archive = ZipArchive::new(File::open(zip_path)?)?;

    let mut data_csv = None;
    let mut codebook = None;
    let mut unpacked = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let Some(file_name) = flat_file_name(entry.name()) else {
            continue;
        };

        let target = target_dir.join(&file_name);
        let mut output = File::create(&target)?;
        io::copy(&mut entry, &mut output)?;
        debug!("Unpacked {} -> {}", entry.name(), target.display());

        if has_extension(&target, DATA_EXTENSION) {
            if data_csv.is_some() {
                warn!("Extract contains several data files, using {}", target.display());
            }
            data_csv = Some(target.clone());
        } else if has_extension(&target, CODEBOOK_EXTENSION) {
            codebook = Some(target.clone());
        }
        unpacked.push(target);
    }

    info!(
        "Extracted {} files from {} to {}",
        unpacked.len(),
        zip_path.display(),
        target_dir.display()
    );

    Ok(ExtractFiles {
        data_csv: data_csv.ok_or_else(|| missing_file(zip_path, DATA_EXTENSION))?,
        codebook: codebook.ok_or_else(|| missing_file(zip_path, CODEBOOK_EXTENSION))?,
        unpacked,
    })
}

/// Find an already unpacked data CSV and codebook in `dir`.
///
/// A data file `X.csv` is paired with its own codebook `X_codebook.txt`.
/// When several extracts share the directory the last paired data file in
/// name order wins. Without an exact pair, the last codebook of the same
/// extract number (or failing that the last codebook) is used.
pub fn locate_extract_files(dir: &Path) -> Result<ExtractFiles> {
    if !dir.is_dir() {
        return Err(NhgisError::FileNotFound {
            path: dir.to_path_buf(),
        });
    }

    let data_files = sorted_matches(dir, DATA_EXTENSION)?;
    let codebooks = sorted_matches(dir, CODEBOOK_EXTENSION)?;

    let paired = data_files.iter().rev().find_map(|data_csv| {
        let wanted = format!("{}_codebook", file_stem(data_csv));
        codebooks
            .iter()
            .find(|codebook| file_stem(codebook) == wanted)
            .map(|codebook| (data_csv.clone(), codebook.clone()))
    });

    let (data_csv, codebook) = match paired {
        Some(pair) => pair,
        None => {
            let data_csv = data_files
                .last()
                .cloned()
                .ok_or_else(|| missing_file(dir, DATA_EXTENSION))?;
            let prefix = extract_prefix(&data_csv);
            let codebook = codebooks
                .iter()
                .rev()
                .find(|codebook| extract_prefix(codebook) == prefix)
                .or_else(|| codebooks.last())
                .cloned()
                .ok_or_else(|| missing_file(dir, CODEBOOK_EXTENSION))?;
            warn!(
                "No codebook named after {}, using {}",
                data_csv.display(),
                codebook.display()
            );
            (data_csv, codebook)
        }
    };

    Ok(ExtractFiles {
        unpacked: vec![data_csv.clone(), codebook.clone()],
        data_csv,
        codebook,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Extract part of a file name, e.g. `nhgis0004` of `nhgis0004_ds262_state`
fn extract_prefix(path: &Path) -> String {
    let stem = file_stem(path);
    stem.split('_').next().unwrap_or_default().to_string()
}

fn sorted_matches(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(format!("nhgis*.{}", extension));
    let pattern = pattern.to_string_lossy();

    let mut matches: Vec<PathBuf> = glob(&pattern)
        .map_err(|e| NhgisError::configuration(format!("Invalid file pattern {}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    matches.sort();

    Ok(matches)
}

/// Last path component of an archive entry name, ignoring directories
fn flat_file_name(entry_name: &str) -> Option<String> {
    entry_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn missing_file(path: &Path, extension: &str) -> NhgisError {
    NhgisError::MissingExtractFile {
        path: path.to_path_buf(),
        kind: format!(".{}", extension),
    }
}
