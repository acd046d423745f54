//! Compare two output trees by relative path, content hash and mtime.
//! Used to check a run against a reference run (or against itself).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::timestamps;

/// Modification times further apart than this count as a mismatch.
const MTIME_TOLERANCE_SECS: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateMismatch {
    pub relative: String,
    pub reference: i64,
    pub candidate: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeComparison {
    pub reference_files: usize,
    pub candidate_files: usize,
    pub matched: usize,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub content_mismatch: Vec<String>,
    pub date_mismatch: Vec<DateMismatch>,
}

impl TreeComparison {
    pub fn is_identical(&self) -> bool {
        self.missing.is_empty()
            && self.extra.is_empty()
            && self.content_mismatch.is_empty()
            && self.date_mismatch.is_empty()
    }
}

struct FileDigest {
    hash: String,
    mtime: Option<i64>,
}

pub fn compare_trees(reference: &Path, candidate: &Path) -> anyhow::Result<TreeComparison> {
    let reference_files = digest_tree(reference)?;
    let candidate_files = digest_tree(candidate)?;

    let mut result = TreeComparison {
        reference_files: reference_files.len(),
        candidate_files: candidate_files.len(),
        ..Default::default()
    };

    for (rel, expected) in &reference_files {
        let Some(actual) = candidate_files.get(rel) else {
            result.missing.push(rel.clone());
            continue;
        };
        if expected.hash != actual.hash {
            result.content_mismatch.push(rel.clone());
            continue;
        }
        result.matched += 1;
        if let (Some(r), Some(c)) = (expected.mtime, actual.mtime) {
            if (r - c).abs() > MTIME_TOLERANCE_SECS {
                result.date_mismatch.push(DateMismatch {
                    relative: rel.clone(),
                    reference: r,
                    candidate: c,
                });
            }
        }
    }

    result.extra = candidate_files
        .keys()
        .filter(|rel| !reference_files.contains_key(*rel))
        .cloned()
        .collect();

    Ok(result)
}

/// Relative path -> digest, hashed in parallel.
fn digest_tree(root: &Path) -> anyhow::Result<BTreeMap<String, FileDigest>> {
    let files = collect_files(root)?;
    files
        .par_iter()
        .map(|(rel, abs)| {
            let digest = FileDigest {
                hash: file_hash(abs)?,
                mtime: timestamps::file_mtime(abs),
            };
            Ok::<_, anyhow::Error>((rel.clone(), digest))
        })
        .collect()
}

fn collect_files(root: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut result = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        result.push((rel, path));
    }
    Ok(result)
}

fn file_hash(path: &Path) -> anyhow::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
