//! Integrity manifest and reconstruction scripts for split outputs.
//!
//! Nothing here runs the scripts; reconstruction only works when every part
//! is present under the name listed.

use crate::error::Result;
use crate::services::splitter::SplitOutput;
use crate::utils::{hash::calculate_file_hash, temp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::TempPath;
use utoipa::ToSchema;

pub const WINDOWS_SCRIPT: &str = "reconstruct.bat";
pub const UNIX_SCRIPT: &str = "reconstruct.sh";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PartEntry {
    pub index: u32,
    pub file_name: String,
    pub offset: u64,
    pub len: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Manifest {
    pub original_name: String,
    pub total_size: u64,
    pub sha256: String,
    pub part_size: u64,
    pub created_at: DateTime<Utc>,
    pub parts: Vec<PartEntry>,
}

/// A text file written next to the parts
#[derive(Debug)]
pub struct ManifestFile {
    pub file_name: String,
    pub path: TempPath,
    pub size: u64,
}

#[derive(Debug)]
pub struct ManifestBundle {
    pub manifest: Manifest,
    pub files: Vec<ManifestFile>,
}

impl Manifest {
    /// `sha256sum -c` compatible listing
    pub fn checksum_listing(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            out.push_str(&format!("{}  {}\n", part.sha256, part.file_name));
        }
        out
    }

    /// `copy /b` concatenation with CRLF line endings
    pub fn windows_script(&self) -> String {
        let sources = self
            .parts
            .iter()
            .map(|p| format!("\"{}\"", p.file_name))
            .collect::<Vec<_>>()
            .join("+");
        [
            "@echo off".to_string(),
            format!("rem Rebuilds {} from {} part(s)", self.original_name, self.parts.len()),
            format!("copy /b {} \"{}\"", sources, self.original_name),
            String::new(),
        ]
        .join("\r\n")
    }

    /// `cat` concatenation
    pub fn unix_script(&self) -> String {
        let sources = self
            .parts
            .iter()
            .map(|p| format!("\"{}\"", p.file_name))
            .collect::<Vec<_>>()
            .join(" ");
        [
            "#!/bin/sh".to_string(),
            format!("# Rebuilds {} from {} part(s)", self.original_name, self.parts.len()),
            "set -e".to_string(),
            "cd \"$(dirname \"$0\")\"".to_string(),
            format!("cat -- {} > \"{}\"", sources, self.original_name),
            String::new(),
        ]
        .join("\n")
    }
}

fn write_text(dir: &Path, file_name: &str, contents: &str) -> Result<ManifestFile> {
    let (mut file, path) = temp::create_in(dir, "manifest-", ".txt")?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(ManifestFile {
        file_name: file_name.to_string(),
        path,
        size: contents.len() as u64,
    })
}

/// Hashes every part from disk and writes the checksum list, a JSON
/// manifest and both reconstruction scripts into `dir`.
pub async fn build_manifest(
    split: &SplitOutput,
    original_name: &str,
    base_name: &str,
    part_size: u64,
    dir: &Path,
    block_size: usize,
) -> Result<ManifestBundle> {
    let mut parts = Vec::with_capacity(split.parts.len());
    for part in &split.parts {
        let sha256 = calculate_file_hash(&part.path, block_size).await?;
        parts.push(PartEntry {
            index: part.index,
            file_name: part.file_name.clone(),
            offset: part.offset,
            len: part.len,
            sha256,
        });
    }

    let manifest = Manifest {
        original_name: original_name.to_string(),
        total_size: split.total_size,
        sha256: split.sha256.clone(),
        part_size,
        created_at: Utc::now(),
        parts,
    };

    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let files = vec![
        write_text(dir, &format!("{}.sha256", base_name), &manifest.checksum_listing())?,
        write_text(dir, &format!("{}.manifest.json", base_name), &json)?,
        write_text(dir, WINDOWS_SCRIPT, &manifest.windows_script())?,
        write_text(dir, UNIX_SCRIPT, &manifest.unix_script())?,
    ];

    tracing::info!(
        "🧾 Manifest for {} written ({} parts)",
        original_name,
        manifest.parts.len()
    );

    Ok(ManifestBundle { manifest, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::splitter::split_file;
    use crate::utils::hash::calculate_hash;

    async fn bundle_for(data: &[u8], part_size: u64) -> (tempfile::TempDir, SplitOutput, ManifestBundle) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, data).unwrap();
        let split = split_file(&source, part_size, dir.path(), "book", 16)
            .await
            .unwrap();
        let bundle = build_manifest(&split, "book.pdf", "book", part_size, dir.path(), 16)
            .await
            .unwrap();
        (dir, split, bundle)
    }

    #[tokio::test]
    async fn test_part_checksums_match_part_bytes() {
        let data: Vec<u8> = (0..250u32).map(|i| (i % 256) as u8).collect();
        let (_dir, split, bundle) = bundle_for(&data, 100).await;

        assert_eq!(bundle.manifest.parts.len(), 3);
        for (entry, part) in bundle.manifest.parts.iter().zip(&split.parts) {
            let bytes = std::fs::read(&part.path).unwrap();
            assert_eq!(entry.sha256, calculate_hash(&bytes));
            assert_eq!(entry.len, bytes.len() as u64);
        }
        assert_eq!(bundle.manifest.sha256, calculate_hash(&data));
        assert_eq!(bundle.manifest.total_size, 250);
    }

    #[tokio::test]
    async fn test_written_files_and_listing() {
        let data = vec![1u8; 30];
        let (_dir, _split, bundle) = bundle_for(&data, 10).await;

        let names: Vec<&str> = bundle.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["book.sha256", "book.manifest.json", WINDOWS_SCRIPT, UNIX_SCRIPT]
        );

        let listing = std::fs::read_to_string(&bundle.files[0].path).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("  book.part01"));
        assert_eq!(lines[0].split("  ").next().unwrap().len(), 64);

        let json = std::fs::read_to_string(&bundle.files[1].path).unwrap();
        let parsed: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.parts.len(), 3);
        assert_eq!(parsed.original_name, "book.pdf");
    }

    #[tokio::test]
    async fn test_scripts_list_parts_in_order() {
        let data = vec![9u8; 25];
        let (_dir, _split, bundle) = bundle_for(&data, 10).await;

        let bat = bundle.manifest.windows_script();
        assert!(bat.contains(
            "copy /b \"book.part01\"+\"book.part02\"+\"book.part03\" \"book.pdf\"\r\n"
        ));
        assert!(bat.starts_with("@echo off\r\n"));

        let sh = bundle.manifest.unix_script();
        assert!(sh.starts_with("#!/bin/sh\n"));
        assert!(sh.contains("cat -- \"book.part01\" \"book.part02\" \"book.part03\" > \"book.pdf\"\n"));
        assert!(!sh.contains('\r'));
    }
}
