use crate::error::{MergeError, Result};
use crate::services::stager::read_block;
use crate::utils::temp;
use sha2::{Digest, Sha256};
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

/// A raw byte range of the merged output, not a valid document by itself
#[derive(Debug)]
pub struct Part {
    /// 1-based
    pub index: u32,
    pub file_name: String,
    pub offset: u64,
    pub len: u64,
    pub path: TempPath,
}

#[derive(Debug)]
pub struct SplitOutput {
    pub parts: Vec<Part>,
    pub total_size: u64,
    /// SHA-256 of the whole source, computed in the same pass
    pub sha256: String,
}

/// `report.part01`, `report.part02`, ... widening past 99
pub fn part_file_name(base_name: &str, index: u32) -> String {
    format!("{}.part{:02}", base_name, index)
}

/// Writes `source` to consecutive parts of `part_size` bytes in `dir`.
///
/// At most one block of `block_size` bytes is held in memory. The last part
/// may be shorter than `part_size`.
pub async fn split_file(
    source: &Path,
    part_size: u64,
    dir: &Path,
    base_name: &str,
    block_size: usize,
) -> Result<SplitOutput> {
    if part_size == 0 {
        return Err(MergeError::InvalidOptions(
            "part size must be greater than zero".to_string(),
        ));
    }

    let mut reader = tokio::fs::File::open(source).await?;
    let block_size = (block_size.max(1) as u64).min(part_size) as usize;
    let mut buffer = vec![0u8; block_size];
    let mut hasher = Sha256::new();
    let mut parts = Vec::new();
    let mut offset: u64 = 0;

    'parts: loop {
        let index = parts.len() as u32 + 1;
        let mut written: u64 = 0;
        let mut current: Option<(tokio::fs::File, TempPath)> = None;

        while written < part_size {
            let want = ((part_size - written) as usize).min(buffer.len());
            let n = read_block(&mut reader, &mut buffer[..want]).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);

            if current.is_none() {
                current = Some(temp::create_async_in(dir, "part-", ".bin")?);
            }
            if let Some((file, _)) = current.as_mut() {
                file.write_all(&buffer[..n]).await?;
            }
            written += n as u64;

            if n < want {
                break;
            }
        }

        let Some((mut file, path)) = current else {
            break 'parts;
        };
        file.flush().await?;
        drop(file);

        let file_name = part_file_name(base_name, index);
        tracing::debug!("Wrote {} ({} bytes at offset {})", file_name, written, offset);
        parts.push(Part {
            index,
            file_name,
            offset,
            len: written,
            path,
        });
        offset += written;

        if written < part_size {
            break;
        }
    }

    if parts.is_empty() {
        return Err(MergeError::EmptyOutput);
    }

    tracing::info!(
        "✂️  Split {} bytes into {} part(s) of up to {} bytes",
        offset,
        parts.len(),
        part_size
    );

    Ok(SplitOutput {
        parts,
        total_size: offset,
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hash::calculate_hash;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    async fn split_bytes(data: &[u8], part_size: u64, block: usize) -> (tempfile::TempDir, SplitOutput) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("merged.pdf");
        std::fs::write(&source, data).unwrap();
        let out = split_file(&source, part_size, dir.path(), "merged", block)
            .await
            .unwrap();
        (dir, out)
    }

    #[tokio::test]
    async fn test_split_sizes_follow_part_size() {
        // 500 units split at 150 gives 150, 150, 150, 50
        let data = sample(500);
        let (_dir, out) = split_bytes(&data, 150, 64).await;

        let lens: Vec<u64> = out.parts.iter().map(|p| p.len).collect();
        assert_eq!(lens, vec![150, 150, 150, 50]);
        let offsets: Vec<u64> = out.parts.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 150, 300, 450]);
        assert_eq!(out.total_size, 500);
    }

    #[tokio::test]
    async fn test_concatenated_parts_reproduce_source() {
        let data = sample(10_007);
        let (_dir, out) = split_bytes(&data, 1000, 333).await;

        let mut joined = Vec::new();
        for part in &out.parts {
            joined.extend(std::fs::read(&part.path).unwrap());
        }
        assert_eq!(joined, data);
        assert_eq!(out.sha256, calculate_hash(&data));
        assert_eq!(out.parts.len(), 11);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_trailing_part() {
        let data = sample(300);
        let (_dir, out) = split_bytes(&data, 100, 4096).await;
        assert_eq!(out.parts.len(), 3);
        assert!(out.parts.iter().all(|p| p.len == 100));
    }

    #[tokio::test]
    async fn test_part_names_are_numbered_from_one() {
        let data = sample(25);
        let (_dir, out) = split_bytes(&data, 10, 4).await;
        let names: Vec<&str> = out.parts.iter().map(|p| p.file_name.as_str()).collect();
        assert_eq!(names, vec!["merged.part01", "merged.part02", "merged.part03"]);
        assert_eq!(part_file_name("merged", 100), "merged.part100");
    }

    #[tokio::test]
    async fn test_smaller_than_one_part() {
        let data = sample(10);
        let (_dir, out) = split_bytes(&data, 1 << 20, 4).await;
        assert_eq!(out.parts.len(), 1);
        assert_eq!(out.parts[0].len, 10);
    }

    #[tokio::test]
    async fn test_empty_source_and_zero_part_size_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("empty.pdf");
        std::fs::write(&source, b"").unwrap();

        let empty = split_file(&source, 10, dir.path(), "empty", 4).await;
        assert!(matches!(empty, Err(MergeError::EmptyOutput)));

        let zero = split_file(&source, 0, dir.path(), "empty", 4).await;
        assert!(matches!(zero, Err(MergeError::InvalidOptions(_))));
    }
}
