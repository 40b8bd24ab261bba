use crate::error::{MergeError, Result};
use crate::services::merger::Inspection;
use crate::utils::{temp, validation::looks_like_pdf};
use std::path::Path;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// An upload copied to the session's work directory
#[derive(Debug)]
pub struct StagedFile {
    pub id: Uuid,
    pub display_name: String,
    pub path: TempPath,
    pub size: u64,
    /// Position in upload order within the session
    pub sequence: u64,
    pub looks_like_pdf: bool,
    pub inspection: Inspection,
}

/// Fills `buffer` from `reader` until it is full or the stream ends.
pub(crate) async fn read_block<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut [u8],
) -> std::io::Result<usize> {
    let mut n = 0;
    while n < buffer.len() {
        let read = reader.read(&mut buffer[n..]).await?;
        if read == 0 {
            break;
        }
        n += read;
    }
    Ok(n)
}

/// Copies one upload stream to a new temporary file, one block at a time.
///
/// The structure of the document is not checked here. If the stream fails or
/// exceeds `max_size`, the partial file is removed before returning.
pub async fn stage_stream<R: AsyncRead + Unpin>(
    dir: &Path,
    display_name: &str,
    sequence: u64,
    mut reader: R,
    block_size: usize,
    max_size: usize,
) -> Result<StagedFile> {
    let (mut file, path) = temp::create_async_in(dir, "upload-", ".pdf")?;
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut total: u64 = 0;
    let mut sniffed: Option<bool> = None;

    loop {
        let n = read_block(&mut reader, &mut buffer).await?;
        if n == 0 {
            break;
        }
        if sniffed.is_none() {
            sniffed = Some(looks_like_pdf(&buffer[..n]));
        }

        total += n as u64;
        if total > max_size as u64 {
            return Err(MergeError::TooLarge { limit: max_size });
        }
        file.write_all(&buffer[..n]).await?;
    }
    file.flush().await?;
    drop(file);

    tracing::info!(
        "📥 Staged '{}' ({} bytes) at {}",
        display_name,
        total,
        path.display()
    );

    Ok(StagedFile {
        id: Uuid::new_v4(),
        display_name: display_name.to_string(),
        path,
        size: total,
        sequence,
        looks_like_pdf: sniffed.unwrap_or(false),
        inspection: Inspection::Skipped,
    })
}
