//! Folds staged documents into one, two documents at a time.
//!
//! Steps run strictly one after another. A step's inputs are only consumed
//! after its output has been written, so when a step fails the accumulator
//! and the pending queue still describe exactly what has not been merged.

use crate::config::ReduceStrategy;
use crate::error::{MergeError, Result};
use crate::services::merger::{self, Inspection, PairMerge, Source};
use crate::services::stager::StagedFile;
use std::collections::VecDeque;
use std::path::Path;
use tempfile::TempPath;
use uuid::Uuid;

/// Running result of a reduction
#[derive(Debug)]
pub struct Accumulator {
    pub path: TempPath,
    pub size: u64,
    /// None when page counting is skipped
    pub pages: Option<usize>,
    /// Display names folded in so far, in page order
    pub sources: Vec<String>,
}

impl Accumulator {
    fn from_staged(staged: StagedFile) -> Self {
        Self {
            pages: staged.inspection.pages(),
            size: staged.size,
            sources: vec![staged.display_name],
            path: staged.path,
        }
    }

    /// Puts an intermediate result back in the queue as if it were an upload.
    /// Sequence 0 keeps it ahead of every upload when the queue is reordered.
    fn into_staged(self) -> StagedFile {
        let name = self.display_name();
        StagedFile {
            id: Uuid::new_v4(),
            display_name: name,
            size: self.size,
            sequence: 0,
            looks_like_pdf: true,
            inspection: match self.pages {
                Some(pages) => Inspection::Readable { pages },
                None => Inspection::Skipped,
            },
            path: self.path,
        }
    }

    fn display_name(&self) -> String {
        match self.sources.as_slice() {
            [single] => single.clone(),
            _ => format!("merged({})", self.sources.len()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Reducer {
    pub strategy: ReduceStrategy,
    pub count_pages: bool,
}

impl Reducer {
    pub fn new(strategy: ReduceStrategy, count_pages: bool) -> Self {
        Self {
            strategy,
            count_pages,
        }
    }

    /// Merges every pending file into `acc`, in queue order.
    pub fn run(
        &self,
        acc: &mut Option<Accumulator>,
        pending: &mut VecDeque<StagedFile>,
        work_dir: &Path,
    ) -> Result<()> {
        if acc.is_none() && pending.len() == 4 && self.strategy == ReduceStrategy::Balanced {
            self.balanced_four(acc, pending, work_dir)?;
        }

        if acc.is_none() {
            match pending.pop_front() {
                Some(first) => *acc = Some(Accumulator::from_staged(first)),
                None => return Ok(()),
            }
        }

        let mut step = 0usize;
        while let Some(next) = pending.front() {
            let Some(current) = acc.as_mut() else {
                break;
            };
            step += 1;

            let current_name = current.display_name();
            let merged = merger::merge_pair(
                Source {
                    name: &current_name,
                    path: &current.path,
                },
                Source {
                    name: &next.display_name,
                    path: &next.path,
                },
                work_dir,
                self.count_pages,
            )?;

            if let Some(consumed) = pending.pop_front() {
                let mut sources = std::mem::take(&mut current.sources);
                sources.push(consumed.display_name.clone());
                replace_accumulator(current, merged, sources);
                tracing::info!(
                    "🔗 Step {}: merged '{}' ({} bytes so far, {} pending)",
                    step,
                    consumed.display_name,
                    current.size,
                    pending.len()
                );
                // Dropping the staged file deletes it from disk
                drop(consumed);
            }
        }

        Ok(())
    }

    /// merge(f1, f2) and merge(f3, f4) independently, then merge the two.
    fn balanced_four(
        &self,
        acc: &mut Option<Accumulator>,
        pending: &mut VecDeque<StagedFile>,
        work_dir: &Path,
    ) -> Result<()> {
        let left = self.merge_front_pair(pending, work_dir)?;
        tracing::info!("🔗 Balanced: left half ready ({} bytes)", left.size);

        // From here on a failure leaves the left half as the accumulator,
        // which the left fold can resume from.
        let right = match self.merge_front_pair(pending, work_dir) {
            Ok(right) => right,
            Err(e) => {
                *acc = Some(left);
                return Err(e);
            }
        };
        tracing::info!("🔗 Balanced: right half ready ({} bytes)", right.size);

        let merged = merger::merge_pair(
            Source {
                name: &left.display_name(),
                path: &left.path,
            },
            Source {
                name: &right.display_name(),
                path: &right.path,
            },
            work_dir,
            self.count_pages,
        );

        match merged {
            Ok(merged) => {
                let mut sources = left.sources;
                sources.extend(right.sources);
                *acc = Some(Accumulator {
                    path: merged.path,
                    size: merged.size,
                    pages: merged.pages,
                    sources,
                });
                // left and right temporaries are dropped here
                Ok(())
            }
            Err(e) => {
                // Left half becomes the accumulator, right half the next input
                *acc = Some(left);
                pending.push_front(right.into_staged());
                Err(e)
            }
        }
    }

    fn merge_front_pair(
        &self,
        pending: &mut VecDeque<StagedFile>,
        work_dir: &Path,
    ) -> Result<Accumulator> {
        let (first, second) = match (pending.front(), pending.get(1)) {
            (Some(first), Some(second)) => (first, second),
            _ => return Err(MergeError::NothingToMerge),
        };

        let merged = merger::merge_pair(
            Source {
                name: &first.display_name,
                path: &first.path,
            },
            Source {
                name: &second.display_name,
                path: &second.path,
            },
            work_dir,
            self.count_pages,
        )?;

        let mut sources = Vec::with_capacity(2);
        for _ in 0..2 {
            if let Some(consumed) = pending.pop_front() {
                sources.push(consumed.display_name.clone());
            }
        }

        Ok(Accumulator {
            path: merged.path,
            size: merged.size,
            pages: merged.pages,
            sources,
        })
    }
}

fn replace_accumulator(current: &mut Accumulator, merged: PairMerge, sources: Vec<String>) {
    // Assigning drops the previous path, deleting the old intermediate
    current.path = merged.path;
    current.size = merged.size;
    current.pages = merged.pages;
    current.sources = sources;
}
