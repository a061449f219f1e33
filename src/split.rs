//! Deterministic row partitioning across workers.

/// Half-open index range `[first, last)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkRange {
    pub first: usize,
    pub last: usize,
}

impl WorkRange {
    pub fn size(&self) -> usize {
        self.last - self.first
    }
}

/// Splits `work_size` items over `num_workers` contiguous ranges. The
/// remainder goes to the lowest-indexed workers, one extra item each.
///
/// Splitting 11 items over 4 workers yields `[0,3) [3,6) [6,9) [9,11)`,
/// i.e. sizes 3, 3, 3, 2.
#[derive(Debug, Clone, Copy)]
pub struct RowSplit {
    work_size: usize,
    num_workers: usize,
}

impl RowSplit {
    pub fn new(work_size: usize, num_workers: usize) -> Self {
        assert!(num_workers >= 1, "invalid worker count");
        Self {
            work_size,
            num_workers,
        }
    }

    pub fn range(&self, worker: usize) -> WorkRange {
        assert!(worker < self.num_workers, "invalid worker id");
        let base = self.work_size / self.num_workers;
        let enlarged = self.work_size % self.num_workers;

        if worker < enlarged {
            let first = worker * (base + 1);
            return WorkRange {
                first,
                last: first + base + 1,
            };
        }
        let first = enlarged * (base + 1) + (worker - enlarged) * base;
        WorkRange {
            first,
            last: first + base,
        }
    }

    /// Per-worker item counts, in worker-id order.
    pub fn sizes(&self) -> Vec<usize> {
        (0..self.num_workers).map(|k| self.range(k).size()).collect()
    }

    /// Per-worker starting offsets, in worker-id order.
    pub fn offsets(&self) -> Vec<usize> {
        (0..self.num_workers).map(|k| self.range(k).first).collect()
    }

    pub fn is_evenly_divided(&self) -> bool {
        self.work_size % self.num_workers == 0
    }

    pub fn min_work_size(&self) -> usize {
        self.work_size / self.num_workers
    }

    pub fn max_work_size(&self) -> usize {
        let min = self.min_work_size();
        if self.is_evenly_divided() {
            min
        } else {
            min + 1
        }
    }
}
