use crate::constraints::AffineConstraints;
use fenris_traits::block::BlockIndices;
use fenris_traits::Real;

/// A global row (or column) touched by the local DoFs of a single cell.
#[derive(Debug, Clone)]
pub(crate) struct GlobalRow<T> {
    pub global: usize,
    /// The local DoF that maps directly to this global index, if any.
    pub local: Option<usize>,
    /// Local DoFs that contribute to this global index through a constraint, with their weights.
    pub indirect: Vec<(usize, T)>,
}

/// The sorted set of global indices that a cell contributes to.
///
/// The list is rebuilt for every cell. Slots and their `indirect` buffers are kept between
/// cells, so that once the list has seen a cell of maximal size it no longer allocates.
#[derive(Debug)]
pub(crate) struct GlobalRowList<T> {
    slots: Vec<GlobalRow<T>>,
    len: usize,
    /// Local indices of the cell's constrained DoFs.
    constrained: Vec<usize>,
    have_indirect: bool,
}

impl<T> Default for GlobalRowList<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            constrained: Vec::new(),
            have_indirect: false,
        }
    }
}

impl<T: Real> GlobalRowList<T> {
    /// Rebuilds the list for the cell with the given local-to-global DoF map.
    pub fn build(&mut self, constraints: &AffineConstraints<T>, local_dof_indices: &[usize]) {
        self.len = 0;
        self.constrained.clear();
        self.have_indirect = false;

        for (local, &global) in local_dof_indices.iter().enumerate() {
            if constraints.is_constrained(global) {
                self.constrained.push(local);
            } else {
                let slot = self.push_slot();
                slot.global = global;
                slot.local = Some(local);
            }
        }

        // Local DoFs are usually close to sorted, which shell sort exploits well
        shell_sort_by_global(&mut self.slots[..self.len]);
        self.merge_duplicates();

        for i in 0..self.constrained.len() {
            let local = self.constrained[i];
            let line = constraints
                .constraint_line_for(local_dof_indices[local])
                .expect("Internal error: Constrained DoF must have a constraint line");
            for &(target, weight) in &line.entries {
                self.insert_indirect(target, local, weight);
            }
        }
    }

    pub fn rows(&self) -> &[GlobalRow<T>] {
        &self.slots[..self.len]
    }

    pub fn constrained_locals(&self) -> &[usize] {
        &self.constrained
    }

    /// Whether any global row receives contributions through a constraint.
    ///
    /// If not, every row maps to exactly one local DoF and no weights are involved.
    pub fn have_indirect(&self) -> bool {
        self.have_indirect
    }

    /// For each block, stores the number of rows in the list that belong to this block or
    /// any preceding block.
    pub fn compute_block_ends(&self, indices: &BlockIndices, block_ends: &mut Vec<usize>) {
        block_ends.clear();
        let rows = self.rows();
        for block in 0..indices.num_blocks() {
            let block_end = indices.block_start(block) + indices.block_size(block);
            block_ends.push(rows.partition_point(|row| row.global < block_end));
        }
    }

    /// Returns a slot past the active part of the list, reset to an empty state.
    fn push_slot(&mut self) -> &mut GlobalRow<T> {
        if self.len == self.slots.len() {
            self.slots.push(GlobalRow {
                global: 0,
                local: None,
                indirect: Vec::new(),
            });
        }
        let slot = &mut self.slots[self.len];
        slot.local = None;
        slot.indirect.clear();
        self.len += 1;
        slot
    }

    /// Turns repeated global indices among the direct rows into indirect contributions
    /// with unit weight.
    fn merge_duplicates(&mut self) {
        let mut write = 0;
        for read in 0..self.len {
            if write > 0 && self.slots[write - 1].global == self.slots[read].global {
                let local = self.slots[read]
                    .local
                    .expect("Internal error: Direct rows always have a local index");
                self.slots[write - 1]
                    .indirect
                    .push((local, T::one()));
                self.have_indirect = true;
            } else {
                self.slots.swap(write, read);
                write += 1;
            }
        }
        self.len = write;
    }

    fn insert_indirect(&mut self, global: usize, local: usize, weight: T) {
        self.have_indirect = true;
        match self.rows().binary_search_by_key(&global, |row| row.global) {
            Ok(position) => self.slots[position].indirect.push((local, weight)),
            Err(position) => {
                let end = self.len;
                let slot = self.push_slot();
                slot.global = global;
                slot.indirect.push((local, weight));
                // Move the new slot from the end into its sorted position
                self.slots[position..=end].rotate_right(1);
            }
        }
    }
}

fn shell_sort_by_global<T>(rows: &mut [GlobalRow<T>]) {
    let mut gap = rows.len() / 2;
    while gap > 0 {
        for i in gap..rows.len() {
            let mut j = i;
            while j >= gap && rows[j - gap].global > rows[j].global {
                rows.swap(j - gap, j);
                j -= gap;
            }
        }
        gap /= 2;
    }
}

/// Scratch buffers for distributing one cell, reused across cells on the same thread.
#[derive(Debug)]
pub(crate) struct DistributionWorkspace<T> {
    pub rows: GlobalRowList<T>,
    pub positions: Vec<usize>,
    pub columns: Vec<usize>,
    pub values: Vec<T>,
    pub modified_rhs: Vec<T>,
    pub block_ends: Vec<usize>,
    pub localized: Vec<usize>,
    pub segment_ends: Vec<usize>,
}

impl<T> Default for DistributionWorkspace<T> {
    fn default() -> Self {
        Self {
            rows: GlobalRowList::default(),
            positions: Vec::new(),
            columns: Vec::new(),
            values: Vec::new(),
            modified_rhs: Vec::new(),
            block_ends: Vec::new(),
            localized: Vec::new(),
            segment_ends: Vec::new(),
        }
    }
}
