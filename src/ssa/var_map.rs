// This module implements the Variable Partition Map. Every SSA name that occurs in the
// function gets one union-find element; partitions are the equivalence classes, found with
// path compression and merged by size. Roots carry the variable a partition has been bound
// to, if any; a default definition starts out bound to its own variable, and merging two
// partitions bound to different variables is refused. Partition ids handed out to the
// liveness, conflict and coalescing code are a dense view over the current roots, recomputed
// by compact(); between compactions a merged partition keeps the id of the surviving root.
// The view can leave out names that are the only version of their variable, which have no
// partner to coalesce with. finalize() consumes the open map and produces a StorageMap,
// where every partition has exactly one variable and no further merging exists at the type
// level.

//! SSA name partitions and their final storage.

use std::cell::Cell;
use std::fmt;

use hashbrown::HashMap;

use crate::core::{BitSet, BridgeError, BridgeResult, BridgeSession};
use crate::ir::{Operand, SsaName, SsaNameTable, VarId, VarTable};

use crate::cfg::Cfg;

/// Dense id of a partition in the current view of a [`VarMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u32);

impl PartitionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Open partition map: partitions may still be merged.
#[derive(Debug, Clone)]
pub struct VarMap {
    /// SSA name index -> element, for names that occur in the function.
    element_of: Vec<Option<u32>>,
    /// Element -> the name it was created for.
    names: Vec<SsaName>,
    /// Element -> root variable of its name.
    root_vars: Vec<VarId>,
    parent: Vec<Cell<u32>>,
    size: Vec<u32>,
    /// Variable a root has been bound to.
    bound: Vec<Option<VarId>>,
    /// Partition id -> root element at the last compaction.
    view: Vec<u32>,
    /// Root element -> partition id.
    view_of: Vec<Option<PartitionId>>,
}

impl VarMap {
    /// Create one singleton partition per name in `names`.
    pub fn new(ssa: &SsaNameTable, names: impl IntoIterator<Item = SsaName>) -> Self {
        let mut map = VarMap {
            element_of: vec![None; ssa.len()],
            names: Vec::new(),
            root_vars: Vec::new(),
            parent: Vec::new(),
            size: Vec::new(),
            bound: Vec::new(),
            view: Vec::new(),
            view_of: Vec::new(),
        };
        for name in names {
            if map.element_of[name.index()].is_some() {
                continue;
            }
            let element = map.names.len() as u32;
            map.element_of[name.index()] = Some(element);
            map.names.push(name);
            map.root_vars.push(ssa.root_var(name));
            map.parent.push(Cell::new(element));
            map.size.push(1);
            let info = ssa.get(name);
            map.bound.push(info.default_def.then_some(info.var));
        }
        map.compact();
        map
    }

    /// Partition every SSA name that occurs in a statement or PHI node of `cfg`.
    pub fn from_function(ssa: &SsaNameTable, cfg: &Cfg) -> Self {
        let mut seen = BitSet::with_capacity(ssa.len());
        let mut note = |op: &Operand| {
            if let Some(name) = op.as_ssa() {
                seen.insert(name.index());
            }
        };
        for bb in cfg.block_ids() {
            let block = cfg.block(bb);
            for phi in &block.phis {
                note(&Operand::Ssa(phi.result));
                for arg in &phi.args {
                    note(&arg.value);
                }
            }
            for stmt in &block.stmts {
                if let Some(def) = stmt.def() {
                    note(def);
                }
                stmt.for_each_use(&mut note);
            }
        }
        let map = Self::new(ssa, seen.iter().map(SsaName::from_index));
        log::trace!("partition map over {} names", map.num_names());
        map
    }

    fn find(&self, element: u32) -> u32 {
        let mut root = element;
        while self.parent[root as usize].get() != root {
            root = self.parent[root as usize].get();
        }
        let mut current = element;
        while current != root {
            let next = self.parent[current as usize].get();
            self.parent[current as usize].set(root);
            current = next;
        }
        root
    }

    pub fn num_names(&self) -> usize {
        self.names.len()
    }

    /// Number of partition ids in the current view, merged-away ones included.
    pub fn num_partitions(&self) -> usize {
        self.view.len()
    }

    pub fn contains(&self, name: SsaName) -> bool {
        self.element_of
            .get(name.index())
            .is_some_and(|e| e.is_some())
    }

    pub fn partition_of(&self, name: SsaName) -> Option<PartitionId> {
        let element = (*self.element_of.get(name.index())?)?;
        self.view_of[self.find(element) as usize]
    }

    /// The live id of the partition `p` has been merged into.
    pub fn current(&self, p: PartitionId) -> PartitionId {
        let root = self.find(self.view[p.index()]);
        self.view_of[root as usize].unwrap_or(p)
    }

    /// Root variable shared by the names of `p`.
    pub fn root_var(&self, p: PartitionId) -> VarId {
        self.root_vars[self.view[p.index()] as usize]
    }

    pub fn bound_var(&self, p: PartitionId) -> Option<VarId> {
        self.bound[self.find(self.view[p.index()]) as usize]
    }

    /// Bind `p` to `var`. Fails if it is already bound elsewhere.
    pub fn bind_var(&mut self, p: PartitionId, var: VarId) -> bool {
        let root = self.find(self.view[p.index()]) as usize;
        match self.bound[root] {
            Some(existing) => existing == var,
            None => {
                self.bound[root] = Some(var);
                true
            }
        }
    }

    /// Merge the partitions of `a` and `b`, returning the id of the merged
    /// partition. Returns `None` if they are bound to different variables.
    pub fn union(&mut self, a: PartitionId, b: PartitionId) -> Option<PartitionId> {
        let ra = self.find(self.view[a.index()]);
        let rb = self.find(self.view[b.index()]);
        if ra == rb {
            return self.view_of[ra as usize];
        }
        let bound = match (self.bound[ra as usize], self.bound[rb as usize]) {
            (Some(x), Some(y)) if x != y => return None,
            (x, y) => x.or(y),
        };
        let (keep, gone) = if self.size[ra as usize] >= self.size[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[gone as usize].set(keep);
        self.size[keep as usize] += self.size[gone as usize];
        self.bound[keep as usize] = bound;
        let merged = self.view_of[keep as usize];
        log::trace!("union {a} {b} -> {merged:?}");
        merged
    }

    /// Merge the partitions of two names.
    pub fn union_names(&mut self, a: SsaName, b: SsaName) -> Option<PartitionId> {
        let pa = self.partition_of(a)?;
        let pb = self.partition_of(b)?;
        self.union(pa, pb)
    }

    /// Names in partition `p`.
    pub fn names_of(&self, p: PartitionId) -> Vec<SsaName> {
        let root = self.find(self.view[p.index()]);
        (0..self.names.len() as u32)
            .filter(|&e| self.find(e) == root)
            .map(|e| self.names[e as usize])
            .collect()
    }

    /// Renumber partitions densely, in order of their first name.
    pub fn compact(&mut self) {
        self.compact_view(false);
    }

    /// Like [`VarMap::compact`], but names that are the only version of
    /// their variable get no partition id until the next plain compaction.
    pub fn compact_without_single_defs(&mut self) {
        self.compact_view(true);
    }

    fn compact_view(&mut self, skip_single_defs: bool) {
        let mut versions: HashMap<VarId, u32> = HashMap::new();
        if skip_single_defs {
            for &var in &self.root_vars {
                *versions.entry(var).or_insert(0) += 1;
            }
        }
        self.view.clear();
        self.view_of = vec![None; self.names.len()];
        let mut skipped = 0;
        for element in 0..self.names.len() as u32 {
            let root = self.find(element) as usize;
            if self.view_of[root].is_some() {
                continue;
            }
            if skip_single_defs
                && self.size[root] == 1
                && versions.get(&self.root_vars[root]) == Some(&1)
            {
                skipped += 1;
                continue;
            }
            self.view_of[root] = Some(PartitionId::from_index(self.view.len()));
            self.view.push(root as u32);
        }
        log::trace!(
            "compacted {} names into {} partitions, {skipped} single versions left out",
            self.names.len(),
            self.view.len()
        );
    }

    /// Give every partition a variable and freeze the map.
    ///
    /// Bound partitions get their bound variable, even one in `reserved`:
    /// a direct read of a parameter and its default definition name the
    /// same value. The others take their root variable if nothing has
    /// claimed it yet, else a fresh temporary named after it. Variables in
    /// `reserved` are never handed out to unbound partitions.
    pub fn finalize(
        mut self,
        vars: &mut VarTable,
        reserved: &BitSet,
        session: &BridgeSession<'_>,
    ) -> BridgeResult<StorageMap> {
        self.compact();
        let mut pinned = BitSet::new();
        let mut storage: Vec<Option<VarId>> = vec![None; self.view.len()];

        for p in (0..self.view.len()).map(PartitionId::from_index) {
            if let Some(var) = self.bound_var(p) {
                if !pinned.insert(var.index()) {
                    return Err(BridgeError::corrupt(format!(
                        "variable {} is bound to two partitions",
                        vars.get(var).name
                    )));
                }
                storage[p.index()] = Some(var);
            }
        }

        let mut taken = reserved.clone();
        taken.union_with(&pinned);
        let mut temporaries = 0;
        for p in (0..self.view.len()).map(PartitionId::from_index) {
            if storage[p.index()].is_some() {
                continue;
            }
            let root = self.root_var(p);
            let var = if taken.insert(root.index()) {
                root
            } else {
                temporaries += 1;
                let temp = vars.create_temp(root);
                taken.insert(temp.index());
                temp
            };
            storage[p.index()] = Some(var);
        }
        session.record(|s| s.temporaries_created += temporaries);

        let var_of_partition: Vec<VarId> = storage.into_iter().flatten().collect();
        let partition_of_name = self
            .element_of
            .iter()
            .map(|e| e.and_then(|e| self.view_of[self.find(e) as usize]))
            .collect();
        log::debug!(
            "assigned {} partitions to storage, {temporaries} new temporaries",
            var_of_partition.len()
        );
        Ok(StorageMap {
            var_of_partition,
            partition_of_name,
        })
    }
}

/// Finalized partitions, each with its variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMap {
    var_of_partition: Vec<VarId>,
    partition_of_name: Vec<Option<PartitionId>>,
}

impl StorageMap {
    pub fn num_partitions(&self) -> usize {
        self.var_of_partition.len()
    }

    pub fn partition_of(&self, name: SsaName) -> Option<PartitionId> {
        self.partition_of_name.get(name.index()).copied().flatten()
    }

    pub fn var_of_partition(&self, p: PartitionId) -> VarId {
        self.var_of_partition[p.index()]
    }

    pub fn var_of(&self, name: SsaName) -> Option<VarId> {
        self.partition_of(name).map(|p| self.var_of_partition(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    fn table() -> (VarTable, SsaNameTable, Vec<SsaName>) {
        let mut vars = VarTable::new();
        let mut ssa = SsaNameTable::new();
        let x = vars.add("x");
        let y = vars.add("y");
        let names = vec![
            ssa.add(x, 0, true),
            ssa.add(x, 1, false),
            ssa.add(x, 2, false),
            ssa.add(y, 1, false),
        ];
        (vars, ssa, names)
    }

    #[test]
    fn test_union_is_idempotent_and_commutative() {
        let (_, ssa, n) = table();
        let mut once = VarMap::new(&ssa, n.iter().copied());
        let p = once.union_names(n[1], n[2]).unwrap();

        let mut twice = VarMap::new(&ssa, n.iter().copied());
        let q = twice.union_names(n[1], n[2]).unwrap();
        assert_eq!(twice.union_names(n[2], n[1]), Some(q));
        assert_eq!(twice.union_names(n[1], n[2]), Some(q));

        assert_eq!(once.partition_of(n[1]), Some(p));
        assert_eq!(once.partition_of(n[2]), Some(p));
        assert_eq!(twice.partition_of(n[1]), twice.partition_of(n[2]));
        assert_eq!(once.names_of(p), twice.names_of(q));
        assert_ne!(once.partition_of(n[0]), Some(p));
    }

    #[test]
    fn test_union_refuses_different_bindings() {
        let (vars, ssa, n) = table();
        let mut map = VarMap::new(&ssa, n.iter().copied());
        let p0 = map.partition_of(n[0]).unwrap();
        let p3 = map.partition_of(n[3]).unwrap();
        assert!(map.bind_var(p0, vars.lookup("x").unwrap()));
        assert!(map.bind_var(p3, vars.lookup("y").unwrap()));
        assert_eq!(map.union(p0, p3), None);
        assert_ne!(map.partition_of(n[0]), map.partition_of(n[3]));
    }

    #[test]
    fn test_compact_renumbers_densely() {
        let (_, ssa, n) = table();
        let mut map = VarMap::new(&ssa, n.iter().copied());
        assert_eq!(map.num_partitions(), 4);
        map.union_names(n[0], n[1]).unwrap();
        map.union_names(n[2], n[3]).unwrap();
        map.compact();
        assert_eq!(map.num_partitions(), 2);
        assert_eq!(map.partition_of(n[0]), Some(PartitionId(0)));
        assert_eq!(map.partition_of(n[3]), Some(PartitionId(1)));
    }

    #[test]
    fn test_finalize_prefers_root_then_temporaries() {
        let (mut vars, ssa, n) = table();
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let x = vars.lookup("x").unwrap();
        let y = vars.lookup("y").unwrap();

        let mut map = VarMap::new(&ssa, n.iter().copied());
        let p0 = map.partition_of(n[0]).unwrap();
        map.bind_var(p0, x);
        let storage = map.finalize(&mut vars, &BitSet::new(), &session).unwrap();

        assert_eq!(storage.var_of(n[0]), Some(x));
        assert_eq!(storage.var_of(n[3]), Some(y));
        let t1 = storage.var_of(n[1]).unwrap();
        let t2 = storage.var_of(n[2]).unwrap();
        assert_ne!(t1, x);
        assert_ne!(t1, t2);
        assert!(vars.get(t1).artificial);
        assert_eq!(session.stats().temporaries_created, 2);
    }

    #[test]
    fn test_single_versions_left_out_until_plain_compact() {
        let (_, ssa, n) = table();
        let mut map = VarMap::new(&ssa, n.iter().copied());
        map.compact_without_single_defs();
        // y has one version; x has three.
        assert_eq!(map.num_partitions(), 3);
        assert_eq!(map.partition_of(n[3]), None);
        assert!(map.partition_of(n[1]).is_some());

        map.compact();
        assert_eq!(map.num_partitions(), 4);
        assert!(map.partition_of(n[3]).is_some());
    }

    #[test]
    fn test_default_definition_starts_bound() {
        let (vars, ssa, n) = table();
        let map = VarMap::new(&ssa, n.iter().copied());
        let x = vars.lookup("x").unwrap();
        assert_eq!(map.bound_var(map.partition_of(n[0]).unwrap()), Some(x));
        assert_eq!(map.bound_var(map.partition_of(n[1]).unwrap()), None);
    }

    #[test]
    fn test_bound_partition_may_take_reserved_variable() {
        let (mut vars, ssa, n) = table();
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let x = vars.lookup("x").unwrap();
        let mut reserved = BitSet::new();
        reserved.insert(x.index());

        let map = VarMap::new(&ssa, n.iter().copied());
        let storage = map.finalize(&mut vars, &reserved, &session).unwrap();
        assert_eq!(storage.var_of(n[0]), Some(x));
        // Unbound versions of x still stay off the reserved variable.
        assert_ne!(storage.var_of(n[1]), Some(x));
        assert_ne!(storage.var_of(n[2]), Some(x));
    }
}
