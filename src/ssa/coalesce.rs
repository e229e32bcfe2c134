// This module implements the Coalescer. It computes liveness over the open partition map,
// builds the interference graph and the affinity list (one unit of weight for every PHI
// argument or copy that relates two partitions of the same variable), binds partitions live
// on entry to the function to their declared variable, and then merges partitions in three
// rounds: mandatory merges across abnormal edges, where a conflict is fatal because no code
// can ever be placed on such an edge; the affinity list in decreasing weight order; and
// a sweep over every remaining pair of partitions sharing a variable. When temporaries may be
// combined, a last round merges partitions of different artificial variables, again list
// first and then every pair, so short-lived temporaries end up sharing one slot. The
// optional rounds skip any pair that interferes. Every accepted merge is folded into the
// conflict graph and the live ranges so later decisions see the merged partition.

//! Partition coalescing.

use bumpalo::collections::Vec as BumpVec;
use hashbrown::HashMap;

use crate::cfg::Cfg;
use crate::core::{BridgeError, BridgeResult, BridgeSession};
use crate::function::FunctionContext;
use crate::ir::{BlockId, Operand, VarId};

use super::conflict::ConflictGraph;
use super::live::LiveRangeInfo;
use super::var_map::{PartitionId, VarMap};
use super::OutOfSsaOptions;

/// Candidate partition pairs weighted by how often they are copied into
/// each other.
#[derive(Debug, Clone, Default)]
pub struct CoalesceList {
    pairs: HashMap<(PartitionId, PartitionId), u32>,
}

impl CoalesceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, a: PartitionId, b: PartitionId, cost: u32) {
        if a == b {
            return;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        *self.pairs.entry(key).or_insert(0) += cost;
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn cost(&self, a: PartitionId, b: PartitionId) -> u32 {
        let key = if a < b { (a, b) } else { (b, a) };
        self.pairs.get(&key).copied().unwrap_or(0)
    }

    /// Pairs by decreasing cost; ties broken by partition ids.
    pub fn sorted<'arena>(
        &self,
        session: &BridgeSession<'arena>,
    ) -> BumpVec<'arena, (PartitionId, PartitionId, u32)> {
        let mut sorted = BumpVec::with_capacity_in(self.pairs.len(), session.arena());
        sorted.extend(self.pairs.iter().map(|(&(a, b), &cost)| (a, b, cost)));
        sorted.sort_by(|x, y| y.2.cmp(&x.2).then((x.0, x.1).cmp(&(y.0, y.1))));
        sorted
    }

    /// Collect the same-variable pairs related by PHI arguments and copies.
    pub fn build(cfg: &Cfg, map: &VarMap) -> Self {
        Self::build_with(cfg, map, |a, b| map.root_var(a) == map.root_var(b))
    }

    /// Collect the pairs related by PHI arguments and copies that `accept`
    /// lets through.
    pub fn build_with(
        cfg: &Cfg,
        map: &VarMap,
        accept: impl Fn(PartitionId, PartitionId) -> bool,
    ) -> Self {
        let mut list = Self::new();
        let mut relate = |a: PartitionId, b: PartitionId| {
            let (a, b) = (map.current(a), map.current(b));
            if a != b && accept(a, b) {
                list.add(a, b, 1);
            }
        };
        for bb in cfg.block_ids() {
            let block = cfg.block(bb);
            for phi in &block.phis {
                let Some(result) = map.partition_of(phi.result) else {
                    continue;
                };
                for arg in &phi.args {
                    if let Some(p) = arg.value.as_ssa().and_then(|n| map.partition_of(n)) {
                        relate(result, p);
                    }
                }
            }
            for stmt in &block.stmts {
                if let Some((Operand::Ssa(d), Operand::Ssa(s))) = stmt.as_copy() {
                    if let (Some(d), Some(s)) = (map.partition_of(d), map.partition_of(s)) {
                        relate(d, s);
                    }
                }
            }
        }
        list
    }
}

/// Mutable state shared by the coalescing rounds.
struct Coalescer<'a> {
    map: &'a mut VarMap,
    graph: ConflictGraph,
    live: LiveRangeInfo,
    merged: usize,
}

impl Coalescer<'_> {
    /// Merge `a` and `b` unless they interfere or are bound apart.
    fn try_union(&mut self, a: PartitionId, b: PartitionId) -> Option<PartitionId> {
        let (a, b) = (self.map.current(a), self.map.current(b));
        if a == b {
            return Some(a);
        }
        if self.graph.conflicts(a, b) {
            log::trace!("not coalescing {a} and {b}: they conflict");
            return None;
        }
        let Some(keep) = self.map.union(a, b) else {
            log::trace!("not coalescing {a} and {b}: bound to different variables");
            return None;
        };
        let gone = if keep == a { b } else { a };
        self.graph.merge(keep, gone);
        self.live.merge_partitions(keep, gone);
        self.merged += 1;
        Some(keep)
    }
}

/// Bind every partition live on entry to the function to its variable.
fn bind_entry_live(ctx: &FunctionContext, c: &mut Coalescer<'_>) -> BridgeResult<()> {
    let mut owner: HashMap<VarId, PartitionId> = HashMap::new();
    let entry_live: Vec<PartitionId> = c.live.function_entry_live().collect();
    for p in entry_live {
        let var = c.map.root_var(p);
        if let Some(&other) = owner.get(&var) {
            return Err(BridgeError::corrupt(format!(
                "partitions {other} and {p} of {} are both live on entry",
                ctx.symbols.vars.get(var).name
            )));
        }
        owner.insert(var, p);
        if !c.map.bind_var(p, var) {
            return Err(BridgeError::corrupt(format!(
                "partition {p} live on entry is bound away from {}",
                ctx.symbols.vars.get(var).name
            )));
        }
    }
    Ok(())
}

/// Merge the partitions on both sides of every PHI argument that flows
/// along an abnormal edge.
fn coalesce_abnormal_edges(ctx: &FunctionContext, c: &mut Coalescer<'_>) -> BridgeResult<()> {
    let cfg = &ctx.cfg;
    for bb in cfg.block_ids() {
        for phi in &cfg.block(bb).phis {
            for arg in &phi.args {
                let edge = cfg.edge(arg.edge);
                if !edge.is_abnormal() || edge.dest == BlockId::EXIT {
                    continue;
                }
                let Operand::Ssa(arg_name) = arg.value else {
                    return Err(BridgeError::AbnormalCoalesce {
                        edge: arg.edge,
                        reason: format!(
                            "argument `{}` is not an SSA name",
                            ctx.symbols.show(&arg.value)
                        ),
                    });
                };
                if ctx.symbols.ssa.root_var(phi.result) != ctx.symbols.ssa.root_var(arg_name) {
                    return Err(BridgeError::AbnormalCoalesce {
                        edge: arg.edge,
                        reason: format!(
                            "`{}` and `{}` are versions of different variables",
                            ctx.symbols.show(&Operand::Ssa(phi.result)),
                            ctx.symbols.show(&arg.value)
                        ),
                    });
                }
                if arg_name == phi.result {
                    continue;
                }
                let result = c.map.partition_of(phi.result).ok_or_else(|| {
                    BridgeError::corrupt(format!("PHI result {} has no partition", phi.result))
                })?;
                let arg_partition = c.map.partition_of(arg_name).ok_or_else(|| {
                    BridgeError::AbnormalCoalesce {
                        edge: arg.edge,
                        reason: format!("argument {arg_name} has no partition"),
                    }
                })?;
                let (r, a) = (c.map.current(result), c.map.current(arg_partition));
                if r == a {
                    continue;
                }
                if c.graph.conflicts(r, a) {
                    return Err(BridgeError::AbnormalConflict {
                        edge: arg.edge,
                        src: edge.src,
                        dest: edge.dest,
                        result_partition: r,
                        arg_partition: a,
                    });
                }
                if c.try_union(r, a).is_none() {
                    return Err(BridgeError::AbnormalCoalesce {
                        edge: arg.edge,
                        reason: format!("{r} and {a} are bound to different variables"),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Merge non-interfering partitions of different artificial variables,
/// affinity pairs first. Returns the number of merges.
fn combine_temporaries(
    session: &BridgeSession<'_>,
    ctx: &FunctionContext,
    c: &mut Coalescer<'_>,
) -> usize {
    let vars = &ctx.symbols.vars;
    let before = c.merged;
    let list = {
        let map: &VarMap = &*c.map;
        CoalesceList::build_with(&ctx.cfg, map, |a, b| {
            let (va, vb) = (map.root_var(a), map.root_var(b));
            va != vb && vars.get(va).artificial && vars.get(vb).artificial
        })
    };
    for (a, b, cost) in list.sorted(session) {
        if c.try_union(a, b).is_some() {
            log::trace!("combined temporaries {a} and {b} (cost {cost})");
        }
    }

    let temps: Vec<PartitionId> = (0..c.map.num_partitions())
        .map(PartitionId::from_index)
        .filter(|&p| c.map.current(p) == p && vars.get(c.map.root_var(p)).artificial)
        .collect();
    for (i, &a) in temps.iter().enumerate() {
        for &b in &temps[i + 1..] {
            c.try_union(a, b);
        }
    }
    c.merged - before
}

/// Coalesce the partitions of `map` for the function in `ctx`.
pub fn coalesce_ssa_names(
    session: &BridgeSession<'_>,
    ctx: &FunctionContext,
    map: &mut VarMap,
    options: &OutOfSsaOptions,
) -> BridgeResult<()> {
    let live = LiveRangeInfo::compute(&ctx.cfg, map);
    let list = CoalesceList::build(&ctx.cfg, map);
    let graph = ConflictGraph::build(&ctx.cfg, map, &live);
    let mut c = Coalescer {
        map,
        graph,
        live,
        merged: 0,
    };

    bind_entry_live(ctx, &mut c)?;
    coalesce_abnormal_edges(ctx, &mut c)?;
    let mandatory = c.merged;

    if options.use_coalesce_list {
        for (a, b, cost) in list.sorted(session) {
            if c.try_union(a, b).is_some() {
                log::trace!("coalesced {a} and {b} (cost {cost})");
            }
        }
    }

    if options.coalesce_partitions {
        let mut by_var: HashMap<VarId, Vec<PartitionId>> = HashMap::new();
        for p in (0..c.map.num_partitions()).map(PartitionId::from_index) {
            if c.map.current(p) == p {
                by_var.entry(c.map.root_var(p)).or_default().push(p);
            }
        }
        let mut groups: Vec<Vec<PartitionId>> = by_var.into_values().collect();
        groups.sort();
        for group in groups {
            for (i, &a) in group.iter().enumerate() {
                for &b in &group[i + 1..] {
                    c.try_union(a, b);
                }
            }
        }
    }

    let combined = if options.combine_temps {
        combine_temporaries(session, ctx, &mut c)
    } else {
        0
    };

    session.record(|s| {
        s.partitions_coalesced += c.merged;
        s.temporaries_combined += combined;
    });
    log::debug!(
        "{}: coalesced {} partition pairs ({mandatory} across abnormal edges, {combined} between temporaries)",
        ctx.name,
        c.merged
    );
    Ok(())
}
