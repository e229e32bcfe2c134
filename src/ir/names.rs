// This module keeps the per-function symbol tables. Variables are either declared by the
// producer or artificial (temporaries the producer or the bridge introduced); SSA names are
// versions of a variable, one of which may be its default definition; labels carry the
// non-local and address-taken marks that decide where computed and non-local jumps can land.

//! Per-function symbol tables: variables, SSA names and labels.

use super::{LabelId, SsaName, VarId};

/// A declared variable, or a temporary created by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    pub name: String,
    /// Created by the compiler rather than written by the user.
    pub artificial: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VarTable {
    decls: Vec<VarDecl>,
    temp_counter: u32,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId::from_index(self.decls.len());
        self.decls.push(VarDecl {
            name: name.into(),
            artificial: false,
        });
        id
    }

    /// Declare a temporary the producer introduced.
    pub fn add_artificial(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId::from_index(self.decls.len());
        self.decls.push(VarDecl {
            name: name.into(),
            artificial: true,
        });
        id
    }

    /// Create a fresh artificial variable named after `base`.
    pub fn create_temp(&mut self, base: VarId) -> VarId {
        self.temp_counter += 1;
        let name = format!("{}.{}", self.get(base).name, self.temp_counter);
        let id = VarId::from_index(self.decls.len());
        self.decls.push(VarDecl {
            name,
            artificial: true,
        });
        id
    }

    pub fn get(&self, var: VarId) -> &VarDecl {
        &self.decls[var.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.decls
            .iter()
            .position(|d| d.name == name)
            .map(VarId::from_index)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

/// Information about one SSA version of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsaNameInfo {
    /// The root variable this name is a version of.
    pub var: VarId,
    pub version: u32,
    /// The value the variable holds on entry to the function.
    pub default_def: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SsaNameTable {
    names: Vec<SsaNameInfo>,
}

impl SsaNameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, var: VarId, version: u32, default_def: bool) -> SsaName {
        let id = SsaName::from_index(self.names.len());
        self.names.push(SsaNameInfo {
            var,
            version,
            default_def,
        });
        id
    }

    pub fn get(&self, name: SsaName) -> &SsaNameInfo {
        &self.names[name.index()]
    }

    pub fn root_var(&self, name: SsaName) -> VarId {
        self.names[name.index()].var
    }

    pub fn lookup(&self, var: VarId, version: u32) -> Option<SsaName> {
        self.names
            .iter()
            .position(|n| n.var == var && n.version == version)
            .map(SsaName::from_index)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SsaName, &SsaNameInfo)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (SsaName::from_index(i), n))
    }
}

/// A label declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub name: String,
    /// Synthesized by lowering; may be deleted once unreferenced.
    pub artificial: bool,
    /// Target of a non-local jump from another function.
    pub non_local: bool,
    /// Its address escapes into a computed jump.
    pub address_taken: bool,
}

impl LabelInfo {
    /// Labels that can be reached by control transfers the graph cannot see.
    pub fn is_forced(&self) -> bool {
        self.non_local || self.address_taken
    }
}

#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: Vec<LabelInfo>,
    artificial_counter: u32,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, info: LabelInfo) -> LabelId {
        let id = LabelId::from_index(self.labels.len());
        self.labels.push(info);
        id
    }

    /// Create a fresh synthetic label.
    pub fn create_artificial(&mut self) -> LabelId {
        loop {
            self.artificial_counter += 1;
            let name = format!("D.{}", self.artificial_counter);
            if self.lookup(&name).is_none() {
                return self.add(LabelInfo {
                    name,
                    artificial: true,
                    non_local: false,
                    address_taken: false,
                });
            }
        }
    }

    pub fn get(&self, label: LabelId) -> &LabelInfo {
        &self.labels[label.index()]
    }

    pub fn get_mut(&mut self, label: LabelId) -> &mut LabelInfo {
        &mut self.labels[label.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<LabelId> {
        self.labels
            .iter()
            .position(|l| l.name == name)
            .map(LabelId::from_index)
    }

    pub fn contains(&self, label: LabelId) -> bool {
        label.index() < self.labels.len()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Whether any label of the function is a non-local jump target.
    pub fn has_non_local(&self) -> bool {
        self.labels.iter().any(|l| l.non_local)
    }
}

/// The symbol tables of one function, grouped so printers and passes can
/// borrow them together.
#[derive(Debug, Clone, Default)]
pub struct Symbols {
    pub vars: VarTable,
    pub ssa: SsaNameTable,
    pub labels: LabelTable,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label_name(&self, label: LabelId) -> &str {
        if self.labels.contains(label) {
            &self.labels.get(label).name
        } else {
            "<undefined>"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_names_derive_from_base() {
        let mut vars = VarTable::new();
        let x = vars.add("x");
        let t1 = vars.create_temp(x);
        let t2 = vars.create_temp(x);
        assert_eq!(vars.get(t1).name, "x.1");
        assert_eq!(vars.get(t2).name, "x.2");
        assert!(vars.get(t1).artificial);
        assert!(!vars.get(x).artificial);
    }

    #[test]
    fn test_artificial_labels_avoid_user_names() {
        let mut labels = LabelTable::new();
        labels.add(LabelInfo {
            name: "D.1".to_string(),
            artificial: false,
            non_local: false,
            address_taken: false,
        });
        let l = labels.create_artificial();
        assert_eq!(labels.get(l).name, "D.2");
        assert!(labels.get(l).artificial);
    }
}
