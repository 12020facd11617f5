//! Deterministic type ordering.
//!
//! Produces the order the type-def table is emitted in, either from an
//! explicitly supplied list (exact fully-qualified name match, missing
//! entries dropped) or by depth-first traversal over declaring types,
//! same-module interfaces, and same-module instruction operand types.
//! Candidates are pre-sorted by fully-qualified name so the traversal is
//! deterministic. A type is emitted on its first completed visit, so
//! dependency cycles collapse to the visit order instead of failing. The
//! `<Module>` synthetic type never appears.

use rustc_hash::FxHashMap;

use crate::{
    loader::{
        body::{Operand, TokenTarget},
        Assembly, TypeDefIdx, TypeHandle,
    },
    minimize::LiveSet,
};

/// Synthetic global type excluded from every order.
const MODULE_TYPE: &str = "<Module>";

/// Compute the emission order of the surviving type definitions.
#[must_use]
pub fn order_types(
    assembly: &Assembly,
    live: &LiveSet,
    explicit: Option<&[String]>,
) -> Vec<TypeDefIdx> {
    let mut candidates: Vec<(String, TypeDefIdx)> = (0..assembly.type_defs.len())
        .map(|i| TypeDefIdx(i as u32))
        .filter(|&idx| live.type_alive(idx))
        .map(|idx| (assembly.type_def_full_name(idx), idx))
        .filter(|(name, _)| name != MODULE_TYPE)
        .collect();
    candidates.sort();

    if let Some(order) = explicit {
        let by_name: FxHashMap<&str, TypeDefIdx> = candidates
            .iter()
            .map(|(name, idx)| (name.as_str(), *idx))
            .collect();
        return order
            .iter()
            .filter_map(|name| by_name.get(name.as_str()).copied())
            .collect();
    }

    let mut walker = Walker {
        assembly,
        live,
        visited: vec![false; assembly.type_defs.len()],
        order: Vec::with_capacity(candidates.len()),
    };
    for (_, idx) in &candidates {
        walker.visit(*idx);
    }
    walker.order
}

struct Walker<'a> {
    assembly: &'a Assembly,
    live: &'a LiveSet,
    visited: Vec<bool>,
    order: Vec<TypeDefIdx>,
}

impl Walker<'_> {
    fn visit(&mut self, idx: TypeDefIdx) {
        if self.visited[idx.index()] || !self.live.type_alive(idx) {
            return;
        }
        self.visited[idx.index()] = true;

        let assembly = self.assembly;
        let entry = assembly.type_def(idx);

        if let Some(enclosing) = entry.enclosing {
            self.visit(enclosing);
        }
        for &interface in &entry.interfaces {
            if let TypeHandle::Def(dep) = interface {
                self.visit(dep);
            }
        }
        for &method in &entry.methods {
            if let Some(body) = &assembly.method(method).body {
                for instruction in &body.instructions {
                    let handle = match &instruction.operand {
                        Operand::Type(handle) => Some(*handle),
                        Operand::Token(TokenTarget::Type(handle)) => Some(*handle),
                        _ => None,
                    };
                    if let Some(TypeHandle::Def(dep)) = handle {
                        self.visit(dep);
                    }
                }
            }
        }

        self.order.push(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{filter::Filter, minimize::compute_live_set};
    use crate::loader::{TypeDefEntry, TypeDefIdx};

    fn plain_type(name: &str, namespace: &str) -> TypeDefEntry {
        TypeDefEntry {
            name: name.to_string(),
            namespace: namespace.to_string(),
            flags: 0x0000_0001,
            extends: None,
            enclosing: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            generic_params: Vec::new(),
            token: 0x0200_0001,
        }
    }

    fn assembly_with(types: Vec<TypeDefEntry>) -> Assembly {
        Assembly {
            name: "test".to_string(),
            type_defs: types,
            ..Assembly::default()
        }
    }

    #[test]
    fn module_type_is_excluded() {
        let assembly = assembly_with(vec![plain_type("<Module>", ""), plain_type("Alpha", "App")]);
        let live = compute_live_set(&assembly, &Filter::new());
        let order = order_types(&assembly, &live, None);
        assert_eq!(order, vec![TypeDefIdx(1)]);
    }

    #[test]
    fn nested_types_follow_their_declaring_type() {
        let mut outer = plain_type("Outer", "App");
        outer.name = "Outer".to_string();
        let mut nested = plain_type("Aaa", "");
        nested.flags = 0x0000_0002;
        nested.enclosing = Some(TypeDefIdx(1));

        // The nested type sorts first by name but must come after its owner.
        let assembly = assembly_with(vec![nested, outer]);
        let live = compute_live_set(&assembly, &Filter::new());
        let order = order_types(&assembly, &live, None);
        assert_eq!(order, vec![TypeDefIdx(1), TypeDefIdx(0)]);
    }

    #[test]
    fn interface_implementors_follow_their_interfaces() {
        let mut implementor = plain_type("Aaa", "App");
        implementor.interfaces = vec![TypeHandle::Def(TypeDefIdx(1))];
        let interface = plain_type("Zzz", "App");

        let assembly = assembly_with(vec![implementor, interface]);
        let live = compute_live_set(&assembly, &Filter::new());
        let order = order_types(&assembly, &live, None);
        assert_eq!(order, vec![TypeDefIdx(1), TypeDefIdx(0)]);
    }

    #[test]
    fn explicit_order_wins_and_drops_unknown_names() {
        let assembly = assembly_with(vec![plain_type("Alpha", "App"), plain_type("Beta", "App")]);
        let live = compute_live_set(&assembly, &Filter::new());
        let explicit = vec![
            "App.Beta".to_string(),
            "App.Missing".to_string(),
            "App.Alpha".to_string(),
        ];
        let order = order_types(&assembly, &live, Some(&explicit));
        assert_eq!(order, vec![TypeDefIdx(1), TypeDefIdx(0)]);
    }

    #[test]
    fn ordering_is_deterministic() {
        let assembly = assembly_with(vec![
            plain_type("Gamma", "App"),
            plain_type("Alpha", "App"),
            plain_type("Beta", "App"),
        ]);
        let live = compute_live_set(&assembly, &Filter::new());
        let first = order_types(&assembly, &live, None);
        let second = order_types(&assembly, &live, None);
        assert_eq!(first, second);
        assert_eq!(first, vec![TypeDefIdx(1), TypeDefIdx(2), TypeDefIdx(0)]);
    }
}
