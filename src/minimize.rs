//! Definition minimization.
//!
//! Computes the set of definitions reachable from the image roots: the entry
//! point when the assembly has one, otherwise its public surface. Everything
//! a live type touches keeps it alive — base types, interfaces, member
//! signatures, body operands, handler types, attribute constructors — and
//! the sweep iterates until no new definition is reached. A type that
//! survives keeps all of its members.

use crate::{
    filter::Filter,
    loader::{
        body::{Operand, TokenTarget},
        Assembly, FieldHandle, MethodHandle, TypeAttributes, TypeDefIdx, TypeHandle, TypeSig,
    },
};

/// Which definitions survive into the output image.
pub struct LiveSet {
    types: Vec<bool>,
}

impl LiveSet {
    /// True when a type definition survives.
    #[must_use]
    pub fn type_alive(&self, idx: TypeDefIdx) -> bool {
        self.types.get(idx.index()).copied().unwrap_or(false)
    }

    /// Number of surviving types.
    #[must_use]
    pub fn live_type_count(&self) -> usize {
        self.types.iter().filter(|&&alive| alive).count()
    }
}

struct Sweep<'a> {
    assembly: &'a Assembly,
    excluded: Vec<bool>,
    live: Vec<bool>,
    work: Vec<TypeDefIdx>,
}

impl<'a> Sweep<'a> {
    fn mark(&mut self, idx: TypeDefIdx) {
        if self.excluded[idx.index()] || self.live[idx.index()] {
            return;
        }
        self.live[idx.index()] = true;
        self.work.push(idx);
    }

    fn mark_handle(&mut self, handle: TypeHandle) {
        let assembly = self.assembly;
        match handle {
            TypeHandle::Def(idx) => self.mark(idx),
            TypeHandle::Spec(idx) => self.mark_sig(&assembly.type_spec(idx).sig),
            TypeHandle::Ref(_) | TypeHandle::GenericParam(_) => {}
        }
    }

    fn mark_sig(&mut self, sig: &TypeSig) {
        match sig {
            TypeSig::Class(handle) | TypeSig::ValueType(handle) => self.mark_handle(*handle),
            TypeSig::SzArray(element) | TypeSig::ByRef(element) | TypeSig::Ptr(element) => {
                self.mark_sig(element);
            }
            TypeSig::GenericInst { base, args, .. } => {
                self.mark_handle(*base);
                for arg in args {
                    self.mark_sig(arg);
                }
            }
            _ => {}
        }
    }

    fn mark_method_handle(&mut self, handle: MethodHandle) {
        let assembly = self.assembly;
        match handle {
            MethodHandle::Def(idx) => self.mark(assembly.method(idx).declaring),
            MethodHandle::Ref(idx) => self.mark_handle(assembly.member_ref(idx).declaring),
            MethodHandle::Spec(idx) => {
                let spec = assembly.method_spec(idx);
                self.mark_method_handle(spec.method);
                for arg in &spec.args {
                    self.mark_sig(arg);
                }
            }
        }
    }

    fn mark_field_handle(&mut self, handle: FieldHandle) {
        let assembly = self.assembly;
        match handle {
            FieldHandle::Def(idx) => self.mark(assembly.field(idx).declaring),
            FieldHandle::Ref(idx) => self.mark_handle(assembly.member_ref(idx).declaring),
        }
    }

    fn visit(&mut self, idx: TypeDefIdx) {
        let assembly = self.assembly;
        let entry = assembly.type_def(idx);

        if let Some(extends) = entry.extends {
            self.mark_handle(extends);
        }
        if let Some(enclosing) = entry.enclosing {
            self.mark(enclosing);
        }
        for &interface in &entry.interfaces {
            self.mark_handle(interface);
        }

        for &field in &entry.fields {
            self.mark_sig(&assembly.field(field).sig);
        }

        for &method in &entry.methods {
            let entry = assembly.method(method);

            self.mark_sig(&entry.sig.return_type);
            for param in &entry.sig.params {
                self.mark_sig(param);
            }
            for local in &entry.locals {
                self.mark_sig(local);
            }

            if let Some(body) = &entry.body {
                for instruction in &body.instructions {
                    match &instruction.operand {
                        Operand::Method(handle) => self.mark_method_handle(*handle),
                        Operand::Field(handle) => self.mark_field_handle(*handle),
                        Operand::Type(handle) => self.mark_handle(*handle),
                        Operand::Token(TokenTarget::Type(handle)) => self.mark_handle(*handle),
                        Operand::Token(TokenTarget::Method(handle)) => {
                            self.mark_method_handle(*handle);
                        }
                        Operand::Token(TokenTarget::Field(handle)) => {
                            self.mark_field_handle(*handle);
                        }
                        Operand::Signature(sig) => {
                            self.mark_sig(&sig.return_type);
                            for param in &sig.params {
                                self.mark_sig(param);
                            }
                        }
                        _ => {}
                    }
                }
                for clause in &body.exception_handlers {
                    if let Some(catch_type) = clause.catch_type {
                        self.mark_handle(catch_type);
                    }
                }
            }
        }

        // Attribute constructors keep their attribute types alive.
        for attribute in &assembly.attributes {
            let owned_here = match attribute.owner {
                crate::loader::AttributeOwner::Type(t) => t == idx,
                crate::loader::AttributeOwner::Field(f) => assembly.field(f).declaring == idx,
                crate::loader::AttributeOwner::Method(m) => assembly.method(m).declaring == idx,
                crate::loader::AttributeOwner::Assembly => false,
            };
            if owned_here {
                self.mark_method_handle(attribute.ctor);
            }
        }
    }
}

/// Compute the surviving definitions of one build.
///
/// Roots: the entry point's type when present, otherwise every public,
/// non-excluded type. An assembly with neither falls back to keeping every
/// non-excluded type.
#[must_use]
pub fn compute_live_set(assembly: &Assembly, filter: &Filter) -> LiveSet {
    let excluded: Vec<bool> = (0..assembly.type_defs.len())
        .map(|i| {
            let idx = TypeDefIdx(i as u32);
            filter.is_type_excluded(&assembly.type_def_full_name(idx))
        })
        .collect();

    let mut sweep = Sweep {
        assembly,
        excluded,
        live: vec![false; assembly.type_defs.len()],
        work: Vec::new(),
    };

    if let Some(entry_point) = assembly.entry_point {
        sweep.mark(assembly.method(entry_point).declaring);
    } else {
        for i in 0..assembly.type_defs.len() {
            let idx = TypeDefIdx(i as u32);
            let flags = TypeAttributes::from_bits_truncate(assembly.type_def(idx).flags);
            let visibility = flags & TypeAttributes::VISIBILITY_MASK;
            if visibility == TypeAttributes::PUBLIC
                || visibility == TypeAttributes::NESTED_PUBLIC
            {
                sweep.mark(idx);
            }
        }
        if sweep.work.is_empty() {
            for i in 0..assembly.type_defs.len() {
                sweep.mark(TypeDefIdx(i as u32));
            }
        }
    }

    while let Some(idx) = sweep.work.pop() {
        sweep.visit(idx);
    }

    LiveSet { types: sweep.live }
}
