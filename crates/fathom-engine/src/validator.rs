//! Static type analysis: unit and temporal-type inference, then
//! verification against user declarations.
//!
//! Inference runs bottom-up in id order: construction guarantees that
//! parents precede children, so a single forward pass suffices and no
//! recursion depth limit applies. Results are cached per node; any
//! metadata mutation must invalidate the cache (the canvas layer owns
//! that call).

use crate::graph::{ComputationGraph, NodeKind};
use fathom_common::{
    BinaryOp, NodeId, TemporalType, Unit, ValidationError, ValidationErrorKind,
};
use rustc_hash::FxHashMap;

/// Inferred dimensional signature of a node. `None` means unknown, and
/// unknown propagates through arithmetic rather than failing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeSig {
    pub unit: Option<Unit>,
    pub temporal: Option<TemporalType>,
}

#[derive(Debug, Default)]
pub struct Validator {
    cache: FxHashMap<NodeId, TypeSig>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all cached inference results. Called whenever node metadata
    /// mutates; stale signatures would otherwise mask new conflicts.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    /// Infer every non-constant node and verify declarations. The first
    /// conflict aborts; nothing is cached past it.
    pub fn validate(&mut self, graph: &ComputationGraph) -> Result<(), ValidationError> {
        for id in graph.ids() {
            if self.cache.contains_key(&id) {
                continue;
            }
            let sig = self.infer(graph, id)?;
            self.cache.insert(id, sig);
        }
        Ok(())
    }

    /// Signature of a node if validation has seen it.
    pub fn signature(&self, id: NodeId) -> Option<&TypeSig> {
        self.cache.get(&id)
    }

    fn infer(&self, graph: &ComputationGraph, id: NodeId) -> Result<TypeSig, ValidationError> {
        let inferred = match *graph.kind(id) {
            // Leaves: the declaration is the type.
            NodeKind::Constant | NodeKind::SolverVariable => {
                let meta = graph.meta(id);
                return Ok(TypeSig {
                    unit: meta.unit.clone(),
                    temporal: meta.temporal,
                });
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let l = &self.cache[&lhs];
                let r = &self.cache[&rhs];
                match op {
                    BinaryOp::Add | BinaryOp::Sub => TypeSig {
                        unit: additive_unit(op, l, r, id)?,
                        temporal: additive_temporal(l, r, id)?,
                    },
                    BinaryOp::Mul => TypeSig {
                        unit: combine_units(l, r, Unit::mul),
                        temporal: TemporalType::dominant(l.temporal, r.temporal),
                    },
                    BinaryOp::Div => TypeSig {
                        unit: combine_units(l, r, Unit::div),
                        // Division keeps the numerator's temporal nature.
                        temporal: l.temporal,
                    },
                }
            }
            NodeKind::Previous { source, .. } => self.cache[&source].clone(),
        };
        self.verify(graph, id, inferred)
    }

    /// Compare the inferred signature against any declaration.
    fn verify(
        &self,
        graph: &ComputationGraph,
        id: NodeId,
        sig: TypeSig,
    ) -> Result<TypeSig, ValidationError> {
        let declared = graph.meta(id);
        if let Some(decl) = &declared.unit
            && sig.unit.as_ref() != Some(decl)
        {
            return Err(ValidationError::new(
                ValidationErrorKind::DeclaredVsInferred,
                id,
                format!(
                    "Declared unit '{decl}' does not match inferred unit '{}'",
                    display_or_none(&sig.unit)
                ),
            ));
        }
        if let Some(decl) = declared.temporal {
            if sig.temporal != Some(decl) {
                return Err(ValidationError::new(
                    ValidationErrorKind::DeclaredVsInferred,
                    id,
                    format!(
                        "Declared temporal type '{decl}' does not match inferred type '{}'",
                        display_or_none(&sig.temporal)
                    ),
                ));
            }
        }
        Ok(sig)
    }
}

fn display_or_none<T: std::fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".to_owned(),
    }
}

fn additive_unit(
    op: BinaryOp,
    l: &TypeSig,
    r: &TypeSig,
    id: NodeId,
) -> Result<Option<Unit>, ValidationError> {
    match (&l.unit, &r.unit) {
        (Some(a), Some(b)) if a == b => Ok(Some(a.clone())),
        (Some(a), Some(b)) => Err(ValidationError::new(
            ValidationErrorKind::UnitMismatch,
            id,
            format!("Unit Mismatch: cannot apply '{op}' to '{a}' and '{b}'"),
        )),
        // An untyped operand keeps the result unknown.
        _ => Ok(None),
    }
}

fn additive_temporal(
    l: &TypeSig,
    r: &TypeSig,
    id: NodeId,
) -> Result<Option<TemporalType>, ValidationError> {
    use TemporalType::*;
    match (l.temporal, r.temporal) {
        (Some(Stock), Some(Stock)) => Err(ValidationError::new(
            ValidationErrorKind::TemporalAmbiguous,
            id,
            "Ambiguous: Stock +/- Stock",
        )),
        (Some(Flow), Some(Flow)) => Ok(Some(Flow)),
        (Some(Stock), Some(Flow)) | (Some(Flow), Some(Stock)) => Ok(Some(Stock)),
        _ => Ok(None),
    }
}

fn combine_units(l: &TypeSig, r: &TypeSig, f: impl Fn(&Unit, &Unit) -> Unit) -> Option<Unit> {
    match (&l.unit, &r.unit) {
        (Some(a), Some(b)) => {
            let combined = f(a, b);
            // A fully cancelled unit degrades to untyped, not to "1".
            (!combined.is_dimensionless()).then_some(combined)
        }
        _ => None,
    }
}
