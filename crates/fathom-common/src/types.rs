//! Dimensional metadata: symbolic units and the Stock/Flow temporal tags.
//!
//! Units are free-form tokens combined symbolically: `Mul` concatenates,
//! `Div` inverts, and matching numerator/denominator tokens cancel, so
//! `USD/MWh * MWh` infers back to `USD`. There is no registry of known
//! units; two units are equal when their canonical token multisets are.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a quantity is a balance at an instant (`Stock`) or an amount
/// over a period (`Flow`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalType {
    Stock,
    Flow,
}

impl TemporalType {
    /// Dominance order used by multiplicative inference: Stock > Flow.
    pub fn dominant(lhs: Option<Self>, rhs: Option<Self>) -> Option<Self> {
        match (lhs, rhs) {
            (Some(TemporalType::Stock), _) | (_, Some(TemporalType::Stock)) => {
                Some(TemporalType::Stock)
            }
            (Some(TemporalType::Flow), _) | (_, Some(TemporalType::Flow)) => {
                Some(TemporalType::Flow)
            }
            (None, None) => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Stock" | "stock" => Some(TemporalType::Stock),
            "Flow" | "flow" => Some(TemporalType::Flow),
            _ => None,
        }
    }
}

impl fmt::Display for TemporalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TemporalType::Stock => "Stock",
            TemporalType::Flow => "Flow",
        })
    }
}

/// A symbolic unit: a quotient of token multisets, kept in canonical
/// (sorted) order so equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    num: Vec<String>,
    den: Vec<String>,
}

impl Unit {
    /// Parse a unit expression such as `"USD"`, `"USD/MWh"` or `"A*B/C"`.
    ///
    /// The first `/`-separated segment contributes numerator tokens, every
    /// later segment contributes denominator tokens; `*` separates tokens
    /// within a segment. Whitespace around tokens is ignored.
    pub fn parse(s: &str) -> Self {
        let mut segments = s.split('/');
        let num = segments
            .next()
            .map(split_tokens)
            .unwrap_or_default();
        let den = segments.flat_map(|seg| split_tokens(seg)).collect();
        let mut unit = Self { num, den };
        unit.cancel();
        unit
    }

    /// Multiply two units: concatenate both sides, then cancel.
    pub fn mul(&self, rhs: &Unit) -> Unit {
        let mut out = Unit {
            num: [self.num.as_slice(), rhs.num.as_slice()].concat(),
            den: [self.den.as_slice(), rhs.den.as_slice()].concat(),
        };
        out.cancel();
        out
    }

    /// Divide two units: multiply by the inverse, then cancel.
    pub fn div(&self, rhs: &Unit) -> Unit {
        let mut out = Unit {
            num: [self.num.as_slice(), rhs.den.as_slice()].concat(),
            den: [self.den.as_slice(), rhs.num.as_slice()].concat(),
        };
        out.cancel();
        out
    }

    /// True when every token has cancelled away (a pure ratio).
    pub fn is_dimensionless(&self) -> bool {
        self.num.is_empty() && self.den.is_empty()
    }

    /// Remove token pairs shared by numerator and denominator, then sort
    /// into canonical order.
    fn cancel(&mut self) {
        let mut den = std::mem::take(&mut self.den);
        den.retain(|tok| {
            if let Some(pos) = self.num.iter().position(|n| n == tok) {
                self.num.remove(pos);
                false
            } else {
                true
            }
        });
        self.den = den;
        self.num.sort_unstable();
        self.den.sort_unstable();
    }
}

fn split_tokens(segment: &str) -> Vec<String> {
    segment
        .split('*')
        .map(str::trim)
        .filter(|tok| !tok.is_empty() && *tok != "1")
        .map(str::to_owned)
        .collect()
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return f.write_str("1");
        }
        if self.num.is_empty() {
            f.write_str("1")?;
        } else {
            f.write_str(&self.num.join("*"))?;
        }
        for tok in &self.den {
            write!(f, "/{tok}")?;
        }
        Ok(())
    }
}

/// Optional dimensional metadata carried by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub unit: Option<Unit>,
    pub temporal: Option<TemporalType>,
}

impl NodeMeta {
    pub fn is_empty(&self) -> bool {
        self.unit.is_none() && self.temporal.is_none()
    }
}
