//! Access-policy equations in disjunction-of-conjunctions form.
//!
//! An equation is satisfied by a holder iff at least one conjunction is
//! fully satisfied, that is, the holder locally possesses every referenced
//! (attribute id, version) pair of that conjunction. Equations are immutable
//! once constructed; they travel as an opaque blob embedded in metadata and
//! sent to the key service, and can be authored from a textual boolean
//! expression of attribute ids joined by `AND` and `OR`.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeRegistry;
use crate::error::Error;

/// A single (attribute id, version) pair referenced by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRef {
    /// Attribute id.
    #[serde(rename = "i")]
    pub id: u32,

    /// Attribute version the policy binds to.
    #[serde(rename = "v")]
    pub version: u32,
}

/// A conjunction clause: every referenced pair must be held to satisfy it.
///
/// A conjunction is never empty; the parser and the blob decoder both
/// enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conjunction {
    terms: Vec<AttributeRef>,
}

impl Conjunction {
    /// Creates a clause from its terms.
    pub fn new(terms: Vec<AttributeRef>) -> Result<Self, Error> {
        if terms.is_empty() {
            return Err(Error::MalformedEquation("empty conjunction".into()));
        }

        Ok(Self { terms })
    }

    /// The referenced (id, version) pairs, in authoring order.
    pub fn terms(&self) -> &[AttributeRef] {
        &self.terms
    }

    fn satisfied_by(&self, registry: &AttributeRegistry) -> bool {
        !self.terms.is_empty()
            && self
                .terms
                .iter()
                .all(|t| registry.has_version(t.id, t.version))
    }
}

/// A boolean access policy over attributes, in OR-of-ANDs form.
///
/// The empty equation is the identity policy: it restricts nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEquation {
    conjunctions: Vec<Conjunction>,
}

impl PolicyEquation {
    /// The identity policy.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds an equation from clauses.
    pub fn new(conjunctions: Vec<Conjunction>) -> Self {
        Self { conjunctions }
    }

    /// The disjunction clauses.
    pub fn conjunctions(&self) -> &[Conjunction] {
        &self.conjunctions
    }

    /// Whether this is the identity policy.
    pub fn is_empty(&self) -> bool {
        self.conjunctions.is_empty()
    }

    /// Parses a textual boolean expression of attribute ids.
    ///
    /// `OR` binds conjunctions, `AND` binds attributes within a conjunction;
    /// there is no nesting and no negation. Each id resolves to its latest
    /// registered version. An all-whitespace expression yields the identity
    /// policy.
    pub fn parse(text: &str, registry: &AttributeRegistry) -> Result<Self, Error> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }

        let mut conjunctions = Vec::new();
        for clause in text.split("OR") {
            let mut terms = Vec::new();
            for token in clause.split("AND") {
                let token = token.trim();
                if token.is_empty() {
                    return Err(Error::MalformedEquation(format!(
                        "empty term in clause `{}`",
                        clause.trim()
                    )));
                }

                let id: u32 = token.parse().map_err(|_| {
                    Error::MalformedEquation(format!("`{token}` is not an attribute id"))
                })?;
                let version = registry
                    .latest_version(id)
                    .ok_or(Error::UnknownAttribute(id))?;
                terms.push(AttributeRef { id, version });
            }

            conjunctions.push(Conjunction::new(terms)?);
        }

        Ok(Self { conjunctions })
    }

    /// The local decryptability test: whether the holdings in `registry`
    /// satisfy at least one conjunction, without contacting the key service.
    ///
    /// A version mismatch fails its clause outright; other held versions of
    /// the same attribute never substitute.
    pub fn is_satisfiable(&self, registry: &AttributeRegistry) -> bool {
        if self.conjunctions.is_empty() {
            return true;
        }

        self.conjunctions.iter().any(|c| c.satisfied_by(registry))
    }

    /// Serializes to the opaque transmissible blob. Round-trips exactly.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserializes from the opaque blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let equation: Self = bincode::deserialize(bytes)?;
        if equation.conjunctions.iter().any(|c| c.terms.is_empty()) {
            return Err(Error::MalformedEquation("empty conjunction".into()));
        }

        Ok(equation)
    }

    /// The blob, base64-encoded for embedding in a metadata document.
    pub fn to_base64(&self) -> Result<String, Error> {
        Ok(BASE64.encode(self.to_bytes()?))
    }

    /// Decodes an equation from its base64 blob.
    ///
    /// Any decode failure is a hard parse error, never a silent fallback.
    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::MalformedEquation(e.to_string()))?;

        Self::from_bytes(&bytes).map_err(|e| match e {
            Error::Bincode(inner) => Error::MalformedEquation(inner.to_string()),
            other => other,
        })
    }
}

impl fmt::Display for PolicyEquation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conjunctions.is_empty() {
            return f.write_str("<unrestricted>");
        }

        for (i, conjunction) in self.conjunctions.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            for (j, term) in conjunction.terms.iter().enumerate() {
                if j > 0 {
                    f.write_str(" AND ")?;
                }
                write!(f, "{}@{}", term.id, term.version)?;
            }
        }

        Ok(())
    }
}
