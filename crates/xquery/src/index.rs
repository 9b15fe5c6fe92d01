//! Value indexes and the candidate interface the optimizer and evaluator use.
//!
//! A probe names what to look up; a provider answers with the positions of the
//! matching nodes plus an estimate. Probes select the *key* nodes (leaf
//! elements for text probes, attributes for attribute probes); index access
//! expressions lift those to their owner elements.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::engine::evaluator::numeric::cast_double;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::NodeKind;
use crate::store::Document;
use crate::xdm::ExpandedName;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RangeTarget {
    Element(ExpandedName),
    Attribute(ExpandedName),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexProbe {
    /// Leaf elements named `element` whose string value equals `value`.
    Text { element: ExpandedName, value: String },
    /// Attributes named `name` whose value equals `value`.
    Attribute { name: ExpandedName, value: String },
    /// Leaf elements or attributes whose numeric value lies in the interval.
    Range { target: RangeTarget, min: f64, max: f64, min_incl: bool, max_incl: bool },
}

/// Candidate positions in document order plus the estimate reported for them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    pub pres: Vec<usize>,
    pub estimate: usize,
}

pub trait IndexProvider: Send + Sync {
    /// Estimated number of candidates, or `None` when the probe cannot be
    /// answered exactly by this provider.
    fn estimate(&self, probe: &IndexProbe) -> Option<usize>;

    /// Candidates for `probe` against `doc`. Fails with an index state error
    /// when the index does not reflect the document.
    fn candidates(&self, doc: &Document, probe: &IndexProbe) -> Result<Candidates, Error>;
}

/// Explicitly constructed set of index providers. The first provider able to
/// answer a probe is used.
#[derive(Clone, Default)]
pub struct IndexRegistry {
    providers: Vec<(String, Arc<dyn IndexProvider>)>,
}

impl core::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.providers.iter().map(|(n, _)| n)).finish()
    }
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn IndexProvider>) -> &mut Self {
        self.providers.push((name.into(), provider));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn find(&self, probe: &IndexProbe) -> Option<&(String, Arc<dyn IndexProvider>)> {
        self.providers.iter().find(|(_, p)| p.estimate(probe).is_some())
    }
}

impl IndexProvider for IndexRegistry {
    fn estimate(&self, probe: &IndexProbe) -> Option<usize> {
        self.providers.iter().find_map(|(_, p)| p.estimate(probe))
    }

    fn candidates(&self, doc: &Document, probe: &IndexProbe) -> Result<Candidates, Error> {
        let (name, provider) = self
            .find(probe)
            .ok_or_else(|| Error::from_code(ErrorCode::BXIX0001, format!("no index answers {probe:?}")))?;
        debug!(index = %name, ?probe, "index lookup");
        provider.candidates(doc, probe)
    }
}

fn expanded(doc: &Document, pre: usize) -> Option<ExpandedName> {
    doc.name(pre).map(|q| ExpandedName::new(q.ns_uri.clone(), q.local.clone()))
}

/// In-memory value index over one document version.
///
/// Text entries cover leaf elements only (elements without element
/// children); a name is answerable for text probes only if every element of
/// that name is a leaf. Range lookups are answerable only for names whose
/// values are all numeric.
#[derive(Debug, Clone, Default)]
pub struct ValueIndex {
    version: u64,
    texts: HashMap<(ExpandedName, String), Vec<usize>>,
    attributes: HashMap<(ExpandedName, String), Vec<usize>>,
    non_leaf: HashSet<ExpandedName>,
    numeric: HashMap<RangeTarget, Vec<(f64, usize)>>,
    non_numeric: HashSet<RangeTarget>,
}

impl ValueIndex {
    pub fn build(doc: &Document) -> Self {
        let mut idx = ValueIndex { version: doc.version(), ..Default::default() };
        for pre in 0..doc.len() {
            match doc.kind(pre) {
                NodeKind::Element => {
                    let Some(name) = expanded(doc, pre) else { continue };
                    if doc.children(pre).any(|c| doc.kind(c) == NodeKind::Element) {
                        idx.non_leaf.insert(name);
                        continue;
                    }
                    let value = doc.string_value(pre);
                    idx.add_numeric(RangeTarget::Element(name.clone()), &value, pre);
                    idx.texts.entry((name, value)).or_default().push(pre);
                }
                NodeKind::Attribute => {
                    let Some(name) = expanded(doc, pre) else { continue };
                    let value = doc.value(pre).unwrap_or_default().to_string();
                    idx.add_numeric(RangeTarget::Attribute(name.clone()), &value, pre);
                    idx.attributes.entry((name, value)).or_default().push(pre);
                }
                _ => {}
            }
        }
        for name in &idx.non_leaf {
            idx.non_numeric.insert(RangeTarget::Element(name.clone()));
        }
        for target in &idx.non_numeric {
            idx.numeric.remove(target);
        }
        for entries in idx.numeric.values_mut() {
            entries.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        }
        debug!(
            version = idx.version,
            texts = idx.texts.len(),
            attributes = idx.attributes.len(),
            numeric = idx.numeric.len(),
            "value index built"
        );
        idx
    }

    fn add_numeric(&mut self, target: RangeTarget, value: &str, pre: usize) {
        if self.non_numeric.contains(&target) {
            return;
        }
        // values are read the way comparisons cast untyped operands
        match cast_double(value) {
            Ok(v) if v.is_nan() => {}
            Ok(v) => self.numeric.entry(target).or_default().push((v, pre)),
            Err(_) => {
                self.non_numeric.insert(target);
            }
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn ranges_answerable(&self, target: &RangeTarget) -> bool {
        let leaf = match target {
            RangeTarget::Element(name) => !self.non_leaf.contains(name),
            RangeTarget::Attribute(_) => true,
        };
        leaf && !self.non_numeric.contains(target)
    }

    fn range_slice(&self, target: &RangeTarget, min: f64, max: f64, min_incl: bool, max_incl: bool) -> &[(f64, usize)] {
        let Some(entries) = self.numeric.get(target) else { return &[] };
        let lo = entries.partition_point(|(v, _)| if min_incl { *v < min } else { *v <= min });
        let hi = entries.partition_point(|(v, _)| if max_incl { *v <= max } else { *v < max });
        if lo >= hi { &[] } else { &entries[lo..hi] }
    }
}

impl IndexProvider for ValueIndex {
    fn estimate(&self, probe: &IndexProbe) -> Option<usize> {
        match probe {
            IndexProbe::Text { element, value } => {
                if self.non_leaf.contains(element) {
                    return None;
                }
                Some(self.texts.get(&(element.clone(), value.clone())).map_or(0, Vec::len))
            }
            IndexProbe::Attribute { name, value } => {
                Some(self.attributes.get(&(name.clone(), value.clone())).map_or(0, Vec::len))
            }
            IndexProbe::Range { target, min, max, min_incl, max_incl } => {
                if !self.ranges_answerable(target) {
                    return None;
                }
                Some(self.range_slice(target, *min, *max, *min_incl, *max_incl).len())
            }
        }
    }

    fn candidates(&self, doc: &Document, probe: &IndexProbe) -> Result<Candidates, Error> {
        if doc.version() != self.version {
            return Err(Error::from_code(
                ErrorCode::BXIX0001,
                format!("index built for version {} but document is at {}", self.version, doc.version()),
            ));
        }
        let mut pres: Vec<usize> = match probe {
            IndexProbe::Text { element, value } => {
                if self.non_leaf.contains(element) {
                    return Err(Error::from_code(ErrorCode::BXIX0001, format!("{element} has non-leaf elements")));
                }
                self.texts.get(&(element.clone(), value.clone())).cloned().unwrap_or_default()
            }
            IndexProbe::Attribute { name, value } => {
                self.attributes.get(&(name.clone(), value.clone())).cloned().unwrap_or_default()
            }
            IndexProbe::Range { target, min, max, min_incl, max_incl } => {
                if !self.ranges_answerable(target) {
                    return Err(Error::from_code(ErrorCode::BXIX0001, format!("{target:?} is not range indexed")));
                }
                self.range_slice(target, *min, *max, *min_incl, *max_incl).iter().map(|(_, p)| *p).collect()
            }
        };
        pres.sort_unstable();
        let estimate = pres.len();
        Ok(Candidates { pres, estimate })
    }
}
