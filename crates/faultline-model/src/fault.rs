//! Faults, fault sets and the selection of fault-effect variants.

use crate::error::{ConstructionError, ConstructionResult};
use crate::step::StepContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of faults a model may declare.
pub const MAX_FAULTS: usize = 64;

/// How the engine decides whether a fault is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// Always active.
    Forced,
    /// Never active.
    Suppressed,
    /// Resolved through a choice at every step.
    Nondeterministic,
}

/// Whether an activation outlives the step it occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    Transient,
    Permanent,
}

/// Index of a fault in the model's fault list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaultId(pub u8);

impl FaultId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A modeled failure mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub name: String,
    pub activation: Activation,
    pub persistence: Persistence,
    /// Per-step probability of occurrence; `None` makes the fault purely
    /// nondeterministic.
    pub probability: Option<f64>,
}

impl Fault {
    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            activation: Activation::Nondeterministic,
            persistence: Persistence::Transient,
            probability: None,
        }
    }

    pub fn permanent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            activation: Activation::Nondeterministic,
            persistence: Persistence::Permanent,
            probability: None,
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn is_permanent(&self) -> bool {
        self.persistence == Persistence::Permanent
    }
}

/// Check a fault list before exploration.
pub fn validate_faults(faults: &[Fault]) -> ConstructionResult<()> {
    if faults.len() > MAX_FAULTS {
        return Err(ConstructionError::TooManyFaults {
            count: faults.len(),
            max: MAX_FAULTS,
        });
    }
    for fault in faults {
        if let Some(p) = fault.probability {
            if !(0.0..=1.0).contains(&p) || p.is_nan() {
                return Err(ConstructionError::InvalidFaultProbability {
                    name: fault.name.clone(),
                    probability: p,
                });
            }
        }
    }
    Ok(())
}

/// A set of faults, one bit per [`FaultId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FaultSet(u64);

impl FaultSet {
    pub const EMPTY: FaultSet = FaultSet(0);

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        FaultSet(bits)
    }

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Bit of `fault`; zero for ids no model can declare.
    #[inline]
    fn bit(fault: FaultId) -> u64 {
        1u64.checked_shl(u32::from(fault.0)).unwrap_or(0)
    }

    #[inline]
    pub fn contains(self, fault: FaultId) -> bool {
        self.0 & Self::bit(fault) != 0
    }

    /// Ids at or above [`MAX_FAULTS`] are ignored.
    #[inline]
    pub fn insert(&mut self, fault: FaultId) {
        self.0 |= Self::bit(fault);
    }

    #[inline]
    pub fn remove(&mut self, fault: FaultId) {
        self.0 &= !Self::bit(fault);
    }

    #[inline]
    pub fn union(self, other: FaultSet) -> FaultSet {
        FaultSet(self.0 | other.0)
    }

    #[inline]
    pub fn intersection(self, other: FaultSet) -> FaultSet {
        FaultSet(self.0 & other.0)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = FaultId> {
        (0..MAX_FAULTS as u8)
            .filter(move |i| self.0 & (1 << i) != 0)
            .map(FaultId)
    }
}

impl fmt::Debug for FaultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.0)).finish()
    }
}

/// Maps persistent activations to the state vector header: one bit per
/// permanent fault, in declaration order. Transient faults take no space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultHeader {
    permanent: Vec<FaultId>,
}

impl FaultHeader {
    pub fn new(faults: &[Fault]) -> Self {
        let permanent = faults
            .iter()
            .enumerate()
            .filter(|(_, fault)| fault.is_permanent())
            .map(|(i, _)| FaultId(i as u8))
            .collect();
        Self { permanent }
    }

    /// Header width in bits.
    pub fn width(&self) -> u32 {
        self.permanent.len() as u32
    }

    /// Header bits of the permanent faults in `set`; other faults are dropped.
    pub fn pack(&self, set: FaultSet) -> u64 {
        self.permanent
            .iter()
            .enumerate()
            .filter(|(_, id)| set.contains(**id))
            .fold(0, |header, (bit, _)| header | 1 << bit)
    }

    pub fn unpack(&self, header: u64) -> FaultSet {
        let mut set = FaultSet::EMPTY;
        for (bit, &id) in self.permanent.iter().enumerate() {
            if header & (1 << bit) != 0 {
                set.insert(id);
            }
        }
        set
    }
}

/// Behavioural variants of a component, one per fault effect.
///
/// The active variant is chosen once per step: the highest-priority effect
/// whose fault is active wins, ties go to the effect declared first, and the
/// base variant applies when no effect is active.
#[derive(Debug, Clone)]
pub struct FaultEffects<V> {
    base: V,
    effects: Vec<(FaultId, i32, V)>,
}

impl<V: Copy> FaultEffects<V> {
    pub fn new(base: V) -> Self {
        Self {
            base,
            effects: Vec::new(),
        }
    }

    pub fn effect(mut self, fault: FaultId, priority: i32, variant: V) -> Self {
        self.effects.push((fault, priority, variant));
        self
    }

    /// Every fault of the component is queried, and thus marked used.
    pub fn select(&self, ctx: &mut StepContext<'_>) -> V {
        let mut selected: Option<(i32, V)> = None;
        for &(fault, priority, variant) in &self.effects {
            if ctx.is_active(fault) && selected.map_or(true, |(best, _)| priority > best) {
                selected = Some((priority, variant));
            }
        }
        selected.map(|(_, v)| v).unwrap_or(self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_set_ops() {
        let mut set = FaultSet::EMPTY;
        set.insert(FaultId(0));
        set.insert(FaultId(63));
        assert!(set.contains(FaultId(63)));
        assert!(!set.contains(FaultId(1)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![FaultId(0), FaultId(63)]);
        set.remove(FaultId(0));
        assert_eq!(set.bits(), 1 << 63);
    }

    #[test]
    fn test_undeclarable_ids_are_never_members() {
        let mut set = FaultSet::EMPTY;
        set.insert(FaultId(64));
        set.insert(FaultId(u8::MAX));
        assert!(set.is_empty());
        assert!(!set.contains(FaultId(200)));
        set.insert(FaultId(3));
        set.remove(FaultId(100));
        assert_eq!(set.bits(), 1 << 3);
    }

    #[test]
    fn test_header_holds_permanent_faults_only() {
        let faults = [
            Fault::transient("noise"),
            Fault::permanent("stuck"),
            Fault::transient("glitch"),
            Fault::permanent("broken"),
        ];
        let header = FaultHeader::new(&faults);
        assert_eq!(header.width(), 2);

        let mut set = FaultSet::EMPTY;
        set.insert(FaultId(0));
        set.insert(FaultId(3));
        assert_eq!(header.pack(set), 0b10);

        let restored = header.unpack(0b11);
        assert_eq!(restored.iter().collect::<Vec<_>>(), vec![FaultId(1), FaultId(3)]);
        assert_eq!(FaultHeader::new(&faults[..1]).width(), 0);
    }

    #[test]
    fn test_validation() {
        assert!(validate_faults(&[Fault::permanent("f").with_probability(0.5)]).is_ok());
        assert!(matches!(
            validate_faults(&[Fault::transient("f").with_probability(1.5)]),
            Err(ConstructionError::InvalidFaultProbability { .. })
        ));
        let many: Vec<Fault> = (0..65).map(|i| Fault::transient(format!("f{i}"))).collect();
        assert!(matches!(
            validate_faults(&many),
            Err(ConstructionError::TooManyFaults { count: 65, .. })
        ));
    }
}
