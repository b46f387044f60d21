//! The interface between the sampler and the model it samples from.
//!
//! A model exposes its latent variables through a [`VariableLayout`], which maps
//! every variable id to a contiguous range of one flat position vector. The sampler
//! works on the flat vectors; values only leave the sampler as [`VariableValues`].

use std::{collections::BTreeMap, fmt, ops::Range};

use crate::nuts::NutsError;

/// Identifier of a latent variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId(pub u64);

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

/// A dense real tensor in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Box<[usize]>,
    values: Box<[f64]>,
}

impl Tensor {
    pub fn new(
        shape: impl Into<Box<[usize]>>,
        values: impl Into<Box<[f64]>>,
    ) -> Result<Self, NutsError> {
        let shape = shape.into();
        let values = values.into();
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(NutsError::ShapeMismatch {
                shape: shape.into_vec(),
                len: values.len(),
            });
        }
        Ok(Tensor { shape, values })
    }

    pub fn scalar(value: f64) -> Self {
        Tensor {
            shape: Box::new([]),
            values: Box::new([value]),
        }
    }

    pub fn filled(shape: &[usize], value: f64) -> Self {
        let len = shape.iter().product();
        Tensor {
            shape: shape.into(),
            values: vec![value; len].into(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The single value of a tensor with exactly one element.
    pub fn as_scalar(&self) -> Option<f64> {
        match *self.values {
            [value] => Some(value),
            _ => None,
        }
    }
}

/// Values for a set of variables, ordered by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableValues(BTreeMap<VariableId, Tensor>);

impl VariableValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: VariableId, value: Tensor) -> Option<Tensor> {
        self.0.insert(id, value)
    }

    pub fn get(&self, id: VariableId) -> Option<&Tensor> {
        self.0.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VariableId, &Tensor)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the given variables.
    pub fn restrict(mut self, ids: &[VariableId]) -> Self {
        self.0.retain(|id, _| ids.contains(id));
        self
    }
}

impl FromIterator<(VariableId, Tensor)> for VariableValues {
    fn from_iter<T: IntoIterator<Item = (VariableId, Tensor)>>(iter: T) -> Self {
        VariableValues(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
struct VariableSlot {
    id: VariableId,
    shape: Box<[usize]>,
    range: Range<usize>,
}

/// Maps latent variables onto one flat vector.
#[derive(Debug, Clone)]
pub struct VariableLayout {
    slots: Vec<VariableSlot>,
    dim: usize,
}

impl VariableLayout {
    /// Create a layout from `(id, shape)` pairs. Variables are stored in id order.
    pub fn new<S: Into<Box<[usize]>>>(
        variables: impl IntoIterator<Item = (VariableId, S)>,
    ) -> Result<Self, NutsError> {
        let mut vars: Vec<(VariableId, Box<[usize]>)> = variables
            .into_iter()
            .map(|(id, shape)| (id, shape.into()))
            .collect();
        if vars.is_empty() {
            return Err(NutsError::EmptyLayout);
        }
        vars.sort_by_key(|(id, _)| *id);
        if let Some(pair) = vars.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(NutsError::DuplicateVariable(pair[0].0));
        }

        let mut offset = 0;
        let slots = vars
            .into_iter()
            .map(|(id, shape)| {
                let len: usize = shape.iter().product();
                let range = offset..offset + len;
                offset += len;
                VariableSlot { id, shape, range }
            })
            .collect();

        Ok(VariableLayout { slots, dim: offset })
    }

    /// A layout with a single vector-valued variable.
    pub fn vector(id: VariableId, len: usize) -> Self {
        VariableLayout {
            slots: vec![VariableSlot {
                id,
                shape: Box::new([len]),
                range: 0..len,
            }],
            dim: len,
        }
    }

    /// A layout of `count` scalar variables with ids `0..count`.
    pub fn scalars(count: u64) -> Result<Self, NutsError> {
        Self::new((0..count).map(|i| (VariableId(i), Vec::<usize>::new())))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn ids(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.slots.iter().map(|slot| slot.id)
    }

    pub fn range(&self, id: VariableId) -> Option<Range<usize>> {
        self.slot(id).map(|slot| slot.range.clone())
    }

    fn slot(&self, id: VariableId) -> Option<&VariableSlot> {
        self.slots
            .binary_search_by_key(&id, |slot| slot.id)
            .ok()
            .map(|idx| &self.slots[idx])
    }

    /// Write the values of every variable into one flat vector.
    pub fn flatten(&self, values: &VariableValues) -> Result<Box<[f64]>, NutsError> {
        let mut out = vec![0f64; self.dim];
        for slot in self.slots.iter() {
            let value = values
                .get(slot.id)
                .ok_or(NutsError::MissingVariable(slot.id))?;
            if value.shape() != &*slot.shape {
                return Err(NutsError::ShapeMismatch {
                    shape: slot.shape.to_vec(),
                    len: value.len(),
                });
            }
            out[slot.range.clone()].copy_from_slice(value.values());
        }
        Ok(out.into())
    }

    pub fn unflatten(&self, flat: &[f64]) -> VariableValues {
        assert!(flat.len() == self.dim);
        self.slots
            .iter()
            .map(|slot| {
                let tensor = Tensor {
                    shape: slot.shape.clone(),
                    values: flat[slot.range.clone()].into(),
                };
                (slot.id, tensor)
            })
            .collect()
    }

    /// Fill every variable with the same value.
    pub fn filled(&self, value: f64) -> VariableValues {
        self.slots
            .iter()
            .map(|slot| (slot.id, Tensor::filled(&slot.shape, value)))
            .collect()
    }
}

/// A differentiable log density, the gradient oracle of the sampler.
///
/// The sampler calls [`Model::logp`] exactly once per leapfrog step. Errors
/// returned from it are not recovered: they end the chain.
///
/// Implementations may cache values in place, so every chain needs its
/// own instance.
pub trait Model {
    type LogpError: std::error::Error + Send + Sync + 'static;

    fn layout(&self) -> &VariableLayout;

    /// Compute the unnormalized log density at `position` and write its gradient
    /// into `gradient`.
    ///
    /// Returning `f64::NEG_INFINITY` is legal and marks a point of zero density.
    fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64, Self::LogpError>;

    /// The values reported for an accepted position.
    fn sample_at(&mut self, position: &[f64]) -> Result<VariableValues, Self::LogpError> {
        Ok(self.layout().unflatten(position))
    }

    fn dim(&self) -> usize {
        self.layout().dim()
    }
}
