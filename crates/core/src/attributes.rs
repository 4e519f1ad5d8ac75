use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PointsError, PointsResult};

/// Name of the voxel-local position attribute every point set carries.
pub const POSITION: &str = "P";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl AttributeValue {
    pub fn zero(data_type: AttributeType) -> Self {
        match data_type {
            AttributeType::Float => AttributeValue::Float(0.0),
            AttributeType::Int => AttributeValue::Int(0),
            AttributeType::Vec2 => AttributeValue::Vec2([0.0; 2]),
            AttributeType::Vec3 => AttributeValue::Vec3([0.0; 3]),
            AttributeType::Vec4 => AttributeValue::Vec4([0.0; 4]),
        }
    }

    pub fn data_type(&self) -> AttributeType {
        match self {
            AttributeValue::Float(_) => AttributeType::Float,
            AttributeValue::Int(_) => AttributeType::Int,
            AttributeValue::Vec2(_) => AttributeType::Vec2,
            AttributeValue::Vec3(_) => AttributeType::Vec3,
            AttributeValue::Vec4(_) => AttributeType::Vec4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeStorage {
    Float(Vec<f32>),
    Int(Vec<i32>),
    Vec2(Vec<[f32; 2]>),
    Vec3(Vec<[f32; 3]>),
    Vec4(Vec<[f32; 4]>),
}

impl AttributeStorage {
    pub fn filled(value: AttributeValue, len: usize) -> Self {
        match value {
            AttributeValue::Float(v) => AttributeStorage::Float(vec![v; len]),
            AttributeValue::Int(v) => AttributeStorage::Int(vec![v; len]),
            AttributeValue::Vec2(v) => AttributeStorage::Vec2(vec![v; len]),
            AttributeValue::Vec3(v) => AttributeStorage::Vec3(vec![v; len]),
            AttributeValue::Vec4(v) => AttributeStorage::Vec4(vec![v; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AttributeStorage::Float(values) => values.len(),
            AttributeStorage::Int(values) => values.len(),
            AttributeStorage::Vec2(values) => values.len(),
            AttributeStorage::Vec3(values) => values.len(),
            AttributeStorage::Vec4(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> AttributeType {
        match self {
            AttributeStorage::Float(_) => AttributeType::Float,
            AttributeStorage::Int(_) => AttributeType::Int,
            AttributeStorage::Vec2(_) => AttributeType::Vec2,
            AttributeStorage::Vec3(_) => AttributeType::Vec3,
            AttributeStorage::Vec4(_) => AttributeType::Vec4,
        }
    }

    pub fn as_ref(&self) -> AttributeRef<'_> {
        match self {
            AttributeStorage::Float(values) => AttributeRef::Float(values.as_slice()),
            AttributeStorage::Int(values) => AttributeRef::Int(values.as_slice()),
            AttributeStorage::Vec2(values) => AttributeRef::Vec2(values.as_slice()),
            AttributeStorage::Vec3(values) => AttributeRef::Vec3(values.as_slice()),
            AttributeStorage::Vec4(values) => AttributeRef::Vec4(values.as_slice()),
        }
    }

    /// Picks the stride runs of `indices`, in the order given.
    pub fn gather(&self, stride: usize, indices: &[usize]) -> Self {
        fn pick<T: Copy>(values: &[T], stride: usize, indices: &[usize]) -> Vec<T> {
            let mut out = Vec::with_capacity(indices.len() * stride);
            for &index in indices {
                out.extend_from_slice(&values[index * stride..(index + 1) * stride]);
            }
            out
        }
        match self {
            AttributeStorage::Float(values) => AttributeStorage::Float(pick(values, stride, indices)),
            AttributeStorage::Int(values) => AttributeStorage::Int(pick(values, stride, indices)),
            AttributeStorage::Vec2(values) => AttributeStorage::Vec2(pick(values, stride, indices)),
            AttributeStorage::Vec3(values) => AttributeStorage::Vec3(pick(values, stride, indices)),
            AttributeStorage::Vec4(values) => AttributeStorage::Vec4(pick(values, stride, indices)),
        }
    }

    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        match self {
            AttributeStorage::Float(values) => AttributeStorage::Float(values[range].to_vec()),
            AttributeStorage::Int(values) => AttributeStorage::Int(values[range].to_vec()),
            AttributeStorage::Vec2(values) => AttributeStorage::Vec2(values[range].to_vec()),
            AttributeStorage::Vec3(values) => AttributeStorage::Vec3(values[range].to_vec()),
            AttributeStorage::Vec4(values) => AttributeStorage::Vec4(values[range].to_vec()),
        }
    }

    /// Appends `other` when both hold the same type. Returns `false` otherwise.
    pub fn append(&mut self, other: &AttributeStorage) -> bool {
        match (self, other) {
            (AttributeStorage::Float(a), AttributeStorage::Float(b)) => a.extend_from_slice(b),
            (AttributeStorage::Int(a), AttributeStorage::Int(b)) => a.extend_from_slice(b),
            (AttributeStorage::Vec2(a), AttributeStorage::Vec2(b)) => a.extend_from_slice(b),
            (AttributeStorage::Vec3(a), AttributeStorage::Vec3(b)) => a.extend_from_slice(b),
            (AttributeStorage::Vec4(a), AttributeStorage::Vec4(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }

    pub fn empty(data_type: AttributeType) -> Self {
        match data_type {
            AttributeType::Float => AttributeStorage::Float(Vec::new()),
            AttributeType::Int => AttributeStorage::Int(Vec::new()),
            AttributeType::Vec2 => AttributeStorage::Vec2(Vec::new()),
            AttributeType::Vec3 => AttributeStorage::Vec3(Vec::new()),
            AttributeType::Vec4 => AttributeStorage::Vec4(Vec::new()),
        }
    }

    fn element(&self, index: usize) -> AttributeValue {
        match self {
            AttributeStorage::Float(values) => AttributeValue::Float(values[index]),
            AttributeStorage::Int(values) => AttributeValue::Int(values[index]),
            AttributeStorage::Vec2(values) => AttributeValue::Vec2(values[index]),
            AttributeStorage::Vec3(values) => AttributeValue::Vec3(values[index]),
            AttributeStorage::Vec4(values) => AttributeValue::Vec4(values[index]),
        }
    }

    fn set_element(&mut self, index: usize, value: AttributeValue) -> bool {
        match (self, value) {
            (AttributeStorage::Float(values), AttributeValue::Float(v)) => values[index] = v,
            (AttributeStorage::Int(values), AttributeValue::Int(v)) => values[index] = v,
            (AttributeStorage::Vec2(values), AttributeValue::Vec2(v)) => values[index] = v,
            (AttributeStorage::Vec3(values), AttributeValue::Vec3(v)) => values[index] = v,
            (AttributeStorage::Vec4(values), AttributeValue::Vec4(v)) => values[index] = v,
            _ => return false,
        }
        true
    }

    fn expand_uniform(&mut self, len: usize) {
        fn repeat<T: Copy>(values: &mut Vec<T>, len: usize) {
            let pattern = std::mem::take(values);
            values.reserve(pattern.len() * len);
            for _ in 0..len {
                values.extend_from_slice(&pattern);
            }
        }
        match self {
            AttributeStorage::Float(values) => repeat(values, len),
            AttributeStorage::Int(values) => repeat(values, len),
            AttributeStorage::Vec2(values) => repeat(values, len),
            AttributeStorage::Vec3(values) => repeat(values, len),
            AttributeStorage::Vec4(values) => repeat(values, len),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeRef<'a> {
    Float(&'a [f32]),
    Int(&'a [i32]),
    Vec2(&'a [[f32; 2]]),
    Vec3(&'a [[f32; 3]]),
    Vec4(&'a [[f32; 4]]),
}

impl<'a> AttributeRef<'a> {
    pub fn len(&self) -> usize {
        match self {
            AttributeRef::Float(values) => values.len(),
            AttributeRef::Int(values) => values.len(),
            AttributeRef::Vec2(values) => values.len(),
            AttributeRef::Vec3(values) => values.len(),
            AttributeRef::Vec4(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> AttributeType {
        match self {
            AttributeRef::Float(_) => AttributeType::Float,
            AttributeRef::Int(_) => AttributeType::Int,
            AttributeRef::Vec2(_) => AttributeType::Vec2,
            AttributeRef::Vec3(_) => AttributeType::Vec3,
            AttributeRef::Vec4(_) => AttributeType::Vec4,
        }
    }
}

/// Per-point column of a leaf. `stride` values are stored per point. A
/// uniform array stores a single stride-sized run shared by every point
/// until it is expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeArray {
    storage: AttributeStorage,
    stride: usize,
    len: usize,
    uniform: bool,
}

impl AttributeArray {
    pub fn uniform(value: AttributeValue, stride: usize, len: usize) -> Self {
        Self {
            storage: AttributeStorage::filled(value, stride),
            stride,
            len,
            uniform: true,
        }
    }

    pub fn from_storage(storage: AttributeStorage, stride: usize) -> PointsResult<Self> {
        if stride == 0 || storage.len() % stride != 0 {
            return Err(PointsError::InvalidSettings(format!(
                "{} values cannot be split into stride {stride}",
                storage.len()
            )));
        }
        let len = storage.len() / stride;
        Ok(Self {
            storage,
            stride,
            len,
            uniform: false,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    pub fn data_type(&self) -> AttributeType {
        self.storage.data_type()
    }

    pub fn storage(&self) -> &AttributeStorage {
        &self.storage
    }

    /// Materializes a uniform array into one run per point.
    pub fn expand(&mut self) {
        if !self.uniform {
            return;
        }
        self.storage.expand_uniform(self.len);
        self.uniform = false;
    }

    fn element_index(&self, index: usize, component: usize) -> usize {
        if self.uniform {
            component
        } else {
            index * self.stride + component
        }
    }

    pub fn get(&self, index: usize) -> AttributeValue {
        self.get_strided(index, 0)
    }

    pub fn get_strided(&self, index: usize, component: usize) -> AttributeValue {
        self.storage.element(self.element_index(index, component))
    }

    pub fn set(&mut self, index: usize, value: AttributeValue) -> bool {
        self.expand();
        let element = self.element_index(index, 0);
        self.storage.set_element(element, value)
    }

    pub fn vec3(&self, index: usize) -> Option<[f32; 3]> {
        match &self.storage {
            AttributeStorage::Vec3(values) => values.get(self.element_index(index, 0)).copied(),
            _ => None,
        }
    }

    pub fn float(&self, index: usize) -> Option<f32> {
        match &self.storage {
            AttributeStorage::Float(values) => values.get(self.element_index(index, 0)).copied(),
            _ => None,
        }
    }

    /// One stride run per point, expanding a uniform array on the copy.
    pub fn to_expanded_storage(&self) -> AttributeStorage {
        let mut storage = self.storage.clone();
        if self.uniform {
            storage.expand_uniform(self.len);
        }
        storage
    }

    /// Mutable view of an expanded Vec3 column.
    pub fn vec3_mut(&mut self) -> Option<&mut [[f32; 3]]> {
        self.expand();
        match &mut self.storage {
            AttributeStorage::Vec3(values) => Some(values.as_mut_slice()),
            _ => None,
        }
    }

    /// Copies whole stride runs `source[src] -> self[tgt]` for every
    /// `(src, tgt)` pair. Both arrays must share type and stride; a mismatch
    /// means the caller's descriptors disagree and is treated as a bug.
    pub fn copy_values<I>(&mut self, source: &AttributeArray, pairs: I)
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        assert_eq!(
            self.data_type(),
            source.data_type(),
            "attribute copy between mismatched types"
        );
        assert_eq!(self.stride, source.stride, "attribute copy between mismatched strides");
        self.expand();

        let stride = self.stride;
        let source_uniform = source.uniform;
        fn copy<T: Copy>(
            target: &mut [T],
            source: &[T],
            stride: usize,
            source_uniform: bool,
            pairs: impl IntoIterator<Item = (usize, usize)>,
        ) {
            for (src, tgt) in pairs {
                let from = if source_uniform { 0 } else { src * stride };
                let to = tgt * stride;
                target[to..to + stride].copy_from_slice(&source[from..from + stride]);
            }
        }
        match (&mut self.storage, &source.storage) {
            (AttributeStorage::Float(t), AttributeStorage::Float(s)) => copy(t, s, stride, source_uniform, pairs),
            (AttributeStorage::Int(t), AttributeStorage::Int(s)) => copy(t, s, stride, source_uniform, pairs),
            (AttributeStorage::Vec2(t), AttributeStorage::Vec2(s)) => copy(t, s, stride, source_uniform, pairs),
            (AttributeStorage::Vec3(t), AttributeStorage::Vec3(s)) => copy(t, s, stride, source_uniform, pairs),
            (AttributeStorage::Vec4(t), AttributeStorage::Vec4(s)) => copy(t, s, stride, source_uniform, pairs),
            _ => unreachable!("types checked above"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub name: String,
    pub data_type: AttributeType,
    pub stride: usize,
    pub default: AttributeValue,
}

/// Ordered attribute layout shared by every leaf of a point tree. Indices
/// returned by [`AttributeDescriptor::find`] stay valid until the layout is
/// replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    entries: Vec<AttributeInfo>,
}

impl Default for AttributeDescriptor {
    fn default() -> Self {
        Self::with_position()
    }
}

impl AttributeDescriptor {
    pub fn with_position() -> Self {
        Self {
            entries: vec![AttributeInfo {
                name: POSITION.to_string(),
                data_type: AttributeType::Vec3,
                stride: 1,
                default: AttributeValue::Vec3([0.0; 3]),
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|info| info.name == name)
    }

    pub fn position_index(&self) -> Option<usize> {
        self.find(POSITION)
    }

    pub fn get(&self, index: usize) -> Option<&AttributeInfo> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeInfo> {
        self.entries.iter()
    }

    pub fn with_attribute(&self, info: AttributeInfo) -> PointsResult<Self> {
        if self.find(&info.name).is_some() {
            return Err(PointsError::DuplicateAttribute { name: info.name });
        }
        if info.stride == 0 {
            return Err(PointsError::InvalidSettings(format!(
                "attribute \"{}\" needs a stride of at least one",
                info.name
            )));
        }
        if info.default.data_type() != info.data_type {
            return Err(PointsError::AttributeType {
                name: info.name,
                expected: info.data_type,
                actual: info.default.data_type(),
            });
        }
        let mut entries = self.entries.clone();
        entries.push(info);
        Ok(Self { entries })
    }

    /// Keeps every entry of `self` and appends the entries of `other` it
    /// lacks. Same-named entries must agree on type and stride.
    pub fn union(&self, other: &AttributeDescriptor) -> PointsResult<Self> {
        let mut entries = self.entries.clone();
        for info in &other.entries {
            match self.find(&info.name).and_then(|idx| self.entries.get(idx)) {
                Some(existing) => {
                    if existing.data_type != info.data_type || existing.stride != info.stride {
                        return Err(PointsError::AttributeType {
                            name: info.name.clone(),
                            expected: existing.data_type,
                            actual: info.data_type,
                        });
                    }
                }
                None => entries.push(info.clone()),
            }
        }
        Ok(Self { entries })
    }
}

/// The columns of one leaf, laid out by a shared descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSet {
    descriptor: Arc<AttributeDescriptor>,
    arrays: Vec<AttributeArray>,
}

impl AttributeSet {
    /// Same layout as `descriptor`, `len` points, every array uniform at
    /// its default value.
    pub fn new_uniform(descriptor: Arc<AttributeDescriptor>, len: usize) -> Self {
        let arrays = descriptor
            .iter()
            .map(|info| AttributeArray::uniform(info.default, info.stride, len))
            .collect();
        Self { descriptor, arrays }
    }

    pub fn from_arrays(
        descriptor: Arc<AttributeDescriptor>,
        arrays: Vec<AttributeArray>,
    ) -> PointsResult<Self> {
        let len = arrays.first().map(AttributeArray::len).unwrap_or(0);
        if arrays.len() != descriptor.len() {
            return Err(PointsError::LengthMismatch {
                name: "attribute set".to_string(),
                expected: descriptor.len(),
                actual: arrays.len(),
            });
        }
        for (info, array) in descriptor.iter().zip(&arrays) {
            if array.data_type() != info.data_type {
                return Err(PointsError::AttributeType {
                    name: info.name.clone(),
                    expected: info.data_type,
                    actual: array.data_type(),
                });
            }
            if array.len() != len {
                return Err(PointsError::LengthMismatch {
                    name: info.name.clone(),
                    expected: len,
                    actual: array.len(),
                });
            }
        }
        Ok(Self { descriptor, arrays })
    }

    pub fn descriptor(&self) -> &Arc<AttributeDescriptor> {
        &self.descriptor
    }

    pub fn len(&self) -> usize {
        self.arrays.first().map(AttributeArray::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&AttributeArray> {
        self.arrays.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut AttributeArray> {
        self.arrays.get_mut(index)
    }

    pub fn arrays(&self) -> &[AttributeArray] {
        &self.arrays
    }

    pub fn arrays_mut(&mut self) -> &mut [AttributeArray] {
        &mut self.arrays
    }

    pub fn find(&self, name: &str) -> Option<&AttributeArray> {
        self.descriptor.find(name).and_then(|idx| self.arrays.get(idx))
    }

    pub fn replace(&mut self, index: usize, array: AttributeArray) -> PointsResult<()> {
        let len = self.len();
        let Some(info) = self.descriptor.get(index) else {
            return Err(PointsError::InvalidSettings(format!(
                "attribute index {index} is out of range"
            )));
        };
        if array.data_type() != info.data_type || array.stride() != info.stride {
            return Err(PointsError::AttributeType {
                name: info.name.clone(),
                expected: info.data_type,
                actual: array.data_type(),
            });
        }
        if array.len() != len {
            return Err(PointsError::LengthMismatch {
                name: info.name.clone(),
                expected: len,
                actual: array.len(),
            });
        }
        self.arrays[index] = array;
        Ok(())
    }

    /// Rebinds to a wider descriptor, filling new columns with defaults.
    pub(crate) fn widen(&mut self, descriptor: Arc<AttributeDescriptor>) {
        let len = self.len();
        let mut arrays = Vec::with_capacity(descriptor.len());
        let mut old: Vec<Option<AttributeArray>> = std::mem::take(&mut self.arrays).into_iter().map(Some).collect();
        for info in descriptor.iter() {
            let existing = self
                .descriptor
                .find(&info.name)
                .and_then(|idx| old.get_mut(idx))
                .and_then(Option::take);
            arrays.push(existing.unwrap_or_else(|| AttributeArray::uniform(info.default, info.stride, len)));
        }
        self.arrays = arrays;
        self.descriptor = descriptor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn density() -> AttributeInfo {
        AttributeInfo {
            name: "density".to_string(),
            data_type: AttributeType::Float,
            stride: 1,
            default: AttributeValue::Float(0.5),
        }
    }

    #[test]
    fn uniform_arrays_expand_on_write() {
        let mut array = AttributeArray::uniform(AttributeValue::Float(2.0), 1, 4);
        assert!(array.is_uniform());
        assert_eq!(array.get(3), AttributeValue::Float(2.0));
        assert!(array.set(1, AttributeValue::Float(5.0)));
        assert!(!array.is_uniform());
        assert_eq!(array.storage().len(), 4);
        assert_eq!(array.get(1), AttributeValue::Float(5.0));
        assert_eq!(array.get(2), AttributeValue::Float(2.0));
    }

    #[test]
    fn copy_values_moves_strided_runs() {
        let source = AttributeArray::from_storage(
            AttributeStorage::Int(vec![1, 2, 3, 4, 5, 6]),
            2,
        )
        .expect("source array");
        let mut target = AttributeArray::uniform(AttributeValue::Int(0), 2, 3);
        target.copy_values(&source, [(2, 0), (0, 2)]);
        assert_eq!(target.storage(), &AttributeStorage::Int(vec![5, 6, 0, 0, 1, 2]));
    }

    #[test]
    fn copy_values_from_uniform_source() {
        let source = AttributeArray::uniform(AttributeValue::Vec2([1.0, 2.0]), 1, 10);
        let mut target = AttributeArray::uniform(AttributeValue::Vec2([0.0; 2]), 1, 2);
        target.copy_values(&source, [(7, 1)]);
        assert_eq!(target.get(1), AttributeValue::Vec2([1.0, 2.0]));
        assert_eq!(target.get(0), AttributeValue::Vec2([0.0, 0.0]));
    }

    #[test]
    fn gather_and_append_follow_stride() {
        let storage = AttributeStorage::Int(vec![1, 2, 3, 4, 5, 6]);
        let mut picked = storage.gather(2, &[2, 0]);
        assert_eq!(picked, AttributeStorage::Int(vec![5, 6, 1, 2]));
        assert!(picked.append(&storage.slice(2..4)));
        assert_eq!(picked, AttributeStorage::Int(vec![5, 6, 1, 2, 3, 4]));
        assert!(!picked.append(&AttributeStorage::Float(vec![1.0])));
    }

    #[test]
    fn descriptor_rejects_duplicates_and_unions_by_name() {
        let base = AttributeDescriptor::with_position();
        let with_density = base.with_attribute(density()).expect("add density");
        assert!(with_density.with_attribute(density()).is_err());
        assert_eq!(with_density.find("density"), Some(1));

        let other = base
            .with_attribute(AttributeInfo {
                name: "id".to_string(),
                data_type: AttributeType::Int,
                stride: 1,
                default: AttributeValue::Int(-1),
            })
            .expect("add id");
        let merged = with_density.union(&other).expect("union");
        let names: Vec<_> = merged.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, ["P", "density", "id"]);
    }

    #[test]
    fn widen_keeps_existing_columns() {
        let base = Arc::new(AttributeDescriptor::with_position());
        let mut set = AttributeSet::new_uniform(base.clone(), 3);
        set.get_mut(0)
            .expect("position")
            .set(2, AttributeValue::Vec3([0.1, 0.2, 0.3]));
        let wider = Arc::new(base.with_attribute(density()).expect("add density"));
        set.widen(wider);
        assert_eq!(set.arrays().len(), 2);
        assert_eq!(set.get(0).and_then(|p| p.vec3(2)), Some([0.1, 0.2, 0.3]));
        assert_eq!(set.find("density").and_then(|d| d.float(1)), Some(0.5));
    }
}
