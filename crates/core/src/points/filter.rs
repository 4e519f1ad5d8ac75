use super::PointLeaf;

/// Per-point predicate evaluated leaf by leaf. Each task works on its own
/// clone, and `reset` is called before the points of a leaf are visited.
pub trait PointFilter: Clone + Send + Sync {
    /// `true` when every point passes, letting callers skip evaluation.
    fn is_all(&self) -> bool {
        false
    }

    fn reset(&mut self, _leaf: &PointLeaf) {}

    fn valid(&self, leaf: &PointLeaf, index: usize) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullFilter;

impl PointFilter for NullFilter {
    fn is_all(&self) -> bool {
        true
    }

    fn valid(&self, _leaf: &PointLeaf, _index: usize) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct FnFilter<F>(pub F);

impl<F> PointFilter for FnFilter<F>
where
    F: Fn(&PointLeaf, usize) -> bool + Clone + Send + Sync,
{
    fn valid(&self, leaf: &PointLeaf, index: usize) -> bool {
        (self.0)(leaf, index)
    }
}

/// Keeps points whose float attribute is at least `threshold`. Points of a
/// leaf without the attribute are rejected.
#[derive(Debug, Clone)]
pub struct AttributeThresholdFilter {
    name: String,
    threshold: f32,
    index: Option<usize>,
}

impl AttributeThresholdFilter {
    pub fn new(name: impl Into<String>, threshold: f32) -> Self {
        Self {
            name: name.into(),
            threshold,
            index: None,
        }
    }
}

impl PointFilter for AttributeThresholdFilter {
    fn reset(&mut self, leaf: &PointLeaf) {
        self.index = leaf.attributes().descriptor().find(&self.name);
    }

    fn valid(&self, leaf: &PointLeaf, index: usize) -> bool {
        self.index
            .and_then(|idx| leaf.attributes().get(idx))
            .and_then(|array| array.float(index))
            .is_some_and(|value| value >= self.threshold)
    }
}
