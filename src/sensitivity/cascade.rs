/// A named row predicate with its rejection count.
struct Filter<'a, T: ?Sized> {
    name: &'static str,
    predicate: Box<dyn Fn(&T) -> bool + 'a>,
    rejected: usize,
}

/// Ordered predicates applied to each row; a row stops at the first
/// predicate it fails, which is charged with the rejection.
pub(super) struct Cascade<'a, T: ?Sized> {
    filters: Vec<Filter<'a, T>>,
    seen: usize,
    passed: usize,
}

impl<'a, T: ?Sized> Cascade<'a, T> {
    pub(super) fn new() -> Self {
        Self { filters: Vec::new(), seen: 0, passed: 0 }
    }

    pub(super) fn stage(mut self, name: &'static str, predicate: impl Fn(&T) -> bool + 'a) -> Self {
        self.filters.push(Filter { name, predicate: Box::new(predicate), rejected: 0 });
        self
    }

    /// Run `row` through every stage.
    pub(super) fn admit(&mut self, row: &T) -> bool {
        self.seen += 1;
        for filter in &mut self.filters {
            if !(filter.predicate)(row) {
                filter.rejected += 1;
                return false;
            }
        }
        self.passed += 1;
        true
    }

    #[inline] pub(super) fn seen(&self) -> usize { self.seen }
    #[inline] pub(super) fn passed(&self) -> usize { self.passed }

    /// `(stage, rejected)` in stage order.
    pub(super) fn rejections(&self) -> Vec<(&'static str, usize)> {
        self.filters.iter().map(|f| (f.name, f.rejected)).collect()
    }
}
