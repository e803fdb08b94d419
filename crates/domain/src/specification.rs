//! Composable business-rule predicates.

/// A reusable business rule over a candidate.
///
/// Rules combine with [`and`](Specification::and), [`or`](Specification::or)
/// and [`not`](Specification::not) so callers can filter aggregates without
/// the aggregate knowing about the query.
pub trait Specification<T>: Send + Sync {
    /// Returns true if the candidate satisfies the rule.
    fn is_satisfied_by(&self, candidate: &T) -> bool;

    fn and<S>(self, other: S) -> AndSpecification<T>
    where
        Self: Sized + 'static,
        S: Specification<T> + 'static,
    {
        AndSpecification::new(Box::new(self), Box::new(other))
    }

    fn or<S>(self, other: S) -> OrSpecification<T>
    where
        Self: Sized + 'static,
        S: Specification<T> + 'static,
    {
        OrSpecification::new(Box::new(self), Box::new(other))
    }

    fn not(self) -> NotSpecification<T>
    where
        Self: Sized + 'static,
    {
        NotSpecification::new(Box::new(self))
    }
}

/// A boxed rule, so rules chosen at runtime still compose.
pub type BoxSpecification<T> = Box<dyn Specification<T>>;

impl<T> Specification<T> for Box<dyn Specification<T>> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.as_ref().is_satisfied_by(candidate)
    }
}

/// Satisfied when both rules are.
pub struct AndSpecification<T> {
    left: BoxSpecification<T>,
    right: BoxSpecification<T>,
}

impl<T> AndSpecification<T> {
    pub fn new(left: BoxSpecification<T>, right: BoxSpecification<T>) -> Self {
        Self { left, right }
    }
}

impl<T> Specification<T> for AndSpecification<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.left.is_satisfied_by(candidate) && self.right.is_satisfied_by(candidate)
    }
}

/// Satisfied when either rule is.
pub struct OrSpecification<T> {
    left: BoxSpecification<T>,
    right: BoxSpecification<T>,
}

impl<T> OrSpecification<T> {
    pub fn new(left: BoxSpecification<T>, right: BoxSpecification<T>) -> Self {
        Self { left, right }
    }
}

impl<T> Specification<T> for OrSpecification<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.left.is_satisfied_by(candidate) || self.right.is_satisfied_by(candidate)
    }
}

/// Satisfied when the inner rule is not.
pub struct NotSpecification<T> {
    inner: BoxSpecification<T>,
}

impl<T> NotSpecification<T> {
    pub fn new(inner: BoxSpecification<T>) -> Self {
        Self { inner }
    }
}

impl<T> Specification<T> for NotSpecification<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        !self.inner.is_satisfied_by(candidate)
    }
}

/// Satisfied by every candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anything;

impl<T> Specification<T> for Anything {
    fn is_satisfied_by(&self, _: &T) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Even;
    impl Specification<i32> for Even {
        fn is_satisfied_by(&self, n: &i32) -> bool {
            n % 2 == 0
        }
    }

    struct Positive;
    impl Specification<i32> for Positive {
        fn is_satisfied_by(&self, n: &i32) -> bool {
            *n > 0
        }
    }

    #[test]
    fn and_requires_both() {
        let spec = Even.and(Positive);
        assert!(spec.is_satisfied_by(&4));
        assert!(!spec.is_satisfied_by(&-4));
        assert!(!spec.is_satisfied_by(&3));
    }

    #[test]
    fn or_requires_either() {
        let spec = Even.or(Positive);
        assert!(spec.is_satisfied_by(&-4));
        assert!(spec.is_satisfied_by(&3));
        assert!(!spec.is_satisfied_by(&-3));
    }

    #[test]
    fn not_inverts() {
        let spec = Even.not();
        assert!(spec.is_satisfied_by(&3));
        assert!(!spec.is_satisfied_by(&2));
    }

    #[test]
    fn nested_combination() {
        // (even AND positive) OR NOT positive
        let spec = Even.and(Positive).or(Positive.not());
        assert!(spec.is_satisfied_by(&2));
        assert!(spec.is_satisfied_by(&-3));
        assert!(!spec.is_satisfied_by(&3));
    }

    #[test]
    fn boxed_rules_compose() {
        let rules: Vec<BoxSpecification<i32>> = vec![Box::new(Anything), Box::new(Even)];
        let combined = rules
            .into_iter()
            .fold(Box::new(Anything) as BoxSpecification<i32>, |acc, rule| {
                Box::new(acc.and(rule)) as BoxSpecification<i32>
            });
        assert!(combined.is_satisfied_by(&8));
        assert!(!combined.is_satisfied_by(&7));
    }
}
