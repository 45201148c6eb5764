use super::*;
use pretty_assertions::assert_eq;

fn both() -> [BooleanAlgebra; 2] {
    [BooleanAlgebra::new(false), BooleanAlgebra::new(true)]
}

#[test]
fn and_or_are_commutative() {
    for algebra in both() {
        for a in Boolean::ALL {
            for b in Boolean::ALL {
                assert_eq!(algebra.and(a, b), algebra.and(b, a), "{a} and {b}");
                assert_eq!(algebra.or(a, b), algebra.or(b, a), "{a} or {b}");
            }
        }
    }
}

#[test]
fn never_true_laws() {
    for algebra in both() {
        for x in Boolean::ALL {
            assert_eq!(algebra.and(Boolean::NeverTrue, x), Boolean::NeverTrue);
        }
        assert_eq!(algebra.or(Boolean::NeverTrue, Boolean::True), Boolean::True);
        assert_eq!(algebra.or(Boolean::NeverTrue, Boolean::False), Boolean::False);
        assert_eq!(algebra.not(Boolean::NeverTrue), Boolean::True);
    }
    assert_eq!(
        BooleanAlgebra::new(false).or(Boolean::NeverTrue, Boolean::Unknown),
        Boolean::Unknown
    );
    assert_eq!(
        BooleanAlgebra::new(true).or(Boolean::NeverTrue, Boolean::Unknown),
        Boolean::False
    );
}

#[test]
fn double_negation() {
    for algebra in both() {
        for x in [Boolean::False, Boolean::True] {
            assert_eq!(algebra.not(algebra.not(x)), x);
        }
    }
}

#[test]
fn standard_tables() {
    let algebra = BooleanAlgebra::new(false);
    assert_eq!(algebra.and(Boolean::True, Boolean::Unknown), Boolean::Unknown);
    assert_eq!(algebra.and(Boolean::False, Boolean::Unknown), Boolean::False);
    assert_eq!(algebra.or(Boolean::True, Boolean::Unknown), Boolean::True);
    assert_eq!(algebra.or(Boolean::False, Boolean::Unknown), Boolean::Unknown);
    assert_eq!(algebra.not(Boolean::Unknown), Boolean::Unknown);
}

#[test]
fn no_unknown_never_yields_unknown() {
    let algebra = BooleanAlgebra::new(true);
    assert_eq!(algebra.and(Boolean::True, Boolean::Unknown), Boolean::False);
    for a in Boolean::ALL {
        assert_ne!(algebra.not(a), Boolean::Unknown);
        for b in Boolean::ALL {
            assert_ne!(algebra.and(a, b), Boolean::Unknown);
            assert_ne!(algebra.or(a, b), Boolean::Unknown);
        }
    }
}

#[test]
fn folds() {
    let algebra = BooleanAlgebra::new(false);
    assert_eq!(algebra.and_all([]), Boolean::True);
    assert_eq!(algebra.or_all([]), Boolean::False);
    assert_eq!(
        algebra.and_all([Boolean::True, Boolean::Unknown, Boolean::True]),
        Boolean::Unknown
    );
    assert_eq!(
        algebra.or_all([Boolean::False, Boolean::NeverTrue]),
        Boolean::False
    );
}
