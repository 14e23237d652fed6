use crate::Float;
use num_traits::{One, Zero};
use std::ops::{Add, Mul, Neg, Sub};

/// `value + epsilon * e` with `e^2 = 0`. Evaluating a function on a dual
/// number carries its derivative along in `epsilon`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DualNumber {
    pub value: Float,
    pub epsilon: Float,
}

impl DualNumber {
    pub fn new(value: Float, epsilon: Float) -> DualNumber {
        DualNumber { value, epsilon }
    }
}

impl Add for DualNumber {
    type Output = DualNumber;
    #[inline(always)]
    fn add(self, rhs: DualNumber) -> DualNumber {
        DualNumber::new(self.value + rhs.value, self.epsilon + rhs.epsilon)
    }
}

impl Add<Float> for DualNumber {
    type Output = DualNumber;
    #[inline(always)]
    fn add(self, rhs: Float) -> DualNumber {
        DualNumber::new(self.value + rhs, self.epsilon)
    }
}

impl Sub for DualNumber {
    type Output = DualNumber;
    #[inline(always)]
    fn sub(self, rhs: DualNumber) -> DualNumber {
        DualNumber::new(self.value - rhs.value, self.epsilon - rhs.epsilon)
    }
}

impl Mul for DualNumber {
    type Output = DualNumber;
    #[inline(always)]
    fn mul(self, rhs: DualNumber) -> DualNumber {
        DualNumber::new(
            self.value * rhs.value,
            self.value * rhs.epsilon + self.epsilon * rhs.value,
        )
    }
}

impl Mul<Float> for DualNumber {
    type Output = DualNumber;
    #[inline(always)]
    fn mul(self, rhs: Float) -> DualNumber {
        DualNumber::new(self.value * rhs, self.epsilon * rhs)
    }
}

impl Neg for DualNumber {
    type Output = DualNumber;
    #[inline(always)]
    fn neg(self) -> DualNumber {
        DualNumber::new(-self.value, -self.epsilon)
    }
}

impl Zero for DualNumber {
    fn zero() -> DualNumber {
        DualNumber::new(0.0, 0.0)
    }

    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.epsilon == 0.0
    }
}

impl One for DualNumber {
    fn one() -> DualNumber {
        DualNumber::new(1.0, 0.0)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::E_TOL;

    fn cubic<T>(x: T) -> T
    where
        T: Copy + Add<Float, Output = T> + Mul<Output = T> + Mul<Float, Output = T>,
    {
        (x * x * 2.0 + (-3.0)) * x + 1.0
    }

    #[test]
    fn derivative_of_polynomial() {
        let x = 1.5;
        let d = cubic(DualNumber::new(x, 1.0));
        assert!((d.value - cubic(x)).abs() < E_TOL);
        assert!((d.epsilon - (6.0 * x * x - 3.0)).abs() < E_TOL);
    }

    #[test]
    fn identities() {
        let a = DualNumber::new(2.0, -1.0);
        assert_eq!(a * DualNumber::one(), a);
        assert_eq!(a + DualNumber::zero(), a);
        assert!((a - a).is_zero());
        assert_eq!(-a, DualNumber::new(-2.0, 1.0));
    }
}
