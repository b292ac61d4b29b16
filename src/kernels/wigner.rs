use num::complex::Complex64;
use serde::{Deserialize, Serialize};

use super::Kernel;
use crate::utils::functions::wigner_small_d;

/// The Wigner-$`D`$ function $`D^j_{mn}(\phi, \theta, 0) = e^{-\imath m \phi} d^j_{mn}(\theta)`$
/// describing the angular distribution of a two-body decay in the helicity formalism.
///
/// Spins and projections are stored as twice their physical values (see
/// [`wigner_small_d`]). The kernel takes two inputs: the helicity angle $`\theta`$ and the
/// azimuthal angle $`\phi`$.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WignerD {
    pub j2: i32,
    pub m2: i32,
    pub n2: i32,
}

impl WignerD {
    pub fn new(j2: i32, m2: i32, n2: i32) -> Box<Self> {
        Self { j2, m2, n2 }.into()
    }
}

#[typetag::serde]
impl Kernel for WignerD {
    fn name(&self) -> String {
        format!("WignerD({}/2, {}/2, {}/2)", self.j2, self.m2, self.n2)
    }

    fn arity(&self) -> usize {
        2
    }

    fn compute(&self, args: &[f64]) -> Complex64 {
        let (theta, phi) = (args[0], args[1]);
        let d = wigner_small_d(self.j2, self.m2, self.n2, theta);
        Complex64::from_polar(d, -(self.m2 as f64 / 2.0) * phi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernels::Kernel, tree::FunctionTree, DataSet, Value};
    use approx::assert_relative_eq;

    #[test]
    fn test_wigner_d_phase() {
        let (theta, phi): (f64, f64) = (0.7, 0.4);
        let result = WignerD::new(2, 2, 0).compute(&[theta, phi]);
        let d = -theta.sin() / f64::sqrt(2.0);
        assert_relative_eq!(result.re, d * phi.cos(), epsilon = 1e-14);
        assert_relative_eq!(result.im, -d * phi.sin(), epsilon = 1e-14);
    }

    #[test]
    fn test_wigner_d_serde() {
        let kernel: Box<dyn Kernel> = WignerD::new(4, 0, 2);
        let json = serde_json::to_string(&kernel).unwrap();
        let back: Box<dyn Kernel> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "WignerD(4/2, 0/2, 2/2)");
    }

    #[test]
    fn test_wigner_d_rejects_complex_inputs() {
        let mut tree = FunctionTree::new();
        let theta = tree.variable("theta").unwrap();
        let phi = tree
            .complex_constant(Complex64::new(0.0, 1.0))
            .unwrap();
        assert!(tree.kernel(WignerD::new(2, 0, 0), &[theta, phi]).is_err());
        let phi = tree.constant(0.0).unwrap();
        let head = tree.kernel(WignerD::new(2, 0, 0), &[theta, phi]).unwrap();
        tree.set_head(head).unwrap();
        let dataset = DataSet::from_columns([("theta", vec![0.0, 0.5])]).unwrap();
        match tree.evaluate(&dataset).unwrap() {
            Value::ComplexBatch(values) => {
                assert_relative_eq!(values[0].re, 1.0);
                assert_relative_eq!(values[1].re, 0.5f64.cos(), epsilon = 1e-14);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }
}
