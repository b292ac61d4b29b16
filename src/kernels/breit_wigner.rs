use num::complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::Kernel;
use crate::utils::functions::{blatt_weisskopf, breakup_momentum};

/// A relativistic Breit-Wigner with a mass-dependent width and Blatt-Weisskopf barrier factors
/// for a resonance decaying into two daughters with fixed masses.
///
/// The kernel takes three inputs, in order: the invariant mass squared of the daughter system,
/// the nominal resonance mass, and the nominal width. The mass and width are normally fit
/// parameters, and their absolute values are used.
///
/// ```math
/// I(m) = \frac{B_\ell(m)\sqrt{m_0\Gamma_0/\pi}}{m_0^2 - m^2 - \imath m_0 \Gamma(m)}, \quad
/// \Gamma(m) = \Gamma_0 \frac{m_0}{m}\frac{q(m)}{q(m_0)}\left(\frac{B_\ell(m)}{B_\ell(m_0)}\right)^2
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreitWigner {
    /// The orbital angular momentum of the decay.
    pub l: usize,
    /// The mass of the first daughter.
    pub daughter_1_mass: f64,
    /// The mass of the second daughter.
    pub daughter_2_mass: f64,
}

impl BreitWigner {
    pub fn new(l: usize, daughter_1_mass: f64, daughter_2_mass: f64) -> Box<Self> {
        Self {
            l,
            daughter_1_mass,
            daughter_2_mass,
        }
        .into()
    }
}

#[typetag::serde]
impl Kernel for BreitWigner {
    fn name(&self) -> String {
        format!("BreitWigner(l={})", self.l)
    }

    fn arity(&self) -> usize {
        3
    }

    fn compute(&self, args: &[f64]) -> Complex64 {
        let mass = args[0].abs().sqrt();
        let mass0 = args[1].abs();
        let width0 = args[2].abs();
        let (mass1, mass2) = (self.daughter_1_mass, self.daughter_2_mass);
        let q0 = breakup_momentum(mass0, mass1, mass2);
        let q = breakup_momentum(mass, mass1, mass2);
        let f0 = blatt_weisskopf(mass0, mass1, mass2, self.l);
        let f = blatt_weisskopf(mass, mass1, mass2, self.l);
        let width = width0 * (mass0 / mass) * (q / q0) * (f / f0).powi(2);
        let n = f64::sqrt(mass0 * width0 / PI);
        let d = Complex64::new(mass0.powi(2) - mass.powi(2), -(mass0 * width));
        Complex64::from(f * n) / d
    }
}
