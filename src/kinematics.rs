use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    data::{DataSet, EventCollection},
    tree::value::tabulate,
    utils::{
        functions::kallen,
        simpson,
        vectors::{Vec3, Vec4},
    },
    ArborError, ArborResult,
};

/// Converts raw events into the named kinematic variables a
/// [`FunctionTree`](crate::tree::FunctionTree) reads.
pub trait Kinematics: Send + Sync {
    /// Compute every registered variable for each event.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::CorruptDataError`] if the collection violates its own invariants or
    /// does not describe the final state these kinematics were built for.
    fn convert(&self, events: &EventCollection) -> ArborResult<DataSet>;
    /// The volume of the phase space of the reaction.
    fn phsp_volume(&self) -> f64;
    /// The particle IDs of the final state, in the order events store their four-momenta.
    fn final_state_pids(&self) -> &[i32];
    /// The invariant mass of the initial state.
    fn initial_state_mass(&self) -> f64;
    /// The names of the columns [`Kinematics::convert`] produces.
    fn variable_names(&self) -> Vec<String>;
}

/// Static properties of a particle species.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub name: String,
    pub pid: i32,
    pub mass: f64,
    #[serde(default)]
    pub width: f64,
    /// Twice the spin of the particle.
    #[serde(default)]
    pub spin2: i32,
}

impl Particle {
    pub fn new<T: AsRef<str>>(name: T, pid: i32, mass: f64) -> Self {
        Self {
            name: name.as_ref().to_string(),
            pid,
            mass,
            width: 0.0,
            spin2: 0,
        }
    }
    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }
    pub fn with_spin2(mut self, spin2: i32) -> Self {
        self.spin2 = spin2;
        self
    }
}

/// A registry of [`Particle`]s, searchable by name and by particle ID.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Particle>", into = "Vec<Particle>")]
pub struct ParticleList {
    particles: IndexMap<String, Particle>,
}

impl From<Vec<Particle>> for ParticleList {
    fn from(value: Vec<Particle>) -> Self {
        value.into_iter().collect()
    }
}

impl From<ParticleList> for Vec<Particle> {
    fn from(value: ParticleList) -> Self {
        value.particles.into_values().collect()
    }
}

impl FromIterator<Particle> for ParticleList {
    fn from_iter<I: IntoIterator<Item = Particle>>(iter: I) -> Self {
        Self {
            particles: iter
                .into_iter()
                .map(|particle| (particle.name.clone(), particle))
                .collect(),
        }
    }
}

impl ParticleList {
    /// Add a particle, replacing any existing particle with the same name.
    pub fn insert(&mut self, particle: Particle) {
        self.particles.insert(particle.name.clone(), particle);
    }
    pub fn get<T: AsRef<str>>(&self, name: T) -> Option<&Particle> {
        self.particles.get(name.as_ref())
    }
    pub fn find_pid(&self, pid: i32) -> Option<&Particle> {
        self.particles.values().find(|particle| particle.pid == pid)
    }
    /// Convert a particle name to its ID.
    pub fn name_to_pid<T: AsRef<str>>(&self, name: T) -> ArborResult<i32> {
        self.get(name.as_ref())
            .map(|particle| particle.pid)
            .ok_or_else(|| {
                ArborError::configuration(format!("unknown particle \"{}\"", name.as_ref()))
            })
    }
    /// Convert a particle ID to its name.
    pub fn pid_to_name(&self, pid: i32) -> ArborResult<String> {
        self.find_pid(pid)
            .map(|particle| particle.name.clone())
            .ok_or_else(|| ArborError::configuration(format!("unknown particle ID {}", pid)))
    }
    /// The mass of the particle with the given ID.
    pub fn mass(&self, pid: i32) -> ArborResult<f64> {
        self.find_pid(pid)
            .map(|particle| particle.mass)
            .ok_or_else(|| ArborError::configuration(format!("unknown particle ID {}", pid)))
    }
    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.values()
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// A two-body decay chain within the final state: the system of `final_state_a` and
/// `final_state_b` recoiling against `recoil`. Entries are positions within the final state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubSystem {
    pub final_state_a: Vec<usize>,
    pub final_state_b: Vec<usize>,
    pub recoil: Vec<usize>,
}

fn label(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("+")
}

impl SubSystem {
    pub fn new(final_state_a: Vec<usize>, final_state_b: Vec<usize>, recoil: Vec<usize>) -> Self {
        Self {
            final_state_a,
            final_state_b,
            recoil,
        }
    }
    /// The name of the invariant-mass-squared column, `mSq_(a,b)`.
    pub fn m_sq_name(&self) -> String {
        format!(
            "mSq_({},{})",
            label(&self.final_state_a),
            label(&self.final_state_b)
        )
    }
    /// The name of the helicity-angle column, `theta_(a,b)_vs_(r)`.
    pub fn theta_name(&self) -> String {
        format!(
            "theta_({},{})_vs_({})",
            label(&self.final_state_a),
            label(&self.final_state_b),
            label(&self.recoil)
        )
    }
    /// The name of the azimuthal-angle column, `phi_(a,b)_vs_(r)`.
    pub fn phi_name(&self) -> String {
        format!(
            "phi_({},{})_vs_({})",
            label(&self.final_state_a),
            label(&self.final_state_b),
            label(&self.recoil)
        )
    }
    pub fn variable_names(&self) -> [String; 3] {
        [self.m_sq_name(), self.theta_name(), self.phi_name()]
    }

    /// Compute `(m², θ, φ)` for one event whose four-momenta are given in the overall rest
    /// frame.
    ///
    /// θ and φ are the angles of system `a` in the rest frame of `a + b`, with the z-axis along
    /// the flight direction of `a + b` and the y-axis normal to the plane it spans with the beam
    /// (global z) axis. Without a recoil the global axes are used.
    fn compute(&self, p4s: &[Vec4]) -> (f64, f64, f64) {
        let p_a = Vec4::sum(self.final_state_a.iter().map(|i| &p4s[*i]));
        let p_b = Vec4::sum(self.final_state_b.iter().map(|i| &p4s[*i]));
        let p_ab = p_a + p_b;
        let beam = Vec3::new(0.0, 0.0, 1.0);
        let z = if self.recoil.is_empty() || p_ab.vec3().mag2() == 0.0 {
            beam
        } else {
            p_ab.vec3().unit()
        };
        let y = beam.cross(&z);
        let y = if y.mag2() == 0.0 {
            Vec3::new(0.0, 1.0, 0.0)
        } else {
            y.unit()
        };
        let x = y.cross(&z);
        let p = p_a.boost(&(-p_ab.beta())).vec3();
        let costheta = if p.mag() > 0.0 {
            (p.dot(&z) / p.mag()).clamp(-1.0, 1.0)
        } else {
            1.0
        };
        (p_ab.mag2(), costheta.acos(), p.dot(&y).atan2(p.dot(&x)))
    }
}

impl Display for SubSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({},{})_vs_({})",
            label(&self.final_state_a),
            label(&self.final_state_b),
            label(&self.recoil)
        )
    }
}

/// [`Kinematics`] in the helicity formalism: every registered [`SubSystem`] contributes its
/// invariant mass squared and the two helicity angles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HelicityKinematics {
    initial_state: Vec<i32>,
    final_state: Vec<i32>,
    final_state_masses: Vec<f64>,
    initial_state_p4: Option<Vec4>,
    initial_state_mass: f64,
    phsp_volume: Option<f64>,
    subsystems: Vec<SubSystem>,
}

impl HelicityKinematics {
    /// Create kinematics for the reaction `initial_state -> final_state`.
    ///
    /// If no initial four-momentum is given, the initial state is taken to be at rest with the
    /// sum of the masses of its particles.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::ConfigurationError`] if any particle ID is missing from
    /// `particles` or if the final state has fewer than two particles.
    pub fn new(
        particles: &ParticleList,
        initial_state: Vec<i32>,
        final_state: Vec<i32>,
        initial_state_p4: Option<Vec4>,
    ) -> ArborResult<Self> {
        if final_state.len() < 2 {
            return Err(ArborError::configuration(
                "the final state must contain at least two particles",
            ));
        }
        let final_state_masses = final_state
            .iter()
            .map(|pid| particles.mass(*pid))
            .collect::<ArborResult<Vec<_>>>()?;
        let initial_masses = initial_state
            .iter()
            .map(|pid| particles.mass(*pid))
            .collect::<ArborResult<Vec<_>>>()?;
        let initial_state_mass = match initial_state_p4 {
            Some(p4) => p4.mag(),
            None => initial_masses.iter().sum(),
        };
        if initial_state_mass < final_state_masses.iter().sum::<f64>() {
            return Err(ArborError::configuration(format!(
                "an initial state of mass {} cannot decay into a final state of total mass {}",
                initial_state_mass,
                final_state_masses.iter().sum::<f64>()
            )));
        }
        Ok(Self {
            initial_state,
            final_state,
            final_state_masses,
            initial_state_p4,
            initial_state_mass,
            phsp_volume: None,
            subsystems: Vec::new(),
        })
    }
    /// Override the phase-space volume.
    pub fn with_phsp_volume(mut self, volume: f64) -> Self {
        self.phsp_volume = Some(volume);
        self
    }
    pub fn initial_state_pids(&self) -> &[i32] {
        &self.initial_state
    }
    pub fn initial_state_p4(&self) -> Option<Vec4> {
        self.initial_state_p4
    }
    pub fn final_state_masses(&self) -> &[f64] {
        &self.final_state_masses
    }
    pub fn subsystems(&self) -> &[SubSystem] {
        &self.subsystems
    }
    /// The position of a particle ID within the final state.
    pub fn final_state_index(&self, pid: i32) -> ArborResult<usize> {
        self.final_state
            .iter()
            .position(|p| *p == pid)
            .ok_or_else(|| {
                ArborError::configuration(format!("particle ID {} is not in the final state", pid))
            })
    }
    /// Register a subsystem and return the names of its three variables.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::ConfigurationError`] if either decay product is empty or if any
    /// position is out of range or used twice.
    pub fn create_subsystem(&mut self, subsystem: SubSystem) -> ArborResult<[String; 3]> {
        if subsystem.final_state_a.is_empty() || subsystem.final_state_b.is_empty() {
            return Err(ArborError::configuration(format!(
                "subsystem {} has an empty decay product",
                subsystem
            )));
        }
        let mut used = vec![false; self.final_state.len()];
        for index in subsystem
            .final_state_a
            .iter()
            .chain(&subsystem.final_state_b)
            .chain(&subsystem.recoil)
        {
            match used.get_mut(*index) {
                Some(seen) if !*seen => *seen = true,
                _ => {
                    return Err(ArborError::configuration(format!(
                        "subsystem {} uses final-state position {} more than once or out of range",
                        subsystem, index
                    )))
                }
            }
        }
        let names = subsystem.variable_names();
        if !self.subsystems.contains(&subsystem) {
            log::debug!("registered subsystem {}", subsystem);
            self.subsystems.push(subsystem);
        }
        Ok(names)
    }
    /// Register every two-particle subsystem, with all remaining particles as the recoil.
    pub fn create_all_subsystems(&mut self) -> ArborResult<Vec<String>> {
        let n = self.final_state.len();
        let mut names = Vec::new();
        for a in 0..n {
            for b in (a + 1)..n {
                let recoil = (0..n).filter(|i| *i != a && *i != b).collect();
                names.extend(self.create_subsystem(SubSystem::new(vec![a], vec![b], recoil))?);
            }
        }
        Ok(names)
    }

    fn dalitz_area(&self) -> f64 {
        let big_m = self.initial_state_mass;
        let (m1, m2, m3) = (
            self.final_state_masses[0],
            self.final_state_masses[1],
            self.final_state_masses[2],
        );
        // sqrt(λ(s, m1², m2²) λ(M², s, m3²)) / s, with the massless-pair limit at s = 0
        let width = |s: f64| {
            let outer = kallen(big_m.powi(2), s, m3.powi(2)).max(0.0).sqrt();
            if s <= 0.0 {
                return outer;
            }
            kallen(s, m1.powi(2), m2.powi(2)).max(0.0).sqrt() * outer / s
        };
        simpson(width, (m1 + m2).powi(2), (big_m - m3).powi(2), 1000)
    }
}

impl Kinematics for HelicityKinematics {
    fn convert(&self, events: &EventCollection) -> ArborResult<DataSet> {
        events.check_pid_matches_events()?;
        if events.pids != self.final_state {
            return Err(ArborError::corrupt(format!(
                "events have particle IDs {:?} but the kinematics expect {:?}",
                events.pids, self.final_state
            )));
        }
        let boost = match self.initial_state_p4 {
            Some(p4) => -p4.beta(),
            None => Vec3::new(0.0, 0.0, 0.0),
        };
        let mut columns = IndexMap::with_capacity(3 * self.subsystems.len());
        for subsystem in &self.subsystems {
            let values = tabulate(events.len(), |i| {
                let p4s: Vec<Vec4> = events.events[i]
                    .four_momenta
                    .iter()
                    .map(|p4| p4.boost(&boost))
                    .collect();
                subsystem.compute(&p4s)
            });
            let [m_sq, theta, phi] = subsystem.variable_names();
            columns.insert(m_sq, values.iter().map(|v| v.0).collect());
            columns.insert(theta, values.iter().map(|v| v.1).collect());
            columns.insert(phi, values.iter().map(|v| v.2).collect());
        }
        DataSet::new(columns, events.weights())
    }

    fn phsp_volume(&self) -> f64 {
        if let Some(volume) = self.phsp_volume {
            return volume;
        }
        if self.final_state.len() == 3 {
            return self.dalitz_area();
        }
        log::warn!(
            "no phase-space volume is known for a {}-body final state, using 1.0",
            self.final_state.len()
        );
        1.0
    }

    fn final_state_pids(&self) -> &[i32] {
        &self.final_state
    }

    fn initial_state_mass(&self) -> f64 {
        self.initial_state_mass
    }

    fn variable_names(&self) -> Vec<String> {
        self.subsystems
            .iter()
            .flat_map(|subsystem| subsystem.variable_names())
            .collect()
    }
}
