use rand::Rng;

use super::{DataSet, Event, EventCollection};
use crate::{
    intensity::Intensity,
    kinematics::{HelicityKinematics, Kinematics},
    tree::value::sum_real,
    utils::{
        functions::breakup_momentum,
        vectors::{Vec3, Vec4},
    },
    ArborError, ArborResult,
};

/// The number of phase-space events generated per batch while hit-and-miss sampling.
const GENERATION_BATCH: usize = 1000;
/// Safety factor applied to the largest intensity value seen while hit-and-miss sampling.
const MAXIMUM_SAFETY_FACTOR: f64 = 1.05;

/// An n-body phase-space event generator using the Raubold-Lynch (GENBOD) method.
///
/// Events are produced in the rest frame of the initial state and then boosted into the frame of
/// the initial four-momentum, if one was given. Each call to [`PhaseSpaceGenerator::generate`]
/// produces an unweighted event through an internal accept-reject step on the GENBOD weight.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseSpaceGenerator {
    initial_state_mass: f64,
    initial_state_p4: Option<Vec4>,
    masses: Vec<f64>,
    pids: Vec<i32>,
    max_weight: f64,
}

impl PhaseSpaceGenerator {
    /// Create a generator for the decay of a system of mass `initial_state_mass` into particles
    /// with the given masses and IDs.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::ConfigurationError`] if there are fewer than two final-state
    /// particles, if the masses and IDs disagree in length, or if the decay is kinematically
    /// forbidden.
    pub fn new(initial_state_mass: f64, masses: Vec<f64>, pids: Vec<i32>) -> ArborResult<Self> {
        if masses.len() < 2 || masses.len() != pids.len() {
            return Err(ArborError::configuration(format!(
                "cannot generate phase space for {} masses and {} particle IDs",
                masses.len(),
                pids.len()
            )));
        }
        let kinetic = initial_state_mass - masses.iter().sum::<f64>();
        if kinetic <= 0.0 {
            return Err(ArborError::configuration(format!(
                "a system of mass {} cannot decay into particles of total mass {}",
                initial_state_mass,
                masses.iter().sum::<f64>()
            )));
        }
        let mut emmax = kinetic + masses[0];
        let mut emmin = 0.0;
        let mut max_weight = 1.0;
        for n in 1..masses.len() {
            emmin += masses[n - 1];
            emmax += masses[n];
            max_weight *= breakup_momentum(emmax, emmin, masses[n]);
        }
        Ok(Self {
            initial_state_mass,
            initial_state_p4: None,
            masses,
            pids,
            max_weight,
        })
    }

    /// A generator matching the reaction described by a [`HelicityKinematics`].
    pub fn from_kinematics(kinematics: &HelicityKinematics) -> ArborResult<Self> {
        let mut generator = Self::new(
            kinematics.initial_state_mass(),
            kinematics.final_state_masses().to_vec(),
            kinematics.final_state_pids().to_vec(),
        )?;
        generator.initial_state_p4 = kinematics.initial_state_p4();
        Ok(generator)
    }

    pub fn pids(&self) -> &[i32] {
        &self.pids
    }

    /// Generate one weighted event and its GENBOD weight relative to the maximum weight.
    fn generate_weighted<R: Rng>(&self, rng: &mut R) -> (Vec<Vec4>, f64) {
        let n = self.masses.len();
        let kinetic = self.initial_state_mass - self.masses.iter().sum::<f64>();
        let mut rno = vec![0.0; n];
        rno[n - 1] = 1.0;
        if n > 2 {
            for r in rno.iter_mut().take(n - 1).skip(1) {
                *r = rng.gen::<f64>();
            }
            rno[1..n - 1].sort_by(f64::total_cmp);
        }
        let mut sum = 0.0;
        let inv_mass: Vec<f64> = self
            .masses
            .iter()
            .zip(&rno)
            .map(|(m, r)| {
                sum += m;
                r * kinetic + sum
            })
            .collect();
        let pd: Vec<f64> = (0..n - 1)
            .map(|i| breakup_momentum(inv_mass[i + 1], inv_mass[i], self.masses[i + 1]))
            .collect();
        let weight = pd.iter().product::<f64>() / self.max_weight;

        let mut p4s = Vec::with_capacity(n);
        p4s.push(Vec3::new(0.0, pd[0], 0.0).with_mass(self.masses[0]));
        p4s.push(Vec3::new(0.0, -pd[0], 0.0).with_mass(self.masses[1]));
        let mut i = 1;
        loop {
            let cos_z = 2.0 * rng.gen::<f64>() - 1.0;
            let sin_z = (1.0 - cos_z * cos_z).sqrt();
            let (sin_y, cos_y) = (2.0 * std::f64::consts::PI * rng.gen::<f64>()).sin_cos();
            for p4 in p4s.iter_mut() {
                let (x, y) = (p4.px, p4.py);
                p4.px = cos_z * x - sin_z * y;
                p4.py = sin_z * x + cos_z * y;
                let (x, z) = (p4.px, p4.pz);
                p4.px = cos_y * x - sin_y * z;
                p4.pz = sin_y * x + cos_y * z;
            }
            if i == n - 1 {
                break;
            }
            let beta = pd[i] / (pd[i] * pd[i] + inv_mass[i] * inv_mass[i]).sqrt();
            let boost = Vec3::new(0.0, beta, 0.0);
            for p4 in p4s.iter_mut() {
                *p4 = p4.boost(&boost);
            }
            i += 1;
            p4s.push(Vec3::new(0.0, -pd[i - 1], 0.0).with_mass(self.masses[i]));
        }
        if let Some(initial) = self.initial_state_p4 {
            let boost = initial.beta();
            for p4 in p4s.iter_mut() {
                *p4 = p4.boost(&boost);
            }
        }
        (p4s, weight)
    }

    /// Generate one unweighted phase-space event.
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Event {
        loop {
            let (p4s, weight) = self.generate_weighted(rng);
            if rng.gen::<f64>() < weight {
                return Event::new(p4s, 1.0);
            }
        }
    }

    /// Generate `n` unweighted phase-space events.
    pub fn generate_events<R: Rng>(&self, n: usize, rng: &mut R) -> EventCollection {
        EventCollection::new(
            self.pids.clone(),
            (0..n).map(|_| self.generate(rng)).collect(),
        )
    }
}

/// Generate `n` unweighted phase-space events.
pub fn generate_phsp<R: Rng>(
    n: usize,
    generator: &PhaseSpaceGenerator,
    rng: &mut R,
) -> EventCollection {
    let events = generator.generate_events(n, rng);
    log::debug!("generated {} phase-space events", events.len());
    events
}

fn max_value(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

/// Generate `n` events distributed according to `intensity` by hit-and-miss sampling of
/// freshly generated phase-space events.
///
/// The maximum of the intensity is estimated from the generated events. Whenever a larger value
/// is found, all events accepted so far are discarded and sampling restarts with the new
/// maximum, so the result is never biased by an underestimated maximum.
///
/// # Errors
///
/// Returns an error if the kinematic conversion or the evaluation fails, or
/// [`ArborError::Custom`] if the intensity is not positive anywhere in the first batch.
pub fn generate<R: Rng>(
    n: usize,
    kinematics: &dyn Kinematics,
    generator: &PhaseSpaceGenerator,
    intensity: &mut Intensity,
    rng: &mut R,
) -> ArborResult<EventCollection> {
    let mut accepted: Vec<Event> = Vec::with_capacity(n);
    let mut maximum = 0.0;
    while accepted.len() < n {
        let batch = generator.generate_events(GENERATION_BATCH, rng);
        let values = intensity.evaluate(&kinematics.convert(&batch)?)?;
        let batch_max = max_value(&values);
        if batch_max > maximum {
            if !accepted.is_empty() {
                log::warn!(
                    "intensity maximum increased from {} to {}, restarting generation",
                    maximum,
                    batch_max * MAXIMUM_SAFETY_FACTOR
                );
                accepted.clear();
            }
            maximum = batch_max * MAXIMUM_SAFETY_FACTOR;
        }
        if maximum <= 0.0 {
            return Err(ArborError::Custom(
                "the intensity is not positive anywhere in phase space".to_string(),
            ));
        }
        for (event, value) in batch.events.into_iter().zip(values) {
            if accepted.len() == n {
                break;
            }
            if rng.gen::<f64>() * maximum < value {
                accepted.push(event);
            }
        }
    }
    log::debug!("generated {} events by hit-and-miss", accepted.len());
    Ok(EventCollection::new(generator.pids.clone(), accepted))
}

/// Select up to `n` events from an existing phase-space sample by hit-and-miss on `intensity`.
///
/// If the phase-space sample includes detector effects, the intensity is evaluated on the
/// matching true (toy) sample instead, which must hold the same number of events.
pub fn generate_from_sample<R: Rng>(
    n: usize,
    kinematics: &dyn Kinematics,
    intensity: &mut Intensity,
    phsp_sample: &EventCollection,
    toy_phsp_sample: Option<&EventCollection>,
    rng: &mut R,
) -> ArborResult<EventCollection> {
    let truth = toy_phsp_sample.unwrap_or(phsp_sample);
    if truth.len() != phsp_sample.len() {
        return Err(ArborError::corrupt(format!(
            "the toy sample has {} events but the phase-space sample has {}",
            truth.len(),
            phsp_sample.len()
        )));
    }
    let dataset = kinematics.convert(truth)?;
    let values: Vec<f64> = intensity
        .evaluate(&dataset)?
        .into_iter()
        .zip(dataset.weights())
        .map(|(value, weight)| value * weight)
        .collect();
    let maximum = max_value(&values);
    let mut accepted = Vec::with_capacity(n);
    for (event, value) in phsp_sample.events.iter().zip(values) {
        if accepted.len() == n {
            break;
        }
        if rng.gen::<f64>() * maximum < value {
            accepted.push(Event::new(event.four_momenta.clone(), 1.0));
        }
    }
    if accepted.len() < n {
        log::warn!(
            "the phase-space sample only yielded {} of {} requested events",
            accepted.len(),
            n
        );
    }
    Ok(EventCollection::new(phsp_sample.pids.clone(), accepted))
}

/// Generate `n` phase-space events weighted by `intensity`. The weights are scaled so that they
/// sum to `n`.
pub fn generate_importance_sampled_phsp<R: Rng>(
    n: usize,
    kinematics: &dyn Kinematics,
    generator: &PhaseSpaceGenerator,
    intensity: &mut Intensity,
    rng: &mut R,
) -> ArborResult<EventCollection> {
    let mut events = generator.generate_events(n, rng);
    let values = intensity.evaluate(&kinematics.convert(&events)?)?;
    let total = sum_real(&values);
    if total <= 0.0 {
        return Err(ArborError::Custom(
            "the intensity integrates to zero over the phase-space sample".to_string(),
        ));
    }
    let scale = n as f64 / total;
    for (event, value) in events.events.iter_mut().zip(values) {
        event.weight = value * scale;
    }
    Ok(events)
}

/// Multiply the weights of a [`DataSet`] by the value of `intensity` for each event.
pub fn add_intensity_weights(intensity: &mut Intensity, dataset: &DataSet) -> ArborResult<DataSet> {
    let values = intensity.evaluate(dataset)?;
    dataset.with_weights(
        dataset
            .weights()
            .iter()
            .zip(values)
            .map(|(w, v)| w * v)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expression::{parameter, variable},
        kinematics::{Particle, ParticleList, SubSystem},
    };
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn kinematics() -> HelicityKinematics {
        let particles: ParticleList = [
            Particle::new("J/psi", 443, 3.0969),
            Particle::new("gamma", 22, 0.0),
            Particle::new("pi0", 111, 0.1349766),
        ]
        .into_iter()
        .collect();
        let mut kinematics =
            HelicityKinematics::new(&particles, vec![443], vec![22, 111, 111], None).unwrap();
        kinematics.create_all_subsystems().unwrap();
        kinematics
    }

    #[test]
    fn test_phsp_events_conserve_momentum() {
        let kinematics = kinematics();
        let generator = PhaseSpaceGenerator::from_kinematics(&kinematics).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let events = generate_phsp(50, &generator, &mut rng);
        assert_eq!(events.len(), 50);
        for event in &events.events {
            let total = event.get_p4_sum([0, 1, 2]);
            assert_relative_eq!(total.px, 0.0, epsilon = 1e-10);
            assert_relative_eq!(total.py, 0.0, epsilon = 1e-10);
            assert_relative_eq!(total.pz, 0.0, epsilon = 1e-10);
            assert_relative_eq!(total.e, 3.0969, epsilon = 1e-10);
            assert_relative_eq!(event.four_momenta[1].mag(), 0.1349766, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_generation_is_reproducible() {
        let generator = PhaseSpaceGenerator::from_kinematics(&kinematics()).unwrap();
        let a = generate_phsp(5, &generator, &mut ChaCha8Rng::seed_from_u64(7));
        let b = generate_phsp(5, &generator, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_forbidden_decay() {
        assert!(PhaseSpaceGenerator::new(0.2, vec![0.14, 0.14], vec![211, -211]).is_err());
        assert!(PhaseSpaceGenerator::new(1.0, vec![0.14], vec![211]).is_err());
    }

    #[test]
    fn test_hit_and_miss_generation() {
        let kinematics = kinematics();
        let generator = PhaseSpaceGenerator::from_kinematics(&kinematics).unwrap();
        let model = parameter("a", 1.0) * variable("mSq_(1,2)");
        let mut intensity = Intensity::from_expression(&model).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let events = generate(200, &kinematics, &generator, &mut intensity, &mut rng).unwrap();
        assert_eq!(events.len(), 200);
        assert!(!events.has_weights());

        let phsp = generate_phsp(200, &generator, &mut rng);
        let mean_generated = kinematics
            .convert(&events)
            .unwrap()
            .column("mSq_(1,2)")
            .unwrap()
            .iter()
            .sum::<f64>()
            / 200.0;
        let mean_phsp = kinematics
            .convert(&phsp)
            .unwrap()
            .column("mSq_(1,2)")
            .unwrap()
            .iter()
            .sum::<f64>()
            / 200.0;
        assert!(mean_generated > mean_phsp);
    }

    #[test]
    fn test_importance_sampling_and_weights() {
        let kinematics = kinematics();
        let generator = PhaseSpaceGenerator::from_kinematics(&kinematics).unwrap();
        let model = variable("mSq_(0,1)");
        let mut intensity = Intensity::from_expression(&model).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let events =
            generate_importance_sampled_phsp(100, &kinematics, &generator, &mut intensity, &mut rng)
                .unwrap();
        assert_relative_eq!(events.weights().iter().sum::<f64>(), 100.0, epsilon = 1e-9);

        let dataset = kinematics.convert(&events).unwrap();
        let weighted = add_intensity_weights(&mut intensity, &dataset).unwrap();
        let m_sq = dataset.column("mSq_(0,1)").unwrap();
        assert_relative_eq!(weighted.weights()[3], dataset.weights()[3] * m_sq[3]);
    }

    #[test]
    fn test_generation_from_sample() {
        let mut kinematics = kinematics();
        kinematics
            .create_subsystem(SubSystem::new(vec![0], vec![1, 2], vec![]))
            .unwrap();
        let generator = PhaseSpaceGenerator::from_kinematics(&kinematics).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let phsp = generate_phsp(300, &generator, &mut rng);
        let mut intensity = Intensity::from_expression(&variable("mSq_(0,2)")).unwrap();
        let events =
            generate_from_sample(50, &kinematics, &mut intensity, &phsp, None, &mut rng).unwrap();
        assert!(events.len() <= 50);
        assert!(!events.is_empty());
        let short = EventCollection::new(phsp.pids.clone(), phsp.events[..10].to_vec());
        assert!(
            generate_from_sample(5, &kinematics, &mut intensity, &phsp, Some(&short), &mut rng)
                .is_err()
        );
    }
}
