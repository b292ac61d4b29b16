use std::{collections::HashSet, fs::File, io::BufReader};

use serde::{Deserialize, Serialize};

use crate::{
    canonicalize_path,
    data::{DataSet, EventCollection},
    intensity::{normalization_integral, Intensity, IntensityComponent},
    kernels::{breit_wigner::BreitWigner, wigner::WignerD},
    kinematics::{HelicityKinematics, Kinematics, ParticleList, SubSystem},
    parameters::FitParameter,
    tree::{FunctionTree, NodeId, UnaryOp},
    utils::vectors::Vec4,
    ArborError, ArborResult,
};

/// A complete declarative model: particles, kinematics, and the intensity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub particles: ParticleList,
    pub kinematics: KinematicsDescription,
    pub intensity: IntensityDescription,
}

impl ModelConfig {
    /// Read a model from a JSON file. Shell variables and `~` in the path are expanded.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::ConfigurationError`] if the document is malformed or lacks one of
    /// the `particles`, `kinematics` or `intensity` sections.
    pub fn from_file<T: AsRef<str>>(file_path: T) -> ArborResult<Self> {
        let path = canonicalize_path(file_path.as_ref())?;
        let reader = BufReader::new(File::open(&path)?);
        serde_json::from_reader(reader).map_err(|err| {
            ArborError::configuration(format!("invalid model in {}: {}", path.display(), err))
        })
    }
    /// Parse a model from a JSON string.
    pub fn from_json<T: AsRef<str>>(json: T) -> ArborResult<Self> {
        serde_json::from_str(json.as_ref())
            .map_err(|err| ArborError::configuration(format!("invalid model: {}", err)))
    }
    /// Build the [`HelicityKinematics`] described by the `kinematics` section.
    pub fn create_kinematics(&self) -> ArborResult<HelicityKinematics> {
        let pids = |names: &[String]| {
            names
                .iter()
                .map(|name| self.particles.name_to_pid(name))
                .collect::<ArborResult<Vec<i32>>>()
        };
        let kinematics = HelicityKinematics::new(
            &self.particles,
            pids(&self.kinematics.initial_state)?,
            pids(&self.kinematics.final_state)?,
            self.kinematics.initial_state_p4,
        )?;
        Ok(match self.kinematics.phsp_volume {
            Some(volume) => kinematics.with_phsp_volume(volume),
            None => kinematics,
        })
    }
}

/// The reaction whose final state the model describes, by particle name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KinematicsDescription {
    pub initial_state: Vec<String>,
    pub final_state: Vec<String>,
    #[serde(default)]
    pub initial_state_p4: Option<Vec4>,
    #[serde(default)]
    pub phsp_volume: Option<f64>,
}

/// A fit parameter as it appears in a model description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescription {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub error: f64,
    #[serde(default)]
    pub fixed: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ParameterDescription {
    pub fn new<T: AsRef<str>>(name: T, value: f64) -> Self {
        Self {
            name: name.as_ref().to_string(),
            value,
            error: 0.0,
            fixed: false,
            min: None,
            max: None,
        }
    }
    fn to_parameter(&self) -> FitParameter {
        let mut parameter = FitParameter::new(&self.name, self.value)
            .with_error(self.error)
            .with_bounds(self.min, self.max);
        parameter.is_fixed = self.fixed;
        parameter
    }
}

/// A real-valued, per-event model term.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntensityDescription {
    /// The inner intensity divided by its integral over the phase-space sample.
    Normalized { intensity: Box<IntensityDescription> },
    /// The sum of several intensities.
    Incoherent {
        name: String,
        intensities: Vec<IntensityDescription>,
    },
    /// The squared magnitude of the sum of several amplitudes.
    Coherent {
        name: String,
        amplitudes: Vec<AmplitudeDescription>,
    },
    /// An intensity scaled by a real parameter.
    Strength {
        name: String,
        strength: ParameterDescription,
        intensity: Box<IntensityDescription>,
    },
}

/// A complex-valued, per-event model term.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AmplitudeDescription {
    /// An amplitude multiplied by the complex coefficient `magnitude · e^{i phase}`.
    Coefficient {
        magnitude: ParameterDescription,
        phase: ParameterDescription,
        amplitude: Box<AmplitudeDescription>,
    },
    /// The product of several amplitudes, such as the steps of a decay chain.
    Sequential {
        name: String,
        amplitudes: Vec<AmplitudeDescription>,
    },
    /// A two-body decay in the helicity formalism: a Wigner-D angular term times the dynamics.
    ///
    /// Spin projections are given as twice their physical values, like [`WignerD`]. The decay
    /// products are positions within the final state.
    HelicityDecay {
        name: String,
        resonance: String,
        #[serde(default)]
        helicity2: i32,
        #[serde(default)]
        daughter_helicities2: [i32; 2],
        final_state_a: Vec<usize>,
        final_state_b: Vec<usize>,
        #[serde(default)]
        recoil: Vec<usize>,
        dynamics: DynamicsDescription,
    },
}

/// The mass dependence of a [`AmplitudeDescription::HelicityDecay`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DynamicsDescription {
    NonResonant,
    /// A relativistic Breit-Wigner. Without explicit parameters, the mass and width of the
    /// resonance are taken from the particle list as fixed parameters named `{resonance}_mass`
    /// and `{resonance}_width`.
    RelativisticBreitWigner {
        l: usize,
        #[serde(default)]
        mass: Option<ParameterDescription>,
        #[serde(default)]
        width: Option<ParameterDescription>,
    },
}

impl IntensityDescription {
    fn name(&self) -> Option<&str> {
        match self {
            Self::Normalized { .. } => None,
            Self::Incoherent { name, .. }
            | Self::Coherent { name, .. }
            | Self::Strength { name, .. } => Some(name.as_str()),
        }
    }
    fn collect_names(&self, names: &mut Vec<String>) {
        if let Some(name) = self.name() {
            names.push(name.to_string());
        }
        match self {
            Self::Normalized { intensity } | Self::Strength { intensity, .. } => {
                intensity.collect_names(names)
            }
            Self::Incoherent { intensities, .. } => {
                intensities.iter().for_each(|i| i.collect_names(names))
            }
            Self::Coherent { amplitudes, .. } => {
                amplitudes.iter().for_each(|a| a.collect_names(names))
            }
        }
    }
    /// The part of the description selected by `names`, keeping normalizations intact.
    fn prune(&self, names: &HashSet<&str>) -> Option<IntensityDescription> {
        if self.name().is_some_and(|name| names.contains(name)) {
            return Some(self.clone());
        }
        match self {
            Self::Normalized { intensity } => intensity.prune(names).map(|intensity| {
                Self::Normalized {
                    intensity: Box::new(intensity),
                }
            }),
            Self::Incoherent { name, intensities } => {
                let kept: Vec<IntensityDescription> =
                    intensities.iter().filter_map(|i| i.prune(names)).collect();
                (!kept.is_empty()).then(|| Self::Incoherent {
                    name: name.clone(),
                    intensities: kept,
                })
            }
            Self::Coherent { name, amplitudes } => {
                let kept: Vec<AmplitudeDescription> = amplitudes
                    .iter()
                    .filter(|a| a.mentions(names))
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| Self::Coherent {
                    name: name.clone(),
                    amplitudes: kept,
                })
            }
            Self::Strength {
                name,
                strength,
                intensity,
            } => intensity.prune(names).map(|intensity| Self::Strength {
                name: name.clone(),
                strength: strength.clone(),
                intensity: Box::new(intensity),
            }),
        }
    }
}

impl AmplitudeDescription {
    fn collect_names(&self, names: &mut Vec<String>) {
        match self {
            Self::Coefficient { amplitude, .. } => amplitude.collect_names(names),
            Self::Sequential { name, amplitudes } => {
                names.push(name.clone());
                amplitudes.iter().for_each(|a| a.collect_names(names));
            }
            Self::HelicityDecay { name, .. } => names.push(name.clone()),
        }
    }
    fn mentions(&self, names: &HashSet<&str>) -> bool {
        let mut own = Vec::new();
        self.collect_names(&mut own);
        own.iter().any(|name| names.contains(name.as_str()))
    }
}

/// Turns an [`IntensityDescription`] into [`Intensity`]s.
///
/// Building registers every subsystem the amplitudes use with the kinematics, so the
/// kinematics must be used to convert data only after the intensity is built. Normalizations
/// are computed over the phase-space sample given here.
pub struct IntensityBuilder<'a> {
    particles: &'a ParticleList,
    kinematics: &'a mut HelicityKinematics,
    description: IntensityDescription,
    phsp_sample: &'a EventCollection,
}

impl<'a> IntensityBuilder<'a> {
    pub fn new(
        particles: &'a ParticleList,
        kinematics: &'a mut HelicityKinematics,
        description: IntensityDescription,
        phsp_sample: &'a EventCollection,
    ) -> Self {
        Self {
            particles,
            kinematics,
            description,
            phsp_sample,
        }
    }

    /// Build the full intensity.
    pub fn create_intensity(&mut self) -> ArborResult<Intensity> {
        let description = self.description.clone();
        let mut tree = FunctionTree::new();
        let head = self.build_intensity(&mut tree, &description)?;
        tree.set_head(head)?;
        log::debug!("built an intensity of {} nodes", tree.len());
        Intensity::new(tree)
    }

    /// Build one [`IntensityComponent`] for each list of names, keeping only the named parts of
    /// the model. Normalizations always use the integral of the full model, so components can
    /// be compared with each other and with the full intensity.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::ConfigurationError`] if a name is not part of the model or a list
    /// selects nothing.
    pub fn create_intensity_components(
        &mut self,
        component_names: &[Vec<String>],
    ) -> ArborResult<Vec<IntensityComponent>> {
        let known = self.all_component_names();
        let description = self.description.clone();
        component_names
            .iter()
            .map(|names| {
                let unknown: Vec<&String> =
                    names.iter().filter(|name| !known.contains(name)).collect();
                if !unknown.is_empty() {
                    return Err(ArborError::configuration(format!(
                        "unknown component name(s) {:?}",
                        unknown
                    )));
                }
                let selected: HashSet<&str> = names.iter().map(|name| name.as_str()).collect();
                let mut tree = FunctionTree::new();
                let head = self.build_component(&mut tree, &description, &selected)?;
                tree.set_head(head)?;
                Ok(IntensityComponent::new(names.join("+"), Intensity::new(tree)?))
            })
            .collect()
    }

    /// The names of every named intensity and amplitude in the model, in order of appearance.
    pub fn all_component_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.description.collect_names(&mut names);
        let mut seen = HashSet::new();
        names.retain(|name| seen.insert(name.clone()));
        names
    }

    fn phsp_dataset(&self) -> ArborResult<DataSet> {
        self.kinematics.convert(self.phsp_sample)
    }

    /// Build the parts of `description` selected by `names`, dividing by full normalizations.
    fn build_component(
        &mut self,
        tree: &mut FunctionTree,
        description: &IntensityDescription,
        names: &HashSet<&str>,
    ) -> ArborResult<NodeId> {
        if description.name().is_some_and(|name| names.contains(name)) {
            return self.build_intensity(tree, description);
        }
        match description {
            IntensityDescription::Normalized { intensity } => {
                let full = self.build_batch(tree, intensity)?;
                let part = self.build_component(tree, intensity, names)?;
                let norm = self.normalization(tree, full)?;
                tree.div(part, norm)
            }
            IntensityDescription::Strength {
                strength,
                intensity,
                ..
            } => {
                let strength = tree.parameter(strength.to_parameter())?;
                let part = self.build_component(tree, intensity, names)?;
                tree.mul(&[strength, part])
            }
            other => {
                let pruned = other.prune(names).ok_or_else(|| {
                    ArborError::configuration(format!(
                        "the components {:?} select nothing from the model",
                        names
                    ))
                })?;
                self.build_intensity(tree, &pruned)
            }
        }
    }

    fn normalization(&mut self, tree: &mut FunctionTree, node: NodeId) -> ArborResult<NodeId> {
        let phsp = self.phsp_dataset()?;
        normalization_integral(tree, node, &phsp, self.kinematics.phsp_volume())
    }

    /// Build an intensity, broadcasting a scalar result so that it always yields a batch.
    fn build_batch(
        &mut self,
        tree: &mut FunctionTree,
        description: &IntensityDescription,
    ) -> ArborResult<NodeId> {
        let node = self.build_intensity(tree, description)?;
        if tree.value_type(node)?.is_scalar() {
            tree.broadcast(node)
        } else {
            Ok(node)
        }
    }

    fn build_intensity(
        &mut self,
        tree: &mut FunctionTree,
        description: &IntensityDescription,
    ) -> ArborResult<NodeId> {
        match description {
            IntensityDescription::Normalized { intensity } => {
                let inner = self.build_batch(tree, intensity)?;
                let norm = self.normalization(tree, inner)?;
                tree.div(inner, norm)
            }
            IntensityDescription::Incoherent { name, intensities } => {
                if intensities.is_empty() {
                    return Err(ArborError::configuration(format!(
                        "incoherent intensity \"{}\" has no intensities",
                        name
                    )));
                }
                let terms = intensities
                    .iter()
                    .map(|i| self.build_intensity(tree, i))
                    .collect::<ArborResult<Vec<NodeId>>>()?;
                tree.add(&terms)
            }
            IntensityDescription::Coherent { name, amplitudes } => {
                if amplitudes.is_empty() {
                    return Err(ArborError::configuration(format!(
                        "coherent intensity \"{}\" has no amplitudes",
                        name
                    )));
                }
                let terms = amplitudes
                    .iter()
                    .map(|a| self.build_amplitude(tree, a))
                    .collect::<ArborResult<Vec<NodeId>>>()?;
                let sum = tree.add(&terms)?;
                tree.unary(UnaryOp::NormSqr, sum)
            }
            IntensityDescription::Strength {
                strength,
                intensity,
                ..
            } => {
                let strength = tree.parameter(strength.to_parameter())?;
                let inner = self.build_intensity(tree, intensity)?;
                tree.mul(&[strength, inner])
            }
        }
    }

    fn build_amplitude(
        &mut self,
        tree: &mut FunctionTree,
        description: &AmplitudeDescription,
    ) -> ArborResult<NodeId> {
        match description {
            AmplitudeDescription::Coefficient {
                magnitude,
                phase,
                amplitude,
            } => {
                let magnitude = tree.parameter(magnitude.to_parameter())?;
                let phase = tree.parameter(phase.to_parameter())?;
                let coefficient = tree.polar(magnitude, phase)?;
                let amplitude = self.build_amplitude(tree, amplitude)?;
                tree.mul(&[coefficient, amplitude])
            }
            AmplitudeDescription::Sequential { name, amplitudes } => {
                if amplitudes.is_empty() {
                    return Err(ArborError::configuration(format!(
                        "sequential amplitude \"{}\" has no amplitudes",
                        name
                    )));
                }
                let factors = amplitudes
                    .iter()
                    .map(|a| self.build_amplitude(tree, a))
                    .collect::<ArborResult<Vec<NodeId>>>()?;
                tree.mul(&factors)
            }
            AmplitudeDescription::HelicityDecay {
                name,
                resonance,
                helicity2,
                daughter_helicities2,
                final_state_a,
                final_state_b,
                recoil,
                dynamics,
            } => {
                let particles = self.particles;
                let particle = particles.get(resonance).ok_or_else(|| {
                    ArborError::configuration(format!(
                        "decay \"{}\" refers to unknown particle \"{}\"",
                        name, resonance
                    ))
                })?;
                let n2 = daughter_helicities2[0] - daughter_helicities2[1];
                if helicity2.abs() > particle.spin2 || n2.abs() > particle.spin2 {
                    return Err(ArborError::configuration(format!(
                        "decay \"{}\" has helicities ({}/2, {}/2) which exceed the spin {}/2 of \"{}\"",
                        name, helicity2, n2, particle.spin2, resonance
                    )));
                }
                let [m_sq, theta, phi] = self.kinematics.create_subsystem(SubSystem::new(
                    final_state_a.clone(),
                    final_state_b.clone(),
                    recoil.clone(),
                ))?;
                let theta = tree.variable(theta)?;
                let phi = tree.variable(phi)?;
                let angular = tree.kernel(
                    WignerD::new(particle.spin2, *helicity2, n2),
                    &[theta, phi],
                )?;
                match dynamics {
                    DynamicsDescription::NonResonant => Ok(angular),
                    DynamicsDescription::RelativisticBreitWigner { l, mass, width } => {
                        let mass = mass.clone().unwrap_or_else(|| ParameterDescription {
                            fixed: true,
                            ..ParameterDescription::new(format!("{}_mass", resonance), particle.mass)
                        });
                        let width = width.clone().unwrap_or_else(|| ParameterDescription {
                            fixed: true,
                            ..ParameterDescription::new(
                                format!("{}_width", resonance),
                                particle.width,
                            )
                        });
                        let masses = self.kinematics.final_state_masses();
                        let daughter_mass =
                            |indices: &[usize]| indices.iter().map(|i| masses[*i]).sum::<f64>();
                        let kernel = BreitWigner::new(
                            *l,
                            daughter_mass(final_state_a),
                            daughter_mass(final_state_b),
                        );
                        let m_sq = tree.variable(m_sq)?;
                        let mass = tree.parameter(mass.to_parameter())?;
                        let width = tree.parameter(width.to_parameter())?;
                        let lineshape = tree.kernel(kernel, &[m_sq, mass, width])?;
                        tree.mul(&[angular, lineshape])
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::generate::{generate_phsp, PhaseSpaceGenerator};
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const MODEL: &str = r#"{
        "particles": [
            {"name": "jpsi", "pid": 443, "mass": 3.0969, "spin2": 2},
            {"name": "pi0", "pid": 111, "mass": 0.1349768},
            {"name": "pi+", "pid": 211, "mass": 0.13957},
            {"name": "pi-", "pid": -211, "mass": 0.13957},
            {"name": "rho", "pid": 113, "mass": 0.775, "width": 0.149, "spin2": 2}
        ],
        "kinematics": {
            "initial_state": ["jpsi"],
            "final_state": ["pi0", "pi+", "pi-"]
        },
        "intensity": {
            "type": "normalized",
            "intensity": {
                "type": "coherent",
                "name": "jpsi_to_pi0_pip_pim",
                "amplitudes": [
                    {
                        "type": "coefficient",
                        "magnitude": {"name": "mag_rho0", "value": 1.0, "fixed": true},
                        "phase": {"name": "phase_rho0", "value": 0.0, "fixed": true},
                        "amplitude": {
                            "type": "helicity_decay",
                            "name": "rho0",
                            "resonance": "rho",
                            "final_state_a": [1],
                            "final_state_b": [2],
                            "recoil": [0],
                            "dynamics": {"type": "relativistic_breit_wigner", "l": 1}
                        }
                    },
                    {
                        "type": "coefficient",
                        "magnitude": {"name": "mag_rhop", "value": 0.8, "min": 0.0},
                        "phase": {"name": "phase_rhop", "value": 0.3},
                        "amplitude": {
                            "type": "helicity_decay",
                            "name": "rhop",
                            "resonance": "rho",
                            "final_state_a": [0],
                            "final_state_b": [1],
                            "recoil": [2],
                            "dynamics": {"type": "relativistic_breit_wigner", "l": 1}
                        }
                    }
                ]
            }
        }
    }"#;

    fn setup() -> (ModelConfig, HelicityKinematics, EventCollection) {
        let config = ModelConfig::from_json(MODEL).unwrap();
        let kinematics = config.create_kinematics().unwrap();
        let generator = PhaseSpaceGenerator::from_kinematics(&kinematics).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let phsp = generate_phsp(500, &generator, &mut rng);
        (config, kinematics, phsp)
    }

    #[test]
    fn test_missing_section_is_a_configuration_error() {
        let result = ModelConfig::from_json(r#"{"particles": []}"#);
        assert!(matches!(result, Err(ArborError::ConfigurationError { .. })));
    }

    #[test]
    fn test_normalized_intensity_integrates_to_one() {
        let (config, mut kinematics, phsp) = setup();
        let mut builder = IntensityBuilder::new(
            &config.particles,
            &mut kinematics,
            config.intensity.clone(),
            &phsp,
        );
        let mut intensity = builder.create_intensity().unwrap();
        assert_eq!(
            kinematics.variable_names(),
            vec![
                "mSq_(1,2)",
                "theta_(1,2)_vs_(0)",
                "phi_(1,2)_vs_(0)",
                "mSq_(0,1)",
                "theta_(0,1)_vs_(2)",
                "phi_(0,1)_vs_(2)"
            ]
        );
        let free: Vec<&str> = intensity
            .parameters()
            .free_parameters()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(free, vec!["mag_rhop", "phase_rhop"]);
        let data = kinematics.convert(&phsp).unwrap();
        let values = intensity.evaluate(&data).unwrap();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        assert_relative_eq!(mean * kinematics.phsp_volume(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_components() {
        let (config, mut kinematics, phsp) = setup();
        let mut builder = IntensityBuilder::new(
            &config.particles,
            &mut kinematics,
            config.intensity.clone(),
            &phsp,
        );
        assert_eq!(
            builder.all_component_names(),
            vec!["jpsi_to_pi0_pip_pim", "rho0", "rhop"]
        );
        let components = builder
            .create_intensity_components(&[
                vec!["rho0".to_string()],
                vec!["rho0".to_string(), "rhop".to_string()],
            ])
            .unwrap();
        let mut full = builder.create_intensity().unwrap();
        assert_eq!(components[0].name, "rho0");
        // the normalization of the full model still depends on the other amplitude
        assert!(components[0].intensity.parameters().get("mag_rhop").is_some());
        let data = kinematics.convert(&phsp).unwrap();
        let mut everything = components[1].clone();
        let a = everything.intensity.evaluate(&data).unwrap();
        let b = full.evaluate(&data).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
        let mut rho0 = components[0].clone();
        let fraction = rho0.integral(&data).unwrap() / everything.integral(&data).unwrap();
        assert!(fraction > 0.0 && fraction < 1.5);
    }

    #[test]
    fn test_unknown_component_names_are_rejected() {
        let (config, mut kinematics, phsp) = setup();
        let mut builder =
            IntensityBuilder::new(&config.particles, &mut kinematics, config.intensity, &phsp);
        assert!(matches!(
            builder.create_intensity_components(&[vec!["omega".to_string()]]),
            Err(ArborError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_unknown_resonance_is_rejected() {
        let (config, mut kinematics, phsp) = setup();
        let description = IntensityDescription::Coherent {
            name: "bad".to_string(),
            amplitudes: vec![AmplitudeDescription::HelicityDecay {
                name: "omega".to_string(),
                resonance: "omega".to_string(),
                helicity2: 0,
                daughter_helicities2: [0, 0],
                final_state_a: vec![0],
                final_state_b: vec![1],
                recoil: vec![2],
                dynamics: DynamicsDescription::NonResonant,
            }],
        };
        let mut builder =
            IntensityBuilder::new(&config.particles, &mut kinematics, description, &phsp);
        assert!(matches!(
            builder.create_intensity(),
            Err(ArborError::ConfigurationError { .. })
        ));
    }
}
