use std::time::Duration;

use arbor::{
    create_min_log_lh_estimator, generate_phsp, IntensityBuilder, Kinematics, LikelihoodTerm,
    ModelConfig, PhaseSpaceGenerator,
};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const MODEL: &str = r#"{
    "particles": [
        {"name": "D+", "pid": 411, "mass": 1.86966},
        {"name": "K-", "pid": -321, "mass": 0.493677},
        {"name": "pi+", "pid": 211, "mass": 0.13957},
        {"name": "K*0", "pid": 313, "mass": 0.89555, "width": 0.0473, "spin2": 2},
        {"name": "K0*(1430)", "pid": 10311, "mass": 1.425, "width": 0.27}
    ],
    "kinematics": {
        "initial_state": ["D+"],
        "final_state": ["K-", "pi+", "pi+"]
    },
    "intensity": {
        "type": "normalized",
        "intensity": {
            "type": "coherent",
            "name": "D+_to_K-_pi+_pi+",
            "amplitudes": [
                {
                    "type": "coefficient",
                    "magnitude": {"name": "mag_kstar_1", "value": 1.0, "fixed": true},
                    "phase": {"name": "phase_kstar_1", "value": 0.0, "fixed": true},
                    "amplitude": {
                        "type": "helicity_decay",
                        "name": "kstar_1",
                        "resonance": "K*0",
                        "final_state_a": [0],
                        "final_state_b": [1],
                        "recoil": [2],
                        "dynamics": {"type": "relativistic_breit_wigner", "l": 1}
                    }
                },
                {
                    "type": "coefficient",
                    "magnitude": {"name": "mag_kstar_1", "value": 1.0, "fixed": true},
                    "phase": {"name": "phase_kstar_1", "value": 0.0, "fixed": true},
                    "amplitude": {
                        "type": "helicity_decay",
                        "name": "kstar_2",
                        "resonance": "K*0",
                        "final_state_a": [0],
                        "final_state_b": [2],
                        "recoil": [1],
                        "dynamics": {"type": "relativistic_breit_wigner", "l": 1}
                    }
                },
                {
                    "type": "coefficient",
                    "magnitude": {"name": "mag_k0_1", "value": 2.0, "min": 0.0},
                    "phase": {"name": "phase_k0_1", "value": 0.5},
                    "amplitude": {
                        "type": "helicity_decay",
                        "name": "k0_1",
                        "resonance": "K0*(1430)",
                        "final_state_a": [0],
                        "final_state_b": [1],
                        "recoil": [2],
                        "dynamics": {
                            "type": "relativistic_breit_wigner",
                            "l": 0,
                            "width": {"name": "K0*(1430)_width", "value": 0.27, "min": 0.05, "max": 0.5}
                        }
                    }
                }
            ]
        }
    }
}"#;

fn estimator_benchmark(c: &mut Criterion) {
    let config = ModelConfig::from_json(MODEL).unwrap();
    let mut kinematics = config.create_kinematics().unwrap();
    let generator = PhaseSpaceGenerator::from_kinematics(&kinematics).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let phsp = generate_phsp(20_000, &generator, &mut rng);
    let intensity = IntensityBuilder::new(
        &config.particles,
        &mut kinematics,
        config.intensity.clone(),
        &phsp,
    )
    .create_intensity()
    .unwrap();
    let data = generate_phsp(10_000, &generator, &mut rng);
    let dataset = kinematics.convert(&data).unwrap();
    let (estimator, parameters) = create_min_log_lh_estimator(&intensity, &dataset).unwrap();
    let start: Vec<f64> = parameters
        .free_parameters()
        .iter()
        .map(|p| p.value)
        .collect();

    let mut group = c.benchmark_group("Estimator Performance");
    for n_changed in 0..=start.len() {
        group.bench_with_input(
            BenchmarkId::new("changed parameters", n_changed),
            &n_changed,
            |b, &n_changed| {
                let mut rng = ChaCha8Rng::seed_from_u64(1);
                b.iter_batched(
                    || {
                        start
                            .iter()
                            .enumerate()
                            .map(|(i, v)| {
                                if i < n_changed {
                                    v * rng.gen_range(0.9..1.1)
                                } else {
                                    *v
                                }
                            })
                            .collect::<Vec<f64>>()
                    },
                    |p| black_box(estimator.evaluate_with(&p)),
                    BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = estimator_benchmark
}
criterion_main!(benches);
