//! Reference cases run under cargo test.

use crate::analytical::HarmonicWell;
use crate::{
    all_tests, free_spreading_test, group_velocity_test, harmonic_ground_state_test, harmonic_potential,
    norm_conservation_test, ExpectedResult, NormCheck, Packet, ReferenceTest, TestResult,
};
use kernel::GridSpec;

fn assert_passes(result: Result<TestResult, String>) {
    let result = result.unwrap();
    result.print_summary();
    for check in &result.checks {
        assert!(check.passed, "{} failed: {:?}", check.name, check.message);
    }
    assert!(result.passed);
}

#[test]
fn test_free_spreading() {
    assert_passes(free_spreading_test().run());
}

#[test]
fn test_group_velocity() {
    assert_passes(group_velocity_test().run());
}

#[test]
fn test_norm_conservation() {
    assert_passes(norm_conservation_test().run());
}

#[test]
fn test_harmonic_ground_state() {
    assert_passes(harmonic_ground_state_test().run());
}

#[test]
fn test_initial_packet_is_normalised() {
    let test = ReferenceTest {
        name: "Zero Turns".to_string(),
        grid: [48, 48],
        dt: 0.2,
        turns: 0,
        packet: Packet { center: [24.0, 24.0], sigma: 4.0, momentum: None },
        harmonic_sigma: None,
        expected: ExpectedResult { norm: Some(NormCheck { max_error: 1e-6 }), ..Default::default() },
    };
    let result = test.run().unwrap();
    assert!(result.passed);
    assert!((result.initial.total - 1.0).abs() < 0.01, "total {}", result.initial.total);
    assert!((result.initial.mean[0] - 24.0).abs() < 1e-3);
    // Per-axis variance of the density is sigma^2 / 2.
    assert!((result.initial.variance[0] - 8.0).abs() < 0.1, "variance {}", result.initial.variance[0]);
}

#[test]
fn test_harmonic_potential_is_centred() {
    let grid = GridSpec::new(9, 7, 1.0, 1.0).unwrap();
    let well = HarmonicWell { sigma: 2.0, mass: 1.0 };
    let v = harmonic_potential(&grid, [4.0, 3.0], &well);
    assert_eq!(v.len(), 63);
    assert_eq!(v[3 * 9 + 4], 0.0);
    assert!(v[0] > v[3 * 9 + 3]);
    assert!((v[3 * 9 + 6] - v[3 * 9 + 2]).abs() < 1e-7);
}

#[test]
fn test_bad_grid_is_an_error() {
    let mut test = free_spreading_test();
    test.grid = [1, 128];
    assert!(test.run().is_err());
}

#[test]
fn test_every_case_has_a_check() {
    for test in all_tests() {
        let e = &test.expected;
        assert!(e.norm.is_some() || e.spreading.is_some() || e.drift.is_some() || e.stationary.is_some());
    }
}
