//! Property-based tests for the cycle pipeline
//!
//! - Totality: every segmented cycle is accepted or rejected, never both
//! - Segmentation is idempotent on its own output
//! - Spectrum ordering does not depend on row order
//! - Exact frequency sets are accepted, sets missing one are rejected
//! - Run with `ProptestConfig::with_cases(64)`

mod common;

use common::ExportBuilder;
use eis_sav::cycle::{Cycle, CycleSegmenter};
use eis_sav::record::RawRecord;
use eis_sav::step::ControlType;
use eis_sav::{Pipeline, PipelineConfig, RejectionReason, Result};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// Log-spaced candidate frequencies, far enough apart to never match each other.
fn frequency_pool() -> Vec<f64> {
    (-4..=20).map(|k| 10f64.powf(f64::from(k) / 4.0)).collect()
}

/// A sorted, non-empty subset of the pool.
fn arb_frequencies() -> impl Strategy<Value = Vec<f64>> {
    proptest::sample::subsequence(frequency_pool(), 1..=8)
}

/// Per-cycle shape: (drop one frequency?, has charge, has discharge)
fn arb_cycle_shape() -> impl Strategy<Value = (bool, bool, bool)> {
    (any::<bool>(), any::<bool>(), any::<bool>())
}

/// Non-decreasing cycle counters paired with step indices.
fn arb_rows() -> impl Strategy<Value = Vec<(u32, u32)>> {
    proptest::collection::vec((0u32..3, 0u32..4), 1..60).prop_map(|deltas| {
        let mut cycle = 0;
        deltas
            .into_iter()
            .map(|(delta, step)| {
                cycle += delta;
                (cycle, step)
            })
            .collect()
    })
}

fn pipeline(frequencies: &[f64]) -> Pipeline {
    Pipeline::new(
        PipelineConfig::builder()
            .frequency_list(frequencies.to_vec())
            .build()
            .unwrap(),
    )
    .unwrap()
}

fn raw(line: u64, cycle: u32, step: u32) -> RawRecord {
    RawRecord {
        line,
        cycle,
        step,
        control: ControlType::Rest,
        step_direction: None,
        elapsed_s: line as f64,
        voltage_v: 3.7,
        current_ma: 0.0,
        cumulative_charge_mah: 0.0,
        discharge_capacity_mah: None,
        impedance: None,
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: accepted + rejected == segmented cycles, in cycle order
    #[test]
    fn prop_every_cycle_has_one_outcome(
        frequencies in arb_frequencies(),
        shapes in proptest::collection::vec(arb_cycle_shape(), 1..8),
    ) {
        let mut builder = ExportBuilder::new();
        for (i, (drop_one, charge, discharge)) in shapes.iter().enumerate() {
            let cycle = u32::try_from(i).unwrap() + 1;
            let sweep = if *drop_one && frequencies.len() > 1 {
                &frequencies[1..]
            } else {
                &frequencies[..]
            };
            builder = builder.sweep(cycle, sweep);
            if *charge {
                builder = builder.phase(cycle, 1, 100.0, 2, 2.0);
            }
            if *discharge {
                builder = builder.phase(cycle, 2, -50.0, 2, -2.0);
            }
        }
        let export = builder.build();

        let dataset = pipeline(&frequencies).run_reader("prop", export.as_bytes()).unwrap();
        let report = dataset.report();

        prop_assert_eq!(report.cycles(), shapes.len());
        prop_assert_eq!(dataset.examples().len() + dataset.rejections().len(), shapes.len());
        prop_assert_eq!(report.accepted(), dataset.examples().len());

        let mut seen: Vec<u32> = dataset
            .examples()
            .iter()
            .map(|e| e.cycle)
            .chain(dataset.rejections().iter().map(|r| r.cycle))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        prop_assert_eq!(seen.len(), shapes.len());
    }

    /// Property: re-segmenting one cycle's records yields that same cycle
    #[test]
    fn prop_segmentation_idempotent(rows in arb_rows()) {
        let records: Vec<RawRecord> = rows
            .iter()
            .enumerate()
            .map(|(i, (cycle, step))| raw(i as u64 + 1, *cycle, *step))
            .collect();
        let cycles: Vec<Cycle> = CycleSegmenter::new(records.into_iter().map(Ok), None)
            .collect::<Result<_>>()
            .unwrap();

        let total: usize = cycles.iter().map(Cycle::len).sum();
        prop_assert_eq!(total, rows.len());

        for cycle in cycles {
            let again: Vec<Cycle> = CycleSegmenter::new(cycle.records().to_vec().into_iter().map(Ok), None)
                .collect::<Result<_>>()
                .unwrap();
            prop_assert_eq!(again, vec![cycle]);
        }
    }

    /// Property: state ordering is independent of sweep row order
    #[test]
    fn prop_state_order_invariant(
        shuffled in arb_frequencies().prop_flat_map(|f| Just(f).prop_shuffle()),
    ) {
        let mut sorted = shuffled.clone();
        sorted.sort_by(f64::total_cmp);

        let export = ExportBuilder::new().cycle(1, &shuffled).build();
        let reference = ExportBuilder::new().cycle(1, &sorted).build();
        let pipeline = pipeline(&sorted);

        let a = pipeline.run_reader("shuffled", export.as_bytes()).unwrap();
        let b = pipeline.run_reader("sorted", reference.as_bytes()).unwrap();
        prop_assert_eq!(&a.examples()[0].state, &b.examples()[0].state);
    }

    /// Property: exactly the configured frequencies is never a spectrum rejection
    #[test]
    fn prop_exact_spectrum_accepted(frequencies in arb_frequencies()) {
        let export = ExportBuilder::new().cycle(1, &frequencies).build();
        let dataset = pipeline(&frequencies).run_reader("exact", export.as_bytes()).unwrap();
        prop_assert_eq!(dataset.examples().len(), 1);
        prop_assert_eq!(dataset.examples()[0].state.len(), frequencies.len());
    }

    /// Property: dropping any one configured frequency rejects the cycle
    #[test]
    fn prop_missing_frequency_rejected(
        (frequencies, missing) in arb_frequencies()
            .prop_flat_map(|f| { let n = f.len(); (Just(f), 0..n) }),
    ) {
        let mut sweep = frequencies.clone();
        sweep.remove(missing);

        let export = ExportBuilder::new().cycle(1, &sweep).build();
        let dataset = pipeline(&frequencies).run_reader("missing", export.as_bytes()).unwrap();
        prop_assert!(dataset.examples().is_empty());
        let is_spectrum = matches!(
            dataset.rejections()[0].reason,
            RejectionReason::IncompleteSpectrum { .. }
        );
        prop_assert!(is_spectrum);
    }
}
