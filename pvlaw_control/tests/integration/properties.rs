//! Property tests for the numeric kernels.

use proptest::prelude::*;
use pvlaw_control::control::limiting::limit_steps;
use pvlaw_control::kernel::filter::IirFilter;
use pvlaw_control::kernel::interp::{InterpStatus, Table1d};
use pvlaw_control::model::{Bounds, Limits};

/// Strictly increasing abscissae with matching ordinates.
fn table_points() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    prop::collection::vec((0.01f64..10.0, -100.0f64..100.0), 2..12).prop_map(|pairs| {
        let mut x = Vec::with_capacity(pairs.len());
        let mut at = -5.0;
        for (step, _) in &pairs {
            at += step;
            x.push(at);
        }
        let y = pairs.into_iter().map(|(_, y)| y).collect();
        (x, y)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_delta_limit_single_factor(
        channels in prop::collection::vec(
            (-50.0f64..50.0, -20.0f64..20.0, 0.05f64..5.0),
            1..8,
        ),
    ) {
        let old: Vec<f64> = channels.iter().map(|c| c.0).collect();
        let proposed: Vec<f64> = channels.iter().map(|c| c.0 + c.1).collect();
        let limits = Limits::PerChannel(
            channels.iter().map(|c| Some(Bounds::symmetric(c.2))).collect(),
        );

        let (values, scale) = limit_steps(&proposed, &old, &limits);
        prop_assert!(scale > 0.0 && scale <= 1.0, "scale={scale}");
        for (i, c) in channels.iter().enumerate() {
            let step = values[i] - old[i];
            prop_assert!(step.abs() <= c.2 * (1.0 + 1e-9), "channel {i}: |{step}| > {}", c.2);
            if scale < 1.0 && c.1.abs() > 1e-3 {
                let ratio = step / (proposed[i] - old[i]);
                prop_assert!((ratio - scale).abs() < 1e-6, "channel {i}: ratio {ratio} vs {scale}");
            }
        }
    }

    #[test]
    fn prop_interpolation_hits_nodes((x, y) in table_points(), order in 1usize..5) {
        let table = Table1d::new(x.clone(), y.clone()).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            let (v, status) = table.interpolate(*xi, order).unwrap();
            prop_assert_eq!(status, InterpStatus::InRange);
            prop_assert!((v - yi).abs() <= 1e-6 * (1.0 + yi.abs()), "f({xi}) = {v}, want {yi}");
        }
        let (lo, hi) = table.domain();
        let (below, s) = table.interpolate(lo - 1.0, order).unwrap();
        prop_assert_eq!(s, InterpStatus::BelowRange);
        prop_assert_eq!(below, y[0]);
        let (above, s) = table.interpolate(hi + 1.0, order).unwrap();
        prop_assert_eq!(s, InterpStatus::AboveRange);
        prop_assert_eq!(above, y[y.len() - 1]);
    }

    #[test]
    fn prop_filter_dc_gain(
        c in -10.0f64..10.0,
        a1 in -0.8f64..0.8,
        b0 in 0.1f64..2.0,
        b1 in -1.0f64..1.0,
    ) {
        let mut filter = IirFilter::new(vec![1.0, a1], vec![b0, b1]);
        let mut y = 0.0;
        for _ in 0..400 {
            y = filter.apply(c);
        }
        let expected = c * filter.dc_gain();
        prop_assert!((y - expected).abs() <= 1e-6 * (1.0 + expected.abs()), "y={y} expected={expected}");
    }
}
