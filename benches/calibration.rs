use std::hint::black_box;

use chrono::NaiveDate;
use criterion::{Criterion, criterion_group, criterion_main};
use volprob::config::{SmileMethod, SplineOptions, SviOptions};
use volprob::implied::{SolverConfig, SolverMethod, implied_vol};
use volprob::pricing::PricingEngine;
use volprob::quotes::OptionQuote;
use volprob::smile::{SmileSection, SplineSmile, SviSmile};
use volprob::{FitConfig, MarketContext, OptionType, SmileCalibrator, SurfaceCalibrator};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("benchmark dates are valid")
}

/// Synthetic (strike, vol, weight) points from a known SVI smile.
fn generate_points(forward: f64, expiry: f64, n_strikes: usize) -> Vec<(f64, f64, f64)> {
    let svi = SviSmile::new(forward, expiry, 0.04, 0.10, -0.30, 0.0, 0.20)
        .expect("benchmark SVI params should be valid");
    let k_min = forward * 0.7;
    let k_max = forward * 1.3;
    (0..n_strikes)
        .map(|i| {
            let k = k_min + (k_max - k_min) * (i as f64 / (n_strikes - 1) as f64);
            (k, svi.vol(k).expect("SVI vol should succeed").0, 1.0)
        })
        .collect()
}

/// OTM quotes for several expiries priced off a skewed smile.
fn generate_quotes(
    market: &MarketContext,
    expiries: &[NaiveDate],
    n_strikes: usize,
) -> Vec<OptionQuote> {
    let mut quotes = Vec::new();
    for &expiry in expiries {
        let ctx = market.at_expiry(expiry).expect("benchmark expiry is valid");
        for i in 0..n_strikes {
            let strike = 60.0 + 80.0 * i as f64 / (n_strikes - 1) as f64;
            let k = (strike / ctx.forward).ln();
            let vol = 0.22 - 0.15 * k + 0.3 * k * k;
            let ot = if strike < ctx.forward { OptionType::Put } else { OptionType::Call };
            let price = PricingEngine::Black76.price(&ctx, strike, vol, ot);
            quotes.push(
                OptionQuote::new(strike, expiry, ot, market.valuation_date).with_last(price),
            );
        }
    }
    quotes
}

fn smile_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("smile");
    let (forward, expiry) = (100.0, 0.25);
    let points = generate_points(forward, expiry, 25);

    group.bench_function("svi_calibration", |b| {
        b.iter(|| {
            let (forward, expiry, points) = black_box((forward, expiry, &points));
            SviSmile::calibrate(forward, expiry, points, &SviOptions::default()).unwrap()
        });
    });

    group.bench_function("spline_calibration", |b| {
        b.iter(|| {
            SplineSmile::calibrate(
                black_box(forward),
                black_box(expiry),
                black_box(&points),
                &SplineOptions::default(),
            )
            .unwrap()
        });
    });

    group.finish();
}

fn implied_vol_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("implied_vol");
    let market = MarketContext::new(date(2025, 1, 2), 100.0, 0.04).unwrap();
    let ctx = market.at_expiry(date(2025, 7, 2)).unwrap();
    let price = PricingEngine::Black76.price(&ctx, 110.0, 0.25, OptionType::Call);

    for (name, method) in [
        ("brent", SolverMethod::Bracketing),
        ("newton", SolverMethod::DerivativeBased),
    ] {
        let config = SolverConfig::default().with_method(method);
        group.bench_function(name, |b| {
            b.iter(|| {
                implied_vol(
                    black_box(price),
                    black_box(110.0),
                    OptionType::Call,
                    &ctx,
                    PricingEngine::Black76,
                    &config,
                )
                .unwrap()
            });
        });
    }

    group.finish();
}

fn pipeline_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(20);
    let market = MarketContext::new(date(2025, 1, 2), 100.0, 0.04).unwrap();
    let expiries = [date(2025, 2, 21), date(2025, 3, 21), date(2025, 6, 20), date(2025, 12, 19)];
    let quotes = generate_quotes(&market, &expiries, 30);

    let config = FitConfig::default();
    group.bench_function("single_expiry_svi", |b| {
        b.iter(|| {
            SmileCalibrator::new(&config)
                .fit_quotes(black_box(&quotes), &market, expiries[2])
                .unwrap()
        });
    });

    let svi = SurfaceCalibrator::new(FitConfig::default());
    group.bench_function("surface_svi_4x30", |b| {
        b.iter(|| svi.fit(black_box(&quotes), &market).unwrap());
    });

    let spline_method = SmileMethod::BSpline(SplineOptions::default());
    let spline = SurfaceCalibrator::new(FitConfig::default().with_method(spline_method));
    group.bench_function("surface_spline_4x30", |b| {
        b.iter(|| spline.fit(black_box(&quotes), &market).unwrap());
    });

    group.finish();
}

criterion_group!(benches, smile_benchmarks, implied_vol_benchmarks, pipeline_benchmarks);
criterion_main!(benches);
