use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use matchedge::backtest::bootstrap_roi;
use matchedge::feature_cache::CacheKey;
use matchedge::features::{FEATURE_VERSION, FeatureConfig, FeatureEngine};
use matchedge::match_data::{FinalScore, MatchRecord, OddsQuote};
use matchedge::odds;
use matchedge::progress::{CancelToken, NoProgress};

// Four leagues of twenty clubs, three seasons each, results drawn at random.
fn sample_history() -> Vec<MatchRecord> {
    let mut rng = StdRng::seed_from_u64(17);
    let mut out = Vec::new();
    let mut id = 0u64;
    for league in 1..=4u32 {
        for season in 0..3u32 {
            let start = 1_600_000_000 + season as i64 * 365 * 86_400;
            for round in 0..38i64 {
                for slot in 0..10u32 {
                    let home = league * 100 + rng.gen_range(1..=20);
                    let mut away = league * 100 + rng.gen_range(1..=20);
                    if away == home {
                        away = league * 100 + (home % 20) + 1;
                    }
                    id += 1;
                    out.push(MatchRecord {
                        match_id: id,
                        league_id: league,
                        season_id: 2020 + season,
                        kickoff_unix: start + round * 7 * 86_400 + slot as i64 * 3600,
                        game_week: Some(round + 1),
                        home_team_id: home,
                        away_team_id: away,
                        home_team: format!("Club {home}"),
                        away_team: format!("Club {away}"),
                        score: Some(FinalScore {
                            home_goals: rng.gen_range(0..4),
                            away_goals: rng.gen_range(0..3),
                        }),
                        stats: Default::default(),
                        prematch: Default::default(),
                        odds: OddsQuote {
                            home: Some(rng.gen_range(1.5..4.0)),
                            draw: Some(rng.gen_range(3.0..4.0)),
                            away: Some(rng.gen_range(2.0..6.0)),
                            ..OddsQuote::default()
                        },
                    });
                }
            }
        }
    }
    out
}

fn bench_feature_table(c: &mut Criterion) {
    let history = sample_history();
    let engine = FeatureEngine::new(history, FeatureConfig::default());
    c.bench_function("feature_table_4x3_seasons", |b| {
        b.iter(|| {
            let table = engine
                .generate_table(&NoProgress, &CancelToken::new())
                .unwrap();
            black_box(table.rows.len());
        })
    });
}

fn bench_cache_fingerprint(c: &mut Criterion) {
    let history = sample_history();
    let cfg = FeatureConfig::default();
    c.bench_function("cache_fingerprint", |b| {
        b.iter(|| {
            let key = CacheKey::for_dataset(FEATURE_VERSION, &cfg, black_box(&history));
            black_box(key.row_count());
        })
    });
}

fn bench_demargin(c: &mut Criterion) {
    c.bench_function("demargin_three_way", |b| {
        b.iter(|| {
            let probs = odds::demargin(black_box(&[2.50, 3.00, 3.20])).unwrap();
            black_box(probs[0]);
        })
    });
}

fn bench_bootstrap(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let blocks: Vec<(f64, f64)> = (0..600)
        .map(|_| {
            let won = rng.gen_range(0.0..1.0) < 0.45;
            if won { (12.0, 10.0) } else { (-10.0, 10.0) }
        })
        .collect();
    c.bench_function("bootstrap_roi_2000", |b| {
        b.iter(|| {
            let ci = bootstrap_roi(black_box(&blocks), 2000, 0.95, 7).unwrap();
            black_box(ci.lower);
        })
    });
}

criterion_group!(
    benches,
    bench_feature_table,
    bench_cache_fingerprint,
    bench_demargin,
    bench_bootstrap
);
criterion_main!(benches);
