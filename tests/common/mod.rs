#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use matchedge::match_data::{FinalScore, MatchRecord, MatchStats, OddsQuote, Season};

pub const DAY: i64 = 86_400;
const SEASON_START: i64 = 1_600_000_000;

pub struct SyntheticLeague {
    pub seasons: Vec<Season>,
    pub matches: Vec<MatchRecord>,
}

fn poisson(rng: &mut StdRng, lambda: f64) -> u8 {
    let limit = (-lambda).exp();
    let mut k = 0u8;
    let mut p = 1.0;
    loop {
        p *= rng.gen_range(0.0..1.0);
        if p <= limit || k >= 9 {
            return k;
        }
        k += 1;
    }
}

fn pmf(lambda: f64, k: u32) -> f64 {
    let mut fact = 1.0;
    for i in 2..=k {
        fact *= i as f64;
    }
    (-lambda).exp() * lambda.powi(k as i32) / fact
}

// Fair probabilities (home, draw, away, over 2.5, btts yes) under independent Poisson goals.
fn fair_probs(lambda_home: f64, lambda_away: f64) -> [f64; 5] {
    let (mut h, mut d, mut a, mut over, mut btts) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for i in 0..=10 {
        for j in 0..=10 {
            let p = pmf(lambda_home, i) * pmf(lambda_away, j);
            match i.cmp(&j) {
                std::cmp::Ordering::Greater => h += p,
                std::cmp::Ordering::Equal => d += p,
                std::cmp::Ordering::Less => a += p,
            }
            if i + j > 2 {
                over += p;
            }
            if i > 0 && j > 0 {
                btts += p;
            }
        }
    }
    let total = h + d + a;
    [h / total, d / total, a / total, over / total, btts / total]
}

fn price(rng: &mut StdRng, prob: f64, margin: f64) -> f64 {
    let noisy = prob * (1.0 + margin) * rng.gen_range(0.94..1.06);
    (1.0 / noisy).max(1.02)
}

/// Double round-robin league: `teams` clubs, one round a week, each season a
/// year apart. Goals are drawn from team strengths; odds carry a margin and noise.
pub fn synthetic_league(league_id: u32, teams: u32, season_ids: &[u32], seed: u64) -> SyntheticLeague {
    let mut rng = StdRng::seed_from_u64(seed);
    let team_ids: Vec<u32> = (1..=teams).map(|t| league_id * 100 + t).collect();
    let strength: Vec<f64> = team_ids.iter().map(|_| rng.gen_range(-0.35..0.35)).collect();

    let mut seasons = Vec::new();
    let mut matches = Vec::new();
    let mut next_id = league_id as u64 * 1_000_000;

    for (s_idx, &season_id) in season_ids.iter().enumerate() {
        let start = SEASON_START + s_idx as i64 * 365 * DAY;
        seasons.push(Season {
            season_id,
            league_id,
            label: format!("{season_id}/{}", season_id + 1),
            start_unix: Some(start),
        });

        for (round, pairs) in round_robin(teams as usize).into_iter().enumerate() {
            let round_start = start + round as i64 * 7 * DAY;
            for (slot, (h, a)) in pairs.into_iter().enumerate() {
                let lambda_home = 1.45 * (strength[h] - strength[a]).exp();
                let lambda_away = 1.15 * (strength[a] - strength[h]).exp();
                let home_goals = poisson(&mut rng, lambda_home);
                let away_goals = poisson(&mut rng, lambda_away);
                let fair = fair_probs(lambda_home, lambda_away);
                let margin = 0.05;

                next_id += 1;
                matches.push(MatchRecord {
                    match_id: next_id,
                    league_id,
                    season_id,
                    kickoff_unix: round_start + slot as i64 * 2 * 3600,
                    game_week: Some(round as i64 + 1),
                    home_team_id: team_ids[h],
                    away_team_id: team_ids[a],
                    home_team: format!("Club {}", team_ids[h]),
                    away_team: format!("Club {}", team_ids[a]),
                    score: Some(FinalScore {
                        home_goals,
                        away_goals,
                    }),
                    stats: MatchStats {
                        home_xg: Some(lambda_home * rng.gen_range(0.7..1.3)),
                        away_xg: Some(lambda_away * rng.gen_range(0.7..1.3)),
                        ..MatchStats::default()
                    },
                    prematch: Default::default(),
                    odds: OddsQuote {
                        home: Some(price(&mut rng, fair[0], margin)),
                        draw: Some(price(&mut rng, fair[1], margin)),
                        away: Some(price(&mut rng, fair[2], margin)),
                        over_25: Some(price(&mut rng, fair[3], margin)),
                        under_25: Some(price(&mut rng, 1.0 - fair[3], margin)),
                        over_15: None,
                        under_15: None,
                        btts_yes: Some(price(&mut rng, fair[4], margin)),
                        btts_no: Some(price(&mut rng, 1.0 - fair[4], margin)),
                    },
                });
            }
        }
    }

    SyntheticLeague { seasons, matches }
}

// Circle method; the second half of the schedule mirrors the first with venues swapped.
fn round_robin(n: usize) -> Vec<Vec<(usize, usize)>> {
    let mut idx: Vec<usize> = (0..n).collect();
    let mut first_half = Vec::new();
    for round in 0..n - 1 {
        let mut pairs = Vec::new();
        for i in 0..n / 2 {
            let (a, b) = (idx[i], idx[n - 1 - i]);
            if round % 2 == 0 {
                pairs.push((a, b));
            } else {
                pairs.push((b, a));
            }
        }
        first_half.push(pairs);
        idx[1..].rotate_right(1);
    }
    let second_half: Vec<Vec<(usize, usize)>> = first_half
        .iter()
        .map(|pairs| pairs.iter().map(|&(h, a)| (a, h)).collect())
        .collect();
    first_half.into_iter().chain(second_half).collect()
}

pub fn played(id: u64, league: u32, season: u32, ts: i64, home: u32, away: u32, score: (u8, u8)) -> MatchRecord {
    MatchRecord {
        match_id: id,
        league_id: league,
        season_id: season,
        kickoff_unix: ts,
        game_week: None,
        home_team_id: home,
        away_team_id: away,
        home_team: format!("T{home}"),
        away_team: format!("T{away}"),
        score: Some(FinalScore {
            home_goals: score.0,
            away_goals: score.1,
        }),
        stats: Default::default(),
        prematch: Default::default(),
        odds: Default::default(),
    }
}

/// Fresh directory under the system temp dir; callers remove it when done.
pub fn scratch_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("matchedge-{name}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
