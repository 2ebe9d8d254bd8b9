use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
    pub calibration_error: f64,
}

pub const CALIBRATION_BINS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }

    pub fn sum(&self) -> f64 {
        self.home + self.draw + self.away
    }

    pub fn is_valid(&self) -> bool {
        let parts = [self.home, self.draw, self.away];
        parts.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p))
            && (self.sum() - 1.0).abs() < 1e-6
    }
}

pub fn classify_outcome(home_goals: i32, away_goals: i32) -> Outcome {
    if home_goals > away_goals {
        Outcome::Home
    } else if home_goals < away_goals {
        Outcome::Away
    } else {
        Outcome::Draw
    }
}

pub fn empirical_outcome_probs(outcomes: &[Outcome]) -> Prob3 {
    if outcomes.is_empty() {
        return Prob3::uniform();
    }

    let mut home = 0usize;
    let mut draw = 0usize;
    let mut away = 0usize;
    for outcome in outcomes {
        match outcome {
            Outcome::Home => home += 1,
            Outcome::Draw => draw += 1,
            Outcome::Away => away += 1,
        }
    }
    let n = outcomes.len() as f64;
    Prob3 {
        home: home as f64 / n,
        draw: draw as f64 / n,
        away: away as f64 / n,
    }
}

pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || outcomes.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::default();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let y = one_hot(*outcome);
        brier_sum +=
            (p.home - y.home).powi(2) + (p.draw - y.draw).powi(2) + (p.away - y.away).powi(2);

        let actual_prob = p.get(*outcome).clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();

        if argmax(*p) == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
        calibration_error: expected_calibration_error(predictions, outcomes, CALIBRATION_BINS),
    }
}

pub fn apply_logit_calibration(prob: Prob3, logit_scale: f64, draw_bias: f64) -> Prob3 {
    let s = logit_scale.clamp(0.50, 1.80);
    let mut lh = prob.home.clamp(1e-9, 1.0).ln();
    let mut ld = prob.draw.clamp(1e-9, 1.0).ln() + draw_bias;
    let mut la = prob.away.clamp(1e-9, 1.0).ln();

    let mean = (lh + ld + la) / 3.0;
    lh = (lh - mean) * s;
    ld = (ld - mean) * s;
    la = (la - mean) * s;

    let mx = lh.max(ld.max(la));
    let eh = (lh - mx).exp();
    let ed = (ld - mx).exp();
    let ea = (la - mx).exp();
    let den = (eh + ed + ea).max(1e-12);

    Prob3 {
        home: (eh / den).clamp(0.0, 1.0),
        draw: (ed / den).clamp(0.0, 1.0),
        away: (ea / den).clamp(0.0, 1.0),
    }
}

/// Grid search over temperature and draw bias minimising log loss.
pub fn fit_logit_calibration(predictions: &[Prob3], outcomes: &[Outcome]) -> (f64, f64, Metrics) {
    if predictions.is_empty() || outcomes.is_empty() || predictions.len() != outcomes.len() {
        return (1.0, 0.0, Metrics::default());
    }

    let mut best_scale = 1.0;
    let mut best_draw_bias = 0.0;
    let mut best_metrics = evaluate_probs(predictions, outcomes);

    for scale_step in 35..=65 {
        let scale = scale_step as f64 / 50.0; // 0.70..1.30
        for draw_step in -30..=30 {
            let draw_bias = draw_step as f64 / 100.0; // -0.30..0.30
            let metrics = evaluate_calibrated(predictions, outcomes, scale, draw_bias);
            if metrics.log_loss < best_metrics.log_loss {
                best_metrics = metrics;
                best_scale = scale;
                best_draw_bias = draw_bias;
            }
        }
    }

    (best_scale, best_draw_bias, best_metrics)
}

pub fn fit_dc_rho_to_draw_rate(goals_total_base: f64, home_adv_goals: f64, draw_rate: f64) -> f64 {
    let target = draw_rate.clamp(0.05, 0.60);
    let mut best_rho = -0.10;
    let mut best_err = f64::INFINITY;

    for rho_steps in -25..=5 {
        let rho = rho_steps as f64 / 100.0;
        let p = probs_from_params(goals_total_base, home_adv_goals, rho);
        let err = (p.draw - target).abs();
        if err < best_err {
            best_err = err;
            best_rho = rho;
        }
    }
    best_rho
}

pub fn calibration_bins(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    class: Outcome,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let class_prob = p.get(class).clamp(0.0, 1.0);

        let idx = ((class_prob * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += class_prob;
        if *outcome == class {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let start = i as f64 / bins as f64;
        let end = (i + 1) as f64 / bins as f64;
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: start,
            bucket_end: end,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

/// Expected calibration error averaged over the three 1X2 classes.
pub fn expected_calibration_error(preds: &[Prob3], outcomes: &[Outcome], bins: usize) -> f64 {
    if preds.is_empty() || preds.len() != outcomes.len() || bins == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    let n = preds.len() as f64;

    for c in [Outcome::Home, Outcome::Draw, Outcome::Away] {
        for b in calibration_bins(preds, outcomes, c, bins) {
            if b.count == 0 {
                continue;
            }
            let w = b.count as f64 / n;
            sum += w * (b.avg_pred - b.actual_rate).abs();
        }
    }

    sum / 3.0
}

#[derive(Debug, Clone)]
pub struct ScoreGrid {
    max_goals: u32,
    cells: Vec<f64>,
}

impl ScoreGrid {
    pub fn new(lambda_home: f64, lambda_away: f64, max_goals: u32, rho: f64) -> Self {
        let side = (max_goals + 1) as usize;
        let mut cells = vec![0.0_f64; side * side];
        for h in 0..=max_goals {
            for a in 0..=max_goals {
                let base = poisson_pmf(h, lambda_home) * poisson_pmf(a, lambda_away);
                cells[h as usize * side + a as usize] =
                    (base * dc_tau(h, a, lambda_home, lambda_away, rho)).max(0.0);
            }
        }
        let sum = cells.iter().sum::<f64>().max(1e-12);
        for c in &mut cells {
            *c /= sum;
        }
        Self { max_goals, cells }
    }

    fn fold(&self, pred: impl Fn(u32, u32) -> bool) -> f64 {
        let side = (self.max_goals + 1) as usize;
        let mut total = 0.0;
        for h in 0..=self.max_goals {
            for a in 0..=self.max_goals {
                if pred(h, a) {
                    total += self.cells[h as usize * side + a as usize];
                }
            }
        }
        total.clamp(0.0, 1.0)
    }

    pub fn outcome_probs(&self) -> Prob3 {
        Prob3 {
            home: self.fold(|h, a| h > a),
            draw: self.fold(|h, a| h == a),
            away: self.fold(|h, a| h < a),
        }
    }

    pub fn over(&self, line: f64) -> f64 {
        self.fold(|h, a| (h + a) as f64 > line)
    }

    pub fn both_score(&self) -> f64 {
        self.fold(|h, a| h > 0 && a > 0)
    }
}

fn probs_from_params(goals_total_base: f64, home_adv_goals: f64, rho: f64) -> Prob3 {
    let lambda_home = ((goals_total_base + home_adv_goals) / 2.0).clamp(0.20, 3.80);
    let lambda_away = ((goals_total_base - home_adv_goals) / 2.0).clamp(0.20, 3.80);
    ScoreGrid::new(lambda_home, lambda_away, 10, rho).outcome_probs()
}

fn dc_tau(home_goals: u32, away_goals: u32, lambda_home: f64, lambda_away: f64, rho: f64) -> f64 {
    match (home_goals, away_goals) {
        (0, 0) => 1.0 - lambda_home * lambda_away * rho,
        (0, 1) => 1.0 + lambda_home * rho,
        (1, 0) => 1.0 + lambda_away * rho,
        (1, 1) => 1.0 - rho,
        _ => 1.0,
    }
}

fn poisson_pmf(goals: u32, lambda: f64) -> f64 {
    let numer = lambda.powi(goals as i32) * (-lambda).exp();
    let denom = (1..=goals).fold(1.0_f64, |acc, k| acc * k as f64).max(1.0);
    numer / denom
}

fn argmax(p: Prob3) -> Outcome {
    if p.home >= p.draw && p.home >= p.away {
        Outcome::Home
    } else if p.draw >= p.away {
        Outcome::Draw
    } else {
        Outcome::Away
    }
}

fn one_hot(outcome: Outcome) -> Prob3 {
    match outcome {
        Outcome::Home => Prob3 {
            home: 1.0,
            draw: 0.0,
            away: 0.0,
        },
        Outcome::Draw => Prob3 {
            home: 0.0,
            draw: 1.0,
            away: 0.0,
        },
        Outcome::Away => Prob3 {
            home: 0.0,
            draw: 0.0,
            away: 1.0,
        },
    }
}

fn evaluate_calibrated(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    logit_scale: f64,
    draw_bias: f64,
) -> Metrics {
    let calibrated: Vec<Prob3> = predictions
        .iter()
        .copied()
        .map(|p| apply_logit_calibration(p, logit_scale, draw_bias))
        .collect();
    evaluate_probs(&calibrated, outcomes)
}
