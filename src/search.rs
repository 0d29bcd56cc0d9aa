use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

use crate::{
    config::PipelineConfig,
    metadata::DataSplits,
    model::XrayAgeModel,
    training::TrialTrainer,
};

// Bornes du tirage aléatoire, reprises telles quelles de l'expérience.
const SIZES: [usize; 3] = [100, 125, 150];
const DROPOUT_MAX: f64 = 0.5;
const LR_EXP_RANGE: std::ops::Range<u32> = 1..3;
const DECAY_EXP_RANGE: std::ops::Range<u32> = 3..6;
const ROTATION_MAX: f64 = 10.0;
const SHIFT_MAX: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparams {
    pub size: usize,
    pub dropout: f64,
    pub lr_exp: u32,
    pub decay_exp: u32,
    pub flip_horizontal: bool,
    pub rotation: f64,
    pub shift_w: f64,
    pub shift_h: f64,
}

impl Hyperparams {
    pub fn sample(rng: &mut StdRng) -> Self {
        Self {
            size: SIZES[rng.gen_range(0..SIZES.len())],
            dropout: rng.gen_range(0.0..DROPOUT_MAX),
            lr_exp: rng.gen_range(LR_EXP_RANGE),
            decay_exp: rng.gen_range(DECAY_EXP_RANGE),
            flip_horizontal: rng.gen_bool(0.5),
            rotation: rng.gen_range(0.0..ROTATION_MAX),
            shift_w: rng.gen_range(0.0..SHIFT_MAX),
            shift_h: rng.gen_range(0.0..SHIFT_MAX),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        10f64.powi(-(self.lr_exp as i32))
    }

    pub fn weight_decay(&self) -> f64 {
        10f64.powi(-(self.decay_exp as i32))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialRecord {
    pub trial: usize,
    pub valid_loss: f64,
    pub hyperparams: Hyperparams,
}

pub struct SearchOutcome<B: AutodiffBackend> {
    pub ranking: Vec<TrialRecord>,
    pub best_model: Option<XrayAgeModel<B::InnerBackend>>,
}

pub fn run_search<B: AutodiffBackend>(
    config: &PipelineConfig,
    splits: &DataSplits,
    rng: &mut StdRng,
    device: &B::Device,
) -> SearchOutcome<B> {
    let mut records = Vec::with_capacity(config.num_trials);
    let mut best: Option<(f64, XrayAgeModel<B::InnerBackend>)> = None;

    for trial in 0..config.num_trials {
        let hyperparams = Hyperparams::sample(rng);
        println!(
            "🚀 Essai {}/{}: {:?}",
            trial + 1,
            config.num_trials,
            hyperparams
        );

        let trainer =
            TrialTrainer::<B>::new(config.clone(), hyperparams.clone(), device.clone());
        match trainer.run(splits, trial) {
            Ok(outcome) => {
                println!(
                    "🏁 Essai {} terminé, perte de validation: {:.4}",
                    trial + 1,
                    outcome.valid_loss
                );
                if best
                    .as_ref()
                    .map_or(true, |(loss, _)| outcome.valid_loss < *loss)
                {
                    best = Some((outcome.valid_loss, outcome.model));
                }
                records.push(TrialRecord {
                    trial,
                    valid_loss: outcome.valid_loss,
                    hyperparams,
                });
            }
            Err(e) => {
                // Essai en échec: signalé, exclu du classement, la recherche continue.
                eprintln!("⚠️  Essai {} abandonné: {}", trial + 1, e);
            }
        }
    }

    SearchOutcome {
        ranking: rank_trials(records),
        best_model: best.map(|(_, model)| model),
    }
}

// Classement croissant par perte de validation scalaire.
pub fn rank_trials(mut records: Vec<TrialRecord>) -> Vec<TrialRecord> {
    records.sort_by(|a, b| a.valid_loss.total_cmp(&b.valid_loss));
    records
}

pub fn print_ranking(ranking: &[TrialRecord]) -> Result<()> {
    println!("🏆 Classement final ({} essais réussis):", ranking.len());
    for (rank, record) in ranking.iter().enumerate() {
        println!(
            "   {:2}. essai {:2} — perte {:.4} — {:?}",
            rank + 1,
            record.trial + 1,
            record.valid_loss,
            record.hyperparams
        );
    }
    println!("{}", serde_json::to_string_pretty(ranking)?);
    Ok(())
}
