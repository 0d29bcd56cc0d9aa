mod config;
mod data;
mod metadata;
mod model;
mod search;
mod training;
mod vgg;

use anyhow::Result;
use burn::{
    backend::{Autodiff, NdArray},
    data::dataloader::DataLoaderBuilder,
    tensor::backend::Backend,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::PipelineConfig,
    data::{XrayBatch, XrayBatcher, XrayDataset, XrayItem},
    metadata::DataSplits,
    search::{print_ranking, run_search},
    training::evaluate,
};

type Back = Autodiff<NdArray<f32>>;
type Inner = NdArray<f32>;

fn main() -> Result<()> {
    let config = PipelineConfig::default();
    let device = <Back as Backend>::Device::default();

    // Une seule graine pour le backend et pour les tirages de la recherche.
    Back::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);

    println!("🔎 Recherche aléatoire d'hyperparamètres");
    println!("   - Backend: {}", std::any::type_name::<Back>());
    println!("   - Essais: {}", config.num_trials);
    println!("   - Époques par essai: {}", config.num_epochs);
    println!("   - Taille de lot: {}", config.batch_size);

    let mut splits = DataSplits::build(&config)?;
    splits.balance_train(config.seed);

    let outcome = run_search::<Back>(&config, &splits, &mut rng, &device);
    print_ranking(&outcome.ranking)?;

    // Évaluation finale du meilleur modèle sur le split de test.
    if let (Some(model), Some(best)) = (outcome.best_model, outcome.ranking.first()) {
        if splits.test.is_empty() {
            println!("ℹ️  Aucune ligne de test, évaluation finale ignorée");
        } else {
            let batcher = XrayBatcher::<Inner>::new(best.hyperparams.size, Default::default());
            let test_loader = DataLoaderBuilder::<Inner, XrayItem, XrayBatch<Inner>>::new(batcher)
                .batch_size(config.batch_size)
                .build(XrayDataset::from_rows(&splits.test, &config.image_dir));

            let test_loss = evaluate(&model, test_loader);
            println!(
                "🧪 Perte du meilleur modèle (essai {}) sur le test: {:.4}",
                best.trial + 1,
                test_loss
            );
        }
    }

    Ok(())
}
