use std::sync::Arc;

use anyhow::{anyhow, Result};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, momentum::MomentumConfig, SgdConfig},
    record::CompactRecorder,
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
    train::{metric::LossMetric, LearnerBuilder},
};

use crate::{
    config::PipelineConfig,
    data::{steps_per_epoch, Augmentation, XrayBatch, XrayBatcher, XrayDataset, XrayItem},
    metadata::DataSplits,
    model::{mean_absolute_error, XrayAgeModel},
    search::Hyperparams,
};

pub struct TrialOutcome<B: Backend> {
    pub valid_loss: f64,
    pub model: XrayAgeModel<B>,
}

pub struct TrialTrainer<B: AutodiffBackend> {
    config: PipelineConfig,
    hyperparams: Hyperparams,
    device: B::Device,
}

impl<B: AutodiffBackend> TrialTrainer<B> {
    pub fn new(config: PipelineConfig, hyperparams: Hyperparams, device: B::Device) -> Self {
        Self {
            config,
            hyperparams,
            device,
        }
    }

    pub fn run(&self, splits: &DataSplits, trial: usize) -> Result<TrialOutcome<B::InnerBackend>> {
        self.validate()?;

        let (train_loader, valid_loader) = self.create_dataloaders(splits)?;

        println!("   - Taille d'image: {0}x{0}", self.hyperparams.size);
        println!(
            "   - Taux d'apprentissage: {:.0e}, décroissance: {:.0e}",
            self.hyperparams.learning_rate(),
            self.hyperparams.weight_decay()
        );
        println!(
            "   - Pas par époque: {}",
            steps_per_epoch(splits.train.len(), self.config.batch_size)
        );

        let model = XrayAgeModel::<B>::new(
            self.hyperparams.size,
            self.hyperparams.dropout,
            &self.device,
        );
        let optim = self.create_optimizer();

        let artifact_dir = self.config.trial_artifact_dir(trial);
        let learner = LearnerBuilder::new(&artifact_dir)
            .metric_train_numeric(LossMetric::new())
            .metric_valid_numeric(LossMetric::new())
            .with_file_checkpointer(CompactRecorder::new())
            .num_epochs(self.config.num_epochs)
            .summary()
            .build(model, optim.init(), self.hyperparams.learning_rate());

        let trained = learner.fit(train_loader, valid_loader.clone());

        let model = trained.valid();
        let valid_loss = evaluate(&model, valid_loader);

        Ok(TrialOutcome { valid_loss, model })
    }

    fn validate(&self) -> Result<()> {
        if self.config.batch_size == 0 {
            return Err(anyhow!("La taille de lot doit être > 0"));
        }
        if self.config.num_epochs == 0 {
            return Err(anyhow!("Le nombre d'époques doit être > 0"));
        }
        if self.hyperparams.size < 32 {
            return Err(anyhow!(
                "Taille d'image {} trop petite pour cinq étages de pooling",
                self.hyperparams.size
            ));
        }
        if !(0.0..1.0).contains(&self.hyperparams.dropout) {
            return Err(anyhow!("Le dropout doit être dans [0, 1)"));
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn create_dataloaders(
        &self,
        splits: &DataSplits,
    ) -> Result<(
        Arc<dyn DataLoader<B, XrayBatch<B>>>,
        Arc<dyn DataLoader<B::InnerBackend, XrayBatch<B::InnerBackend>>>,
    )> {
        if splits.train.is_empty() || splits.valid.is_empty() {
            return Err(anyhow!("Split d'entraînement ou de validation vide"));
        }

        let train_data = XrayDataset::from_rows(&splits.train, &self.config.image_dir);
        let valid_data = XrayDataset::from_rows(&splits.valid, &self.config.image_dir);

        let augmentation = Augmentation {
            flip_horizontal: self.hyperparams.flip_horizontal,
            rotation: self.hyperparams.rotation,
            shift_w: self.hyperparams.shift_w,
            shift_h: self.hyperparams.shift_h,
        };

        let batcher_train = XrayBatcher::<B>::augmented(
            self.hyperparams.size,
            augmentation,
            self.config.seed,
            self.device.clone(),
        );

        // Le chargeur de validation travaille sur le backend interne, sans autodiff.
        let device_valid = <B::InnerBackend as Backend>::Device::default();
        let batcher_valid = XrayBatcher::<B::InnerBackend>::new(self.hyperparams.size, device_valid);

        let train_loader = DataLoaderBuilder::<B, XrayItem, XrayBatch<B>>::new(batcher_train)
            .batch_size(self.config.batch_size)
            .shuffle(self.config.seed)
            .build(train_data);

        let valid_loader =
            DataLoaderBuilder::<B::InnerBackend, XrayItem, XrayBatch<B::InnerBackend>>::new(
                batcher_valid,
            )
            .batch_size(self.config.batch_size)
            .build(valid_data);

        Ok((train_loader, valid_loader))
    }

    fn create_optimizer(&self) -> SgdConfig {
        SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new().with_momentum(0.9).with_dampening(0.),
            ))
            .with_weight_decay(Some(WeightDecayConfig::new(
                self.hyperparams.weight_decay() as f32,
            )))
    }
}

// Erreur absolue moyenne sur une passe complète du chargeur.
pub fn evaluate<B: Backend>(
    model: &XrayAgeModel<B>,
    loader: Arc<dyn DataLoader<B, XrayBatch<B>>>,
) -> f64 {
    let mut total_error = 0.0f64;
    let mut total_count = 0usize;

    for batch in loader.iter() {
        let count = batch.targets.dims()[0];
        let loss = mean_absolute_error(model.forward(batch.images), batch.targets)
            .into_scalar()
            .elem::<f64>();
        total_error += loss * count as f64;
        total_count += count;
    }

    if total_count == 0 {
        0.0
    } else {
        total_error / total_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;

    fn hyperparams() -> Hyperparams {
        Hyperparams {
            size: 100,
            dropout: 0.2,
            lr_exp: 2,
            decay_exp: 4,
            flip_horizontal: true,
            rotation: 5.0,
            shift_w: 0.05,
            shift_h: 0.05,
        }
    }

    #[test]
    fn validate_accepts_the_default_configuration() {
        let trainer = TrialTrainer::<TestBackend>::new(
            PipelineConfig::default(),
            hyperparams(),
            Default::default(),
        );
        assert!(trainer.validate().is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_settings() {
        let mut config = PipelineConfig::default();
        config.batch_size = 0;
        let trainer =
            TrialTrainer::<TestBackend>::new(config, hyperparams(), Default::default());
        assert!(trainer.validate().is_err());

        let mut small = hyperparams();
        small.size = 16;
        let trainer = TrialTrainer::<TestBackend>::new(
            PipelineConfig::default(),
            small,
            Default::default(),
        );
        assert!(trainer.validate().is_err());

        let mut bad_dropout = hyperparams();
        bad_dropout.dropout = 1.0;
        let trainer = TrialTrainer::<TestBackend>::new(
            PipelineConfig::default(),
            bad_dropout,
            Default::default(),
        );
        assert!(trainer.validate().is_err());
    }
}
