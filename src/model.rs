use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu, Sigmoid},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
    train::{TrainOutput, TrainStep, ValidStep},
};

use crate::{
    data::XrayBatch,
    vgg::{feature_dim, Vgg16Backbone},
};

pub const HIDDEN_UNITS: usize = 4096;

#[derive(Debug, Clone)]
pub struct AgeOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub output: Tensor<B, 2>,
    pub targets: Tensor<B, 2>,
}

impl<B: Backend> burn::train::metric::ItemLazy for AgeOutput<B> {
    type ItemSync = Self;
    fn sync(self) -> Self::ItemSync {
        self
    }
}

impl<B: Backend> burn::train::metric::Adaptor<burn::train::metric::LossInput<B>>
    for AgeOutput<B>
{
    fn adapt(&self) -> burn::train::metric::LossInput<B> {
        burn::train::metric::LossInput::new(self.loss.clone())
    }
}

#[derive(Module, Debug)]
pub struct AgeHead<B: Backend> {
    dropout: Option<Dropout>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    predictions: Linear<B>,
    relu: Relu,
    sigmoid: Sigmoid,
}

impl<B: Backend> AgeHead<B> {
    pub fn new(
        in_features: usize,
        hidden_features: usize,
        dropout_rate: f64,
        device: &B::Device,
    ) -> Self {
        let dropout = (dropout_rate > 0.0).then(|| DropoutConfig::new(dropout_rate).init());

        Self {
            dropout,
            fc1: LinearConfig::new(in_features, hidden_features).init(device),
            fc2: LinearConfig::new(hidden_features, hidden_features).init(device),
            predictions: LinearConfig::new(hidden_features, 1).init(device),
            relu: Relu::new(),
            sigmoid: Sigmoid::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };
        let x = self.relu.forward(self.fc1.forward(x));
        let x = self.relu.forward(self.fc2.forward(x));
        self.sigmoid.forward(self.predictions.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct XrayAgeModel<B: Backend> {
    backbone: Vgg16Backbone<B>,
    head: AgeHead<B>,
}

impl<B: Backend> XrayAgeModel<B> {
    pub fn new(size: usize, dropout_rate: f64, device: &B::Device) -> Self {
        Self {
            backbone: Vgg16Backbone::new(1, device),
            head: AgeHead::new(feature_dim(size), HIDDEN_UNITS, dropout_rate, device),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }
}

pub fn mean_absolute_error<B: Backend>(
    output: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    (output - targets).abs().mean()
}

impl<B: AutodiffBackend> TrainStep<XrayBatch<B>, AgeOutput<B>> for XrayAgeModel<B> {
    fn step(&self, batch: XrayBatch<B>) -> TrainOutput<AgeOutput<B>> {
        let output = self.forward(batch.images);
        let loss = mean_absolute_error(output.clone(), batch.targets.clone());

        let grads = loss.backward();

        TrainOutput::new(
            self,
            grads,
            AgeOutput {
                loss: loss.detach(),
                output: output.detach(),
                targets: batch.targets,
            },
        )
    }
}

impl<B: Backend> ValidStep<XrayBatch<B>, AgeOutput<B>> for XrayAgeModel<B> {
    fn step(&self, batch: XrayBatch<B>) -> AgeOutput<B> {
        let output = self.forward(batch.images);
        let loss = mean_absolute_error(output.clone(), batch.targets.clone());

        AgeOutput {
            loss: loss.detach(),
            output,
            targets: batch.targets,
        }
    }
}
