use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    relu: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, depth: usize, device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(depth);
        let mut channels = in_channels;
        for _ in 0..depth {
            convs.push(
                Conv2dConfig::new([channels, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device),
            );
            channels = out_channels;
        }

        Self {
            convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;
        for conv in &self.convs {
            x = self.relu.forward(conv.forward(x));
        }
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Vgg16Backbone<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> Vgg16Backbone<B> {
    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        // (canaux de sortie, nombre de convolutions) par étage
        let stages = [(64, 2), (128, 2), (256, 3), (512, 3), (512, 3)];

        let mut blocks = Vec::with_capacity(stages.len());
        let mut channels = in_channels;
        for (out_channels, depth) in stages {
            blocks.push(ConvBlock::new(channels, out_channels, depth, device));
            channels = out_channels;
        }

        Self { blocks }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }
        x.flatten(1, 3)
    }
}

// Cinq max-pooling 2x2: division entière par deux à chaque étage.
pub fn feature_dim(size: usize) -> usize {
    let mut s = size;
    for _ in 0..5 {
        s /= 2;
    }
    s * s * 512
}
