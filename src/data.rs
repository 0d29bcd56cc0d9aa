use anyhow::Result;
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Tensor},
};
use image::{imageops::FilterType, DynamicImage, ImageReader};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::metadata::MetadataRow;

// Constantes précalculées sur l'ensemble du jeu de données.
pub const PIXEL_MEAN: f32 = 126.95534595;
pub const PIXEL_STD: f32 = 63.95665607;

pub const AGE_SCALE: f32 = 100.0;

#[derive(Debug, Clone)]
pub struct XrayItem {
    pub image_path: PathBuf,
    pub age: u32,
}

#[derive(Debug, Clone)]
pub struct XrayDataset {
    items: Vec<XrayItem>,
}

impl XrayDataset {
    pub fn from_rows<P: AsRef<Path>>(rows: &[MetadataRow], image_dir: P) -> Self {
        let image_dir = image_dir.as_ref();
        let items = rows
            .iter()
            .map(|r| XrayItem {
                image_path: image_dir.join(&r.image_index),
                age: r.patient_age,
            })
            .collect();
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<XrayItem> {
        self.items.get(index).cloned()
    }
}

impl Dataset<XrayItem> for XrayDataset {
    fn get(&self, index: usize) -> Option<XrayItem> {
        self.get(index)
    }

    fn len(&self) -> usize {
        self.len()
    }
}

#[derive(Debug, Clone)]
pub struct Augmentation {
    pub flip_horizontal: bool,
    pub rotation: f64,
    pub shift_w: f64,
    pub shift_h: f64,
}

pub fn load_image(path: &Path) -> Result<DynamicImage> {
    Ok(ImageReader::open(path)?.decode()?)
}

// Redimensionne, garde le premier canal, normalise.
pub fn preprocess(img: &DynamicImage, size: usize) -> Vec<f32> {
    let resized = img.resize_exact(size as u32, size as u32, FilterType::Triangle);
    let raw_pixels = resized.to_rgb8().into_raw();

    let mut data = Vec::with_capacity(size * size);
    for i in 0..size * size {
        data.push((raw_pixels[i * 3] as f32 - PIXEL_MEAN) / PIXEL_STD);
    }
    data
}

pub fn augment(pixels: &mut Vec<f32>, size: usize, aug: &Augmentation, rng: &mut StdRng) {
    if aug.flip_horizontal && rng.gen_bool(0.5) {
        flip_horizontal(pixels, size);
    }

    if aug.rotation > 0.0 {
        let angle = rng.gen_range(-aug.rotation..aug.rotation);
        *pixels = affine_nearest(pixels, size, angle, 0.0, 0.0);
    }

    let dx = if aug.shift_w > 0.0 {
        rng.gen_range(-aug.shift_w..aug.shift_w) * size as f64
    } else {
        0.0
    };
    let dy = if aug.shift_h > 0.0 {
        rng.gen_range(-aug.shift_h..aug.shift_h) * size as f64
    } else {
        0.0
    };
    if dx != 0.0 || dy != 0.0 {
        *pixels = affine_nearest(pixels, size, 0.0, dx, dy);
    }
}

pub fn flip_horizontal(pixels: &mut [f32], size: usize) {
    for r in 0..size {
        let row = &mut pixels[r * size..(r + 1) * size];
        row.reverse();
    }
}

// Rééchantillonnage affine (rotation autour du centre puis translation),
// plus proche voisin, bords étendus.
pub fn affine_nearest(src: &[f32], size: usize, angle_deg: f64, dx: f64, dy: f64) -> Vec<f32> {
    let theta = angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    let center = (size as f64 - 1.0) / 2.0;
    let max = (size - 1) as f64;

    let mut out = vec![0.0f32; size * size];
    for r in 0..size {
        for c in 0..size {
            let x = c as f64 - center - dx;
            let y = r as f64 - center - dy;
            let sx = (cos * x + sin * y + center).round().clamp(0.0, max) as usize;
            let sy = (-sin * x + cos * y + center).round().clamp(0.0, max) as usize;
            out[r * size + c] = src[sy * size + sx];
        }
    }
    out
}

pub fn scale_age(age: u32) -> f32 {
    age as f32 / AGE_SCALE
}

#[derive(Debug, Clone)]
pub struct XrayBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 2>,
}

#[derive(Debug, Clone)]
pub struct XrayBatcher<B: Backend> {
    pub size: usize,
    pub device: B::Device,
    augmentation: Option<Augmentation>,
    seed: u64,
    batch_counter: Arc<AtomicU64>,
}

impl<B: Backend> XrayBatcher<B> {
    // Batcher déterministe (validation et test).
    pub fn new(size: usize, device: B::Device) -> Self {
        Self {
            size,
            device,
            augmentation: None,
            seed: 0,
            batch_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn augmented(size: usize, augmentation: Augmentation, seed: u64, device: B::Device) -> Self {
        Self {
            size,
            device,
            augmentation: Some(augmentation),
            seed,
            batch_counter: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<B: Backend> Batcher<B, XrayItem, XrayBatch<B>> for XrayBatcher<B> {
    fn batch(&self, items: Vec<XrayItem>, device: &B::Device) -> XrayBatch<B> {
        let batch_size = items.len();
        let frame_size = self.size * self.size;

        let mut rng = StdRng::seed_from_u64(
            self.seed
                .wrapping_add(self.batch_counter.fetch_add(1, Ordering::Relaxed)),
        );

        let mut images_data = Vec::with_capacity(batch_size * frame_size);
        let mut targets_data = Vec::with_capacity(batch_size);

        for item in &items {
            match load_image(&item.image_path) {
                Ok(img) => {
                    let mut pixels = preprocess(&img, self.size);
                    if let Some(aug) = &self.augmentation {
                        augment(&mut pixels, self.size, aug, &mut rng);
                    }
                    images_data.extend_from_slice(&pixels);
                }
                Err(e) => {
                    eprintln!("⚠️  Erreur chargement {}: {}", item.image_path.display(), e);
                    images_data.extend(vec![0.0; frame_size]);
                }
            }
            targets_data.push(scale_age(item.age));
        }

        let images = Tensor::<B, 1>::from_floats(&*images_data, device).reshape([
            batch_size as i32,
            1,
            self.size as i32,
            self.size as i32,
        ]);
        let targets =
            Tensor::<B, 1>::from_floats(&*targets_data, device).reshape([batch_size as i32, 1]);

        XrayBatch { images, targets }
    }
}

// Tailles des lots d'une passe complète: tous égaux à `batch`,
// sauf éventuellement le dernier.
pub fn batch_sizes(total: usize, batch: usize) -> Vec<usize> {
    assert!(batch > 0, "taille de lot nulle");
    let mut sizes = Vec::with_capacity(total.div_ceil(batch));
    let mut count = total;
    while count > 0 {
        let b = batch.min(count);
        sizes.push(b);
        count -= b;
    }
    sizes
}

pub fn steps_per_epoch(total: usize, batch: usize) -> usize {
    total.div_ceil(batch)
}
