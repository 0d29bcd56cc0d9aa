use anyhow::{anyhow, Context, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
};

use crate::config::PipelineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    #[serde(rename = "Image Index")]
    pub image_index: String,
    #[serde(rename = "Patient Age")]
    pub patient_age: u32,
}

#[derive(Debug, Clone)]
pub struct DataSplits {
    pub train: Vec<MetadataRow>,
    pub valid: Vec<MetadataRow>,
    pub test: Vec<MetadataRow>,
}

impl DataSplits {
    pub fn build(config: &PipelineConfig) -> Result<Self> {
        let rows = load_metadata(&config.metadata_csv, config.age_cap)?;

        let train_valid_names = read_name_list(&config.train_valid_list)?;
        let test_names = read_name_list(&config.test_list)?;

        let pool = filter_by_filenames(&rows, &train_valid_names);
        let test = filter_by_filenames(&rows, &test_names);

        let (train, valid) = split_train_valid(pool, config.valid_fraction, config.seed);

        println!("📈 Répartition du jeu de données:");
        println!("   - Entraînement: {} lignes", train.len());
        println!("   - Validation: {} lignes", valid.len());
        println!("   - Test: {} lignes", test.len());

        Ok(Self { train, valid, test })
    }

    // Suréchantillonnage du split d'entraînement uniquement, puis mélange.
    pub fn balance_train(&mut self, seed: u64) {
        self.train = oversample(&self.train);
        let mut rng = StdRng::seed_from_u64(seed);
        self.train.shuffle(&mut rng);
        println!("⚖️  Entraînement équilibré: {} lignes", self.train.len());
    }
}

pub fn load_metadata<P: AsRef<Path>>(path: P, age_cap: u32) -> Result<Vec<MetadataRow>> {
    let path = path.as_ref();
    println!("📂 Lecture des métadonnées depuis: {}", path.display());

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("ouverture du CSV {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, record) in reader.deserialize::<MetadataRow>().enumerate() {
        match record {
            Ok(row) => {
                if row.patient_age <= age_cap {
                    rows.push(row);
                }
            }
            Err(e) => {
                eprintln!("⚠️  Ligne {} invalide, ignorée: {}", i + 1, e);
            }
        }
    }

    if rows.is_empty() {
        return Err(anyhow!("Aucune ligne valide dans {}", path.display()));
    }

    println!("📊 {} lignes retenues (âge ≤ {})", rows.len(), age_cap);
    Ok(rows)
}

pub fn read_name_list<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("lecture de la liste {}", path.display()))?;

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn filter_by_filenames(rows: &[MetadataRow], names: &HashSet<String>) -> Vec<MetadataRow> {
    rows.par_iter()
        .filter(|r| names.contains(&r.image_index))
        .cloned()
        .collect()
}

// Mélange avec graine fixe puis coupe: la validation prend ceil(fraction * n).
pub fn split_train_valid(
    mut pool: Vec<MetadataRow>,
    valid_fraction: f64,
    seed: u64,
) -> (Vec<MetadataRow>, Vec<MetadataRow>) {
    let mut rng = StdRng::seed_from_u64(seed);
    pool.shuffle(&mut rng);

    let n_valid = ((pool.len() as f64) * valid_fraction).ceil() as usize;
    let train = pool.split_off(n_valid.min(pool.len()));
    (train, pool)
}

// Chaque âge est dupliqué (en boucle) jusqu'au compte du groupe majoritaire.
pub fn oversample(rows: &[MetadataRow]) -> Vec<MetadataRow> {
    let mut groups: BTreeMap<u32, Vec<MetadataRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.patient_age).or_default().push(row.clone());
    }

    let max_count = groups.values().map(Vec::len).max().unwrap_or(0);

    let mut balanced = Vec::with_capacity(max_count * groups.len());
    for group in groups.values() {
        for i in 0..max_count {
            balanced.push(group[i % group.len()].clone());
        }
    }
    balanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(name: &str, age: u32) -> MetadataRow {
        MetadataRow {
            image_index: name.to_string(),
            patient_age: age,
        }
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn load_metadata_filters_age_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(
            &dir,
            "meta.csv",
            "Image Index,Patient Age\n\
             a.png,40\n\
             b.png,101\n\
             c.png,not-a-number\n\
             d.png,100\n",
        );

        let rows = load_metadata(&csv, 100).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.image_index.as_str()).collect();

        assert_eq!(names, vec!["a.png", "d.png"]);
        assert!(rows.iter().all(|r| r.patient_age <= 100));
    }

    #[test]
    fn load_metadata_fails_on_missing_file() {
        assert!(load_metadata("no/such/file.csv", 100).is_err());
    }

    #[test]
    fn splits_are_disjoint_and_cover_the_lists() {
        let dir = tempfile::tempdir().unwrap();
        let csv_body: String = (0..20)
            .map(|i| format!("img{:02}.png,{}\n", i, 20 + i))
            .collect();
        let csv = write_file(&dir, "meta.csv", &format!("Image Index,Patient Age\n{}", csv_body));
        let train_valid: String = (0..15).map(|i| format!("img{:02}.png\n", i)).collect();
        let test: String = (15..20).map(|i| format!("img{:02}.png\n", i)).collect();
        let tv_list = write_file(&dir, "train_val_list.txt", &train_valid);
        let test_list = write_file(&dir, "test_list.txt", &test);

        let config = PipelineConfig {
            metadata_csv: csv,
            train_valid_list: tv_list,
            test_list,
            ..PipelineConfig::default()
        };

        let splits = DataSplits::build(&config).unwrap();

        let train: HashSet<_> = splits.train.iter().map(|r| r.image_index.clone()).collect();
        let valid: HashSet<_> = splits.valid.iter().map(|r| r.image_index.clone()).collect();
        let test: HashSet<_> = splits.test.iter().map(|r| r.image_index.clone()).collect();

        assert!(train.is_disjoint(&valid));
        assert!(train.is_disjoint(&test));
        assert!(valid.is_disjoint(&test));

        // ceil(0.2 * 15) = 3 en validation, le reste en entraînement
        assert_eq!(valid.len(), 3);
        assert_eq!(train.len(), 12);
        assert_eq!(test.len(), 5);
        assert_eq!(train.len() + valid.len() + test.len(), 20);
    }

    #[test]
    fn split_is_deterministic_for_a_given_seed() {
        let pool: Vec<MetadataRow> = (0..10).map(|i| row(&format!("{}.png", i), 30)).collect();

        let (train_a, valid_a) = split_train_valid(pool.clone(), 0.2, 0);
        let (train_b, valid_b) = split_train_valid(pool, 0.2, 0);

        assert_eq!(train_a, train_b);
        assert_eq!(valid_a, valid_b);
    }

    #[test]
    fn oversample_equalizes_every_age_group() {
        let ages = [1, 5, 5, 10, 50, 50, 50, 80, 99, 100];
        let rows: Vec<MetadataRow> = ages
            .iter()
            .enumerate()
            .map(|(i, &a)| row(&format!("img{}.png", i), a))
            .collect();

        let balanced = oversample(&rows);

        // 7 âges distincts, majorité à 3 (âge 50): 21 lignes au total
        assert_eq!(balanced.len(), 21);

        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for r in &balanced {
            *counts.entry(r.patient_age).or_default() += 1;
        }
        assert_eq!(counts.len(), 7);
        assert!(counts.values().all(|&c| c == 3));
    }

    #[test]
    fn oversample_keeps_original_rows() {
        let rows = vec![row("a.png", 5), row("b.png", 5), row("c.png", 9)];
        let balanced = oversample(&rows);

        assert_eq!(balanced.len(), 4);
        assert_eq!(
            balanced.iter().filter(|r| r.image_index == "c.png").count(),
            2
        );
    }

    #[test]
    fn balanced_toy_set_batches_as_expected() {
        let ages = [1, 5, 5, 10, 50, 50, 50, 80, 99, 100];
        let rows: Vec<MetadataRow> = ages
            .iter()
            .enumerate()
            .map(|(i, &a)| row(&format!("img{}.png", i), a))
            .collect();

        let balanced = oversample(&rows);
        let sizes = crate::data::batch_sizes(balanced.len(), 4);

        assert_eq!(sizes, vec![4, 4, 4, 4, 4, 1]);
        assert_eq!(sizes.iter().sum::<usize>(), balanced.len());
    }
}
