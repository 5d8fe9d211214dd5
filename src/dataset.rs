use anyhow::{Context, Result, ensure};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::{Array, Array1, Array2, ArrayView1};
use ndarray_rand::rand::{Rng, seq::SliceRandom};
use std::{fs::File, io::Read, path::Path};

pub const IMAGE_COLUMNS: usize = 28;
pub const IMAGE_ROWS: usize = 28;
pub const PIXELS: usize = IMAGE_ROWS * IMAGE_COLUMNS;
pub const CLASSES: usize = 10;

// How many samples are held out for the dev set. For datasets too small to
// spare this many, half the samples are held out instead.
const DEV_SET_SIZE: usize = 1000;

// The labeled digit images, already shuffled and split. Images are stored one
// sample per column, so train_images is a [784 x m] array whose pixel values
// have been normalized from 0-255 bytes down to the 0.0-1.0 range the network
// trains on.
#[derive(Debug)]
pub struct DigitDataset {
    pub train_images: Array2<f64>,
    pub train_labels: Array1<u8>,
    pub dev_images: Array2<f64>,
    pub dev_labels: Array1<u8>,
}

impl DigitDataset {
    // Loads a labeled digit dataset from a CSV file in the Kaggle
    // digit-recognizer format: a header line, then one record per image of
    // the form label,pixel0,pixel1,...,pixel783. Files ending in .gz are
    // decompressed transparently. The records are shuffled before the
    // dev/train split so the dev set is not biased by the file's row order.
    pub fn load<R: Rng + ?Sized>(path: impl AsRef<Path>, rng: &mut R) -> Result<DigitDataset> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|extension| extension == "gz")
        {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

        let mut samples = Vec::new();
        for (row, record) in csv_reader.records().enumerate() {
            let record = record.with_context(|| format!("failed to read CSV record {row}"))?;
            ensure!(
                record.len() == PIXELS + 1,
                "record {row} has {} fields, expected {}",
                record.len(),
                PIXELS + 1
            );

            let label: u8 = record[0]
                .parse()
                .with_context(|| format!("bad label {:?} in record {row}", &record[0]))?;
            ensure!(
                label < CLASSES as u8,
                "label {label} in record {row} is not a digit"
            );

            let pixels = record
                .iter()
                // Skip the label field; everything after it is a pixel.
                .skip(1)
                .map(|field| field.parse::<f64>().map(|value| value / 255.0))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("bad pixel value in record {row}"))?;
            samples.push((label, pixels));
        }
        ensure!(
            samples.len() >= 2,
            "dataset has {} samples, need at least 2 to split into dev and train sets",
            samples.len()
        );

        samples.shuffle(rng);

        let dev_size = DEV_SET_SIZE.min(samples.len() / 2);
        let train_samples = samples.split_off(dev_size);
        let dev_samples = samples;

        Ok(DigitDataset {
            train_images: images_matrix(&train_samples),
            train_labels: labels_vector(&train_samples),
            dev_images: images_matrix(&dev_samples),
            dev_labels: labels_vector(&dev_samples),
        })
    }
}

// Lay the samples out as a [784 x m] array, one image per column.
fn images_matrix(samples: &[(u8, Vec<f64>)]) -> Array2<f64> {
    Array::from_shape_fn((PIXELS, samples.len()), |(pixel, sample)| {
        samples[sample].1[pixel]
    })
}

fn labels_vector(samples: &[(u8, Vec<f64>)]) -> Array1<u8> {
    samples.iter().map(|&(label, _)| label).collect()
}

// Turn the labels into a [10 x m] array where each column is all 0.0 except
// for a 1.0 in the position corresponding to that sample's label, which is
// the format of the perfect activation output of the network.
pub fn one_hot(labels: &Array1<u8>) -> Array2<f64> {
    Array::from_shape_fn((CLASSES, labels.len()), |(class, sample)| {
        if class == labels[sample].into() {
            1.0
        } else {
            0.0
        }
    })
}

// Print a simple ASCII representation of a single image (one column of an
// image matrix, so 784 pixel values in the 0.0-1.0 range).
pub fn visualize(image: ArrayView1<f64>) {
    for row in &image.iter().chunks(IMAGE_COLUMNS) {
        for pixel in row {
            match pixel {
                p if *p < 0.2 => print!(" "),
                p if *p < 0.4 => print!("░"),
                p if *p < 0.6 => print!("▒"),
                p if *p < 0.8 => print!("▓"),
                _ => print!("█"),
            }
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use itertools::Itertools;
    use ndarray::Axis;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
    use std::io::Write;
    use std::{env, fs};

    // Build a dataset CSV in the Kaggle format: header line, then one record
    // per image where the pixel at (label * 7) is 255 and the rest are 0.
    fn sample_csv(labels: &[u8]) -> String {
        let header = std::iter::once(String::from("label"))
            .chain((0..PIXELS).map(|pixel| format!("pixel{pixel}")))
            .join(",");
        let mut csv = header;
        for &label in labels {
            csv.push('\n');
            let record = std::iter::once(label.to_string())
                .chain((0..PIXELS).map(|pixel| {
                    if pixel == usize::from(label) * 7 {
                        String::from("255")
                    } else {
                        String::from("0")
                    }
                }))
                .join(",");
            csv.push_str(&record);
        }
        csv
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("digit-classifier-{}-{name}", std::process::id()))
    }

    #[test]
    fn load_splits_and_normalizes() {
        let path = temp_path("split.csv");
        fs::write(&path, sample_csv(&[0, 1, 2, 3])).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let dataset = DigitDataset::load(&path, &mut rng).unwrap();
        fs::remove_file(&path).unwrap();

        // 4 samples split as half dev, half train.
        assert_eq!(dataset.dev_images.dim(), (PIXELS, 2));
        assert_eq!(dataset.train_images.dim(), (PIXELS, 2));
        assert_eq!(dataset.dev_labels.len(), 2);
        assert_eq!(dataset.train_labels.len(), 2);

        // All four labels survive the shuffle, each exactly once.
        let mut labels: Vec<u8> = dataset
            .dev_labels
            .iter()
            .chain(dataset.train_labels.iter())
            .copied()
            .collect();
        labels.sort_unstable();
        assert_eq!(labels, vec![0, 1, 2, 3]);

        // The lit pixel of each sample normalizes to exactly 1.0 and sits in
        // the row matching its label.
        for (image, &label) in dataset
            .train_images
            .axis_iter(Axis(1))
            .zip(dataset.train_labels.iter())
        {
            assert_relative_eq!(image.sum(), 1.0);
            assert_relative_eq!(image[usize::from(label) * 7], 1.0);
        }
    }

    #[test]
    fn load_shuffles_before_splitting() {
        // Labels appear in the file in ascending order, so an unshuffled
        // split would hand the first half to the dev set verbatim.
        let path = temp_path("ordered.csv");
        fs::write(&path, sample_csv(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9])).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let dataset = DigitDataset::load(&path, &mut rng).unwrap();
        fs::remove_file(&path).unwrap();

        let loaded_order: Vec<u8> = dataset
            .dev_labels
            .iter()
            .chain(dataset.train_labels.iter())
            .copied()
            .collect();
        assert_ne!(loaded_order, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        // Nothing is lost in the reordering.
        let mut sorted = loaded_order;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn load_decompresses_gzip() {
        use flate2::{Compression, write::GzEncoder};

        let path = temp_path("gzipped.csv.gz");
        let file = fs::File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(sample_csv(&[4, 5, 6, 7]).as_bytes()).unwrap();
        encoder.finish().unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let dataset = DigitDataset::load(&path, &mut rng).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(dataset.dev_labels.len() + dataset.train_labels.len(), 4);
    }

    #[test]
    fn load_rejects_bad_label() {
        let path = temp_path("bad-label.csv");
        let mut csv = sample_csv(&[1, 2]);
        csv.push('\n');
        csv.push_str(&std::iter::once(String::from("12"))
            .chain((0..PIXELS).map(|_| String::from("0")))
            .join(","));
        fs::write(&path, csv).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let error = DigitDataset::load(&path, &mut rng).unwrap_err();
        fs::remove_file(&path).unwrap();

        assert!(error.to_string().contains("is not a digit"));
    }

    #[test]
    fn load_rejects_short_record() {
        let path = temp_path("short-record.csv");
        let mut csv = sample_csv(&[1, 2]);
        csv.push_str("\n3,0,0,0");
        fs::write(&path, csv).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let error = DigitDataset::load(&path, &mut rng).unwrap_err();
        fs::remove_file(&path).unwrap();

        // The mismatch is caught while reading the record, so the cause sits
        // further down the error chain.
        assert!(format!("{error:#}").contains("fields"));
    }

    #[test]
    fn load_rejects_tiny_dataset() {
        let path = temp_path("tiny.csv");
        fs::write(&path, sample_csv(&[5])).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let error = DigitDataset::load(&path, &mut rng).unwrap_err();
        fs::remove_file(&path).unwrap();

        assert!(error.to_string().contains("at least 2"));
    }

    #[test]
    fn one_hot_round_trips_through_argmax() {
        let labels = Array1::from(vec![3u8, 0, 9, 9]);
        let encoded = one_hot(&labels);

        assert_eq!(encoded.dim(), (CLASSES, 4));
        for (column, &label) in encoded.axis_iter(Axis(1)).zip(labels.iter()) {
            // Exactly one neuron lit per column, at the label's position.
            assert_relative_eq!(column.sum(), 1.0);
            assert_relative_eq!(column[usize::from(label)], 1.0);
        }
    }
}
