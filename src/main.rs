use crate::dataset::DigitDataset;
use crate::network::Network;
use anyhow::Result;
use ndarray::Axis;
use ndarray_rand::rand::thread_rng;
use std::env;

mod dataset;
mod network;

const LEARNING_RATE: f64 = 0.10;
const ITERATIONS: u32 = 500;

fn main() -> Result<()> {
    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("data/train.csv"));

    let mut rng = thread_rng();
    let dataset = DigitDataset::load(&path, &mut rng)?;
    println!(
        "Loaded {} training and {} dev samples from {path}",
        dataset.train_labels.len(),
        dataset.dev_labels.len()
    );

    let mut network = Network::new(&mut rng);
    network.gradient_descent(
        &dataset.train_images,
        &dataset.train_labels,
        LEARNING_RATE,
        ITERATIONS,
    );

    let dev_accuracy = network.evaluate(&dataset.dev_images, &dataset.dev_labels);
    println!("Dev accuracy: {dev_accuracy:.4}");

    inspect_sample(&network, &dataset, 0);

    Ok(())
}

// Show one dev sample: render the image as ASCII art, then print the
// network's guess next to the true label.
fn inspect_sample(network: &Network, dataset: &DigitDataset, index: usize) {
    let image = dataset.dev_images.column(index);
    let prediction = network.predict(&image.to_owned().insert_axis(Axis(1)))[0];

    dataset::visualize(image);
    println!("Prediction: {prediction}");
    println!("Label: {}", dataset.dev_labels[index]);
}
