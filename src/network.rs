use crate::dataset::{CLASSES, PIXELS, one_hot};
use ndarray::{Array, Array1, Array2, Axis};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::Uniform};

const HIDDEN_NEURONS: usize = 10;

// A two-layer network: 784 input pixels, a hidden layer of 10 ReLU neurons,
// and 10 softmax output neurons (one per digit class). Weights and biases are
// kept as explicit matrices so forward and backward propagation can be
// written out as plain matrix algebra.
pub struct Network {
    w1: Array2<f64>,
    b1: Array2<f64>,
    w2: Array2<f64>,
    b2: Array2<f64>,
}

// Pre-activations (z) and activations (a) of both layers for a forward pass,
// kept around because backward propagation needs all of them.
pub struct ForwardCache {
    pub z1: Array2<f64>,
    pub a1: Array2<f64>,
    pub z2: Array2<f64>,
    pub a2: Array2<f64>,
}

pub struct Gradients {
    pub dw1: Array2<f64>,
    pub db1: Array2<f64>,
    pub dw2: Array2<f64>,
    pub db2: Array2<f64>,
}

impl Network {
    // Initialize all weights and biases uniformly in [-0.5, 0.5).
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Network {
        let init = Uniform::new(-0.5, 0.5);
        Network {
            w1: Array::random_using((HIDDEN_NEURONS, PIXELS), init, rng),
            b1: Array::random_using((HIDDEN_NEURONS, 1), init, rng),
            w2: Array::random_using((CLASSES, HIDDEN_NEURONS), init, rng),
            b2: Array::random_using((CLASSES, 1), init, rng),
        }
    }

    // Push a batch of images through both layers. The images array must have
    // 784 rows (one image per column), or this method will panic due to
    // improper dimensions on the dot product.
    pub fn forward_prop(&self, images: &Array2<f64>) -> ForwardCache {
        let z1 = self.w1.dot(images) + &self.b1;
        let a1 = z1.mapv(relu);
        let z2 = self.w2.dot(&a1) + &self.b2;
        let a2 = softmax(&z2);
        ForwardCache { z1, a1, z2, a2 }
    }

    // Compute the gradient of the cross-entropy loss with respect to every
    // weight and bias, averaged over the batch. Combining softmax with
    // cross-entropy makes the output-layer error simply a2 - targets; from
    // there the error is propagated back through the hidden layer, zeroed
    // wherever the ReLU was inactive.
    pub fn backward_prop(
        &self,
        cache: &ForwardCache,
        images: &Array2<f64>,
        targets: &Array2<f64>,
    ) -> Gradients {
        let batch = images.ncols() as f64;

        let dz2 = &cache.a2 - targets;
        let dw2 = dz2.dot(&cache.a1.t()) / batch;
        let db2 = dz2.sum_axis(Axis(1)).insert_axis(Axis(1)) / batch;

        let dz1 = self.w2.t().dot(&dz2) * cache.z1.mapv(relu_derivative);
        let dw1 = dz1.dot(&images.t()) / batch;
        let db1 = dz1.sum_axis(Axis(1)).insert_axis(Axis(1)) / batch;

        Gradients { dw1, db1, dw2, db2 }
    }

    // Step every parameter against its gradient, scaled by the learning rate.
    pub fn update_params(&mut self, gradients: &Gradients, learning_rate: f64) {
        self.w1.scaled_add(-learning_rate, &gradients.dw1);
        self.b1.scaled_add(-learning_rate, &gradients.db1);
        self.w2.scaled_add(-learning_rate, &gradients.dw2);
        self.b2.scaled_add(-learning_rate, &gradients.db2);
    }

    // Train the network with full-batch gradient descent for a fixed number
    // of iterations. Every iteration runs one forward pass over the entire
    // training set, computes gradients by backward propagation, and updates
    // the parameters. Every 10th iteration, the predictions already computed
    // by the forward pass are reused to report how many training samples the
    // network currently classifies correctly.
    pub fn gradient_descent(
        &mut self,
        images: &Array2<f64>,
        labels: &Array1<u8>,
        learning_rate: f64,
        iterations: u32,
    ) {
        let targets = one_hot(labels);

        for iteration in 0..iterations {
            let cache = self.forward_prop(images);
            let gradients = self.backward_prop(&cache, images, &targets);
            self.update_params(&gradients, learning_rate);

            if iteration % 10 == 0 {
                let predictions = argmax_columns(&cache.a2);
                let correct = predictions
                    .iter()
                    .zip(labels.iter())
                    .filter(|&(&prediction, &label)| prediction == usize::from(label))
                    .count();
                println!("Iteration {iteration}: {correct} / {}", labels.len());
            }
        }
    }

    // Classify a batch of images as the digit whose output neuron has the
    // highest activation.
    pub fn predict(&self, images: &Array2<f64>) -> Vec<usize> {
        argmax_columns(&self.forward_prop(images).a2)
    }

    // Fraction of the given images the network classifies correctly.
    pub fn evaluate(&self, images: &Array2<f64>, labels: &Array1<u8>) -> f64 {
        accuracy(&self.predict(images), labels)
    }
}

fn relu(z: f64) -> f64 {
    z.max(0.0)
}

fn relu_derivative(z: f64) -> f64 {
    if z > 0.0 { 1.0 } else { 0.0 }
}

// Column-wise softmax. The maximum of each column is subtracted before
// exponentiating; this cancels out in the division but keeps exp() from
// overflowing on large logits.
fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut activations = logits.clone();
    for mut column in activations.axis_iter_mut(Axis(1)) {
        let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        column.mapv_inplace(|z| f64::exp(z - max));
        let sum = column.sum();
        column.mapv_inplace(|a| a / sum);
    }
    activations
}

// For each column of activations, find the index of the neuron with the
// highest value.
pub fn argmax_columns(activations: &Array2<f64>) -> Vec<usize> {
    activations
        .axis_iter(Axis(1))
        .map(|column| {
            column
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(index, _)| index)
                .expect("activation columns have at least 1 element (specifically 10)")
        })
        .collect()
}

pub fn accuracy(predictions: &[usize], labels: &Array1<u8>) -> f64 {
    let correct = predictions
        .iter()
        .zip(labels.iter())
        .filter(|&(&prediction, &label)| prediction == usize::from(label))
        .count();
    correct as f64 / labels.len() as f64
}
