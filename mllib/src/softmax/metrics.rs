use ndarray::ArrayView2;

use super::model::{argmax, cross_entropy};
use crate::Measures;

/// Evaluates the requested measures of `probs` against `labels`.
///
/// `accp` is reported alongside `acc`, with the same value.
pub fn evaluate(probs: ArrayView2<f32>, labels: &[usize], nclasses: usize, wanted: &[String]) -> Measures {
    let predicted: Vec<usize> = probs.rows().into_iter().map(argmax).collect();
    let mut measures = Measures::new();

    for name in wanted {
        match name.as_str() {
            "acc" => {
                let acc = accuracy(&predicted, labels);
                measures.insert("acc".to_string(), acc);
                measures.insert("accp".to_string(), acc);
            }
            "mcll" => {
                measures.insert("mcll".to_string(), cross_entropy(probs, labels));
            }
            "f1" => {
                measures.insert("f1".to_string(), macro_f1(&predicted, labels, nclasses));
            }
            _ => {}
        }
    }

    measures
}

fn accuracy(predicted: &[usize], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }

    let hits = predicted.iter().zip(labels).filter(|(p, l)| p == l).count();
    hits as f64 / labels.len() as f64
}

/// F1 averaged over the classes that appear in either the labels or the predictions.
fn macro_f1(predicted: &[usize], labels: &[usize], nclasses: usize) -> f64 {
    let mut tp = vec![0usize; nclasses];
    let mut fp = vec![0usize; nclasses];
    let mut fn_ = vec![0usize; nclasses];

    for (&p, &l) in predicted.iter().zip(labels) {
        if p == l {
            tp[p] += 1;
        } else {
            fp[p] += 1;
            fn_[l] += 1;
        }
    }

    let scores: Vec<f64> = (0..nclasses)
        .filter(|&c| tp[c] + fp[c] + fn_[c] > 0)
        .map(|c| {
            let denom = 2 * tp[c] + fp[c] + fn_[c];
            2.0 * tp[c] as f64 / denom as f64
        })
        .collect();

    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}
