use ndarray::ArrayView1;
use num_complex::Complex64;

pub fn mean_power(samples: ArrayView1<'_, Complex64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|z| z.norm_sqr()).sum::<f64>() / samples.len() as f64
}

pub fn mean_lag1(samples: ArrayView1<'_, Complex64>) -> Complex64 {
    if samples.len() < 2 {
        return Complex64::new(0.0, 0.0);
    }
    let sum: Complex64 = samples
        .iter()
        .zip(samples.iter().skip(1))
        .map(|(a, b)| a.conj() * b)
        .sum();
    sum / (samples.len() - 1) as f64
}

pub fn power_db(power: f64) -> Option<f64> {
    (power > 0.0).then(|| 10.0 * power.log10())
}
